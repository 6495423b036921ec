// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy of the VM runtime and its mapping to process exit codes.

use thiserror::Error;
use vm_abi::Opcode;
use vm_ipc::{DispatchError, IpcError, RegistryError, WireError};

/// Result alias for runtime and trap operations.
pub type VmResult<T> = core::result::Result<T, VmError>;

/// Everything that ends the serving loop.
///
/// None of these are retried: each one means a dead peer, a version mismatch
/// or an explicit request to stop.
#[derive(Debug, Error)]
pub enum VmError {
    /// Clean shutdown requested from inside a handler.
    #[error("exit requested")]
    Exit,
    /// Missing or malformed bootstrap handle.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Channel read/write failure.
    #[error("transport error: {0}")]
    Transport(#[from] IpcError),
    /// Payload did not match the shape bound to its opcode.
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    /// No handler for the opcode.
    #[error("unrecognized opcode {0}")]
    UnrecognizedOpcode(Opcode),
    /// Known opcode without an implementation.
    #[error("operation {name} ({opcode}) is not implemented")]
    UnimplementedOperation {
        /// Offending opcode.
        opcode: Opcode,
        /// Operation name.
        name: &'static str,
    },
    /// Handler table could not be built.
    #[error("handler registration failed: {0}")]
    Registry(#[from] RegistryError),
}

impl VmError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Exit => 0,
            Self::Configuration(_) => 2,
            _ => 1,
        }
    }

    /// Returns `true` for the explicit exit signal.
    pub fn is_exit(&self) -> bool {
        matches!(self, Self::Exit)
    }
}

impl From<WireError> for VmError {
    fn from(err: WireError) -> Self {
        Self::MalformedMessage(err.to_string())
    }
}

impl From<DispatchError> for VmError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::UnrecognizedOpcode(opcode) => Self::UnrecognizedOpcode(opcode),
            DispatchError::Unimplemented { opcode, name } => Self::UnimplementedOperation { opcode, name },
            DispatchError::UnexpectedReply => Self::MalformedMessage(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(VmError::Exit.exit_code(), 0);
        assert_eq!(VmError::Configuration("x".into()).exit_code(), 2);
        assert_eq!(VmError::Transport(IpcError::PeerClosed).exit_code(), 1);
        assert_eq!(VmError::UnrecognizedOpcode(Opcode::new(7, 0)).exit_code(), 1);
    }

    #[test]
    fn dispatch_errors_keep_their_kind() {
        let op = Opcode::new(0, 9);
        assert!(matches!(
            VmError::from(DispatchError::Unimplemented { opcode: op, name: "GAME_SNAPSHOT_CALLBACK" }),
            VmError::UnimplementedOperation { name: "GAME_SNAPSHOT_CALLBACK", .. }
        ));
        assert!(matches!(VmError::from(DispatchError::UnrecognizedOpcode(op)), VmError::UnrecognizedOpcode(o) if o == op));
        assert!(matches!(VmError::from(WireError::InvalidUtf8), VmError::MalformedMessage(_)));
    }
}
