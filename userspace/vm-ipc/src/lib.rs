// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Host <-> game VM IPC substrate
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit + property tests per module
//!
//! PUBLIC API:
//!   - Wire / Writer / Reader: flat little-endian codec
//!   - encode_frame / FrameReader: stream framing
//!   - Channel trait: UnixChannel (SCM_RIGHTS) and LoopbackChannel backends
//!   - SharedMemory: fd-backed region transferable as an OsHandle
//!   - Message / HandlerTable: compile-time opcode binding and dispatch
//!   - rpc::{call, post, handle_incoming}: rendezvous calls with nested servicing
//!
//! DEPENDENCIES:
//!   - libc: sendmsg/recvmsg, memfd/shm, mmap
//!   - parking_lot::Mutex: interior locking for `&self` channels
//!   - thiserror: error enums
//!
//! ADR: docs/adr/0003-ipc-runtime-architecture.md

#![deny(clippy::all, missing_docs)]

use std::io;

use thiserror::Error;

pub mod channel;
pub mod dispatch;
pub mod framing;
pub mod loopback;
pub mod message;
pub mod rpc;
pub mod shm;
pub mod unix;
pub mod wire;

pub use channel::{Channel, Frame, OsHandle};
pub use dispatch::{DispatchError, HandlerTable, RegistryError};
pub use loopback::{loopback_pair, LoopbackChannel};
pub use message::{Message, OneWay, Request};
pub use rpc::Endpoint;
pub use shm::SharedMemory;
pub use unix::UnixChannel;
pub use wire::{Blob, Reader, Wire, WireError, Writer};

/// Result type returned by IPC operations.
pub type Result<T> = core::result::Result<T, IpcError>;

/// Errors produced by the transport layer.
#[derive(Debug, Error)]
pub enum IpcError {
    /// The supplied OS handle cannot be used as a channel or region.
    #[error("invalid handle: {0}")]
    InvalidHandle(String),
    /// Read or write on the channel failed.
    #[error("transport failure: {0}")]
    Transport(#[source] io::Error),
    /// The peer closed its end.
    #[error("peer closed the channel")]
    PeerClosed,
    /// A bounded wait expired.
    #[error("operation timed out")]
    Timeout,
    /// Frame length exceeds [`framing::MAX_FRAME_LEN`].
    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),
    /// Handle count exceeds [`framing::MAX_FRAME_HANDLES`].
    #[error("frame carries {0} handles, over the limit")]
    TooManyHandles(usize),
    /// Frame header announced more handles than arrived.
    #[error("frame announced {expected} handles but {received} arrived")]
    MissingHandles {
        /// Announced count.
        expected: usize,
        /// Descriptors actually queued.
        received: usize,
    },
    /// The kernel dropped ancillary data.
    #[error("descriptor transfer truncated")]
    HandlesTruncated,
    /// Frame contents could not be encoded.
    #[error(transparent)]
    Wire(#[from] WireError),
    /// Shared memory setup failed.
    #[error("shared memory: {0}")]
    Shm(#[source] io::Error),
}
