// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Compile-time binding between an opcode and its argument/result shapes.

use vm_abi::Opcode;

use crate::channel::Frame;
use crate::wire::{Reader, Wire, WireError, Writer};

/// One remote operation.
///
/// Both ends name the same type, so an argument or reply shape cannot drift
/// from its opcode without a compile error.
pub trait Message: 'static {
    /// Wire identifier.
    const OPCODE: Opcode;
    /// Name used in diagnostics.
    const NAME: &'static str;
    /// Argument tuple or record.
    type Args: Wire;
    /// Result tuple or record.
    type Reply: Wire;
}

/// A message answered by a `RETURN` frame; only these can be awaited.
pub trait Request: Message {}

/// A fire-and-forget message: no reply frame is produced or awaited.
pub trait OneWay: Message<Reply = ()> {}

/// Builds the request frame for `M`.
pub fn encode_call<M: Message>(args: &M::Args) -> Result<Frame, WireError> {
    let mut w = Writer::for_opcode(M::OPCODE);
    w.write(args);
    w.into_frame()
}

/// Builds the reply frame for `M`.
pub fn encode_reply<M: Message>(reply: &M::Reply) -> Result<Frame, WireError> {
    let mut w = Writer::for_opcode(Opcode::RETURN);
    w.write(reply);
    w.into_frame()
}

/// Reads the opcode heading `frame`.
pub fn frame_opcode(frame: &Frame) -> Result<Opcode, WireError> {
    Reader::from_bytes(&frame.data).read::<u32>().map(Opcode::from_raw)
}

/// Decodes a payload that must contain exactly one `T` after the opcode.
pub fn decode_body<T: Wire>(frame: Frame) -> Result<T, WireError> {
    let Frame { data, handles } = frame;
    let mut r = Reader::new(&data, handles);
    r.read::<u32>()?;
    let value = r.read::<T>()?;
    r.finish()?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ping;

    impl Message for Ping {
        const OPCODE: Opcode = Opcode::new(0, 42);
        const NAME: &'static str = "Ping";
        type Args = (i32, String);
        type Reply = bool;
    }

    impl Request for Ping {}

    #[test]
    fn call_frame_starts_with_opcode() {
        let frame = encode_call::<Ping>(&(3, "x".into())).unwrap();
        assert_eq!(&frame.data[..4], &42u32.to_le_bytes());
        assert_eq!(frame_opcode(&frame).unwrap(), Ping::OPCODE);
        assert_eq!(decode_body::<(i32, String)>(frame).unwrap(), (3, "x".to_string()));
    }

    #[test]
    fn reply_frame_is_tagged_return() {
        let frame = encode_reply::<Ping>(&true).unwrap();
        assert_eq!(frame.data, vec![0xff, 0xff, 0xff, 0xff, 1]);
    }

    #[test]
    fn short_frame_has_no_opcode() {
        let frame = Frame::bytes(vec![1, 2]);
        assert!(matches!(frame_opcode(&frame), Err(WireError::Truncated { .. })));
    }
}
