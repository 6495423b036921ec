// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Synchronous rendezvous calls with nested-call servicing
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests (loopback, two threads)
//!
//! A caller blocked in [`call`] keeps reading its channel. A `RETURN` frame
//! completes the call; anything else is the peer calling back into us, which is
//! dispatched through our own table and answered before waiting again. Each
//! side therefore has at most one call outstanding per nesting level, and a
//! nested reply can never be taken for an outer one.

use std::rc::Rc;

use vm_abi::Opcode;

use crate::channel::{Channel, Frame};
use crate::dispatch::{DispatchError, HandlerTable};
use crate::message::{encode_call, frame_opcode, OneWay, Request};
use crate::wire::{Reader, WireError};
use crate::IpcError;

/// One side of a channel: owns the link and the table serving inbound calls.
pub trait Endpoint: Sized + 'static {
    /// Error type threaded through handlers and calls.
    type Error: From<IpcError> + From<WireError> + From<DispatchError> + 'static;

    /// The link to the peer.
    fn channel(&self) -> &dyn Channel;

    /// Table used for inbound frames.
    fn handlers(&self) -> Rc<HandlerTable<Self, Self::Error>>;
}

/// Sends `M` and blocks until its reply, serving nested inbound calls meanwhile.
pub fn call<P: Endpoint, M: Request>(endpoint: &mut P, args: &M::Args) -> Result<M::Reply, P::Error> {
    endpoint.channel().send(encode_call::<M>(args)?)?;
    loop {
        let frame = endpoint.channel().recv()?;
        if frame_opcode(&frame)? != Opcode::RETURN {
            serve_frame(endpoint, frame)?;
            continue;
        }
        let Frame { data, handles } = frame;
        let mut r = Reader::new(&data, handles);
        r.read::<u32>()?;
        let reply = r.read::<M::Reply>()?;
        r.finish()?;
        return Ok(reply);
    }
}

/// Sends a one-way `M` without waiting.
pub fn post<P: Endpoint, M: OneWay>(endpoint: &P, args: &M::Args) -> Result<(), P::Error> {
    endpoint.channel().send(encode_call::<M>(args)?)?;
    Ok(())
}

/// Dispatches one received frame and sends its reply, if any.
pub fn serve_frame<P: Endpoint>(endpoint: &mut P, frame: Frame) -> Result<(), P::Error> {
    let table = endpoint.handlers();
    if let Some(reply) = table.dispatch(endpoint, frame)? {
        endpoint.channel().send(reply)?;
    }
    Ok(())
}

/// Waits for one inbound frame and serves it.
pub fn handle_incoming<P: Endpoint>(endpoint: &mut P) -> Result<(), P::Error> {
    let frame = endpoint.channel().recv()?;
    serve_frame(endpoint, frame)
}
