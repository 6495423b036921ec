// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Opcode -> handler table with typed decode/invoke/encode
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests
//!
//! PUBLIC API:
//!   - HandlerTable::register::<M>(handler): bind a typed request handler to `M::OPCODE`
//!   - HandlerTable::register_one_way::<M>(handler): same, but no reply frame is produced
//!   - HandlerTable::register_unimplemented(opcode, name): known opcode, fatal on receipt
//!   - HandlerTable::dispatch(ctx, frame): decode, invoke, encode the reply frame
//!
//! The table is filled once before serving starts and only read afterwards.
//! Every miss is a version mismatch and is reported, never skipped.

use std::collections::HashMap;

use thiserror::Error;
use vm_abi::Opcode;

use crate::channel::Frame;
use crate::message::{encode_reply, Message, OneWay, Request};
use crate::wire::{Reader, WireError};

/// Registration-time binding errors.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Opcode already bound.
    #[error("opcode {0} registered twice")]
    Duplicate(Opcode),
    /// Opcode is reserved by the transport.
    #[error("opcode {0} is reserved")]
    Reserved(Opcode),
}

/// Dispatch-time failures. All are fatal for the receiving process.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// No handler bound to the opcode.
    #[error("unrecognized opcode {0}")]
    UnrecognizedOpcode(Opcode),
    /// Opcode is known but has no implementation.
    #[error("operation {name} ({opcode}) is not implemented")]
    Unimplemented {
        /// Offending opcode.
        opcode: Opcode,
        /// Operation name.
        name: &'static str,
    },
    /// A reply frame arrived while no call was outstanding.
    #[error("reply frame received outside of a call")]
    UnexpectedReply,
}

type Handler<Ctx, E> = Box<dyn Fn(&mut Ctx, &mut Reader<'_>) -> Result<Option<Frame>, E>>;

enum Entry<Ctx, E> {
    Bound { name: &'static str, handler: Handler<Ctx, E> },
    Unimplemented { name: &'static str },
}

/// Immutable-after-init map from opcode to handler.
pub struct HandlerTable<Ctx, E> {
    entries: HashMap<Opcode, Entry<Ctx, E>>,
}

impl<Ctx: 'static, E: 'static> Default for HandlerTable<Ctx, E>
where
    E: From<WireError> + From<DispatchError>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<Ctx: 'static, E: 'static> HandlerTable<Ctx, E>
where
    E: From<WireError> + From<DispatchError>,
{
    /// Empty table.
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    fn reserve(&mut self, opcode: Opcode) -> Result<(), RegistryError> {
        if opcode == Opcode::RETURN {
            return Err(RegistryError::Reserved(opcode));
        }
        if self.entries.contains_key(&opcode) {
            return Err(RegistryError::Duplicate(opcode));
        }
        Ok(())
    }

    fn bind<M: Message>(&mut self, handler: Handler<Ctx, E>) -> Result<&mut Self, RegistryError> {
        self.reserve(M::OPCODE)?;
        self.entries.insert(M::OPCODE, Entry::Bound { name: M::NAME, handler });
        Ok(self)
    }

    /// Binds `handler` to `M::OPCODE`; its result goes back in a `RETURN` frame.
    pub fn register<M, F>(&mut self, handler: F) -> Result<&mut Self, RegistryError>
    where
        M: Request,
        F: Fn(&mut Ctx, M::Args) -> Result<M::Reply, E> + 'static,
    {
        self.bind::<M>(Box::new(move |ctx: &mut Ctx, r: &mut Reader<'_>| {
            let args = r.read::<M::Args>()?;
            r.finish()?;
            let reply = handler(ctx, args)?;
            Ok(Some(encode_reply::<M>(&reply)?))
        }))
    }

    /// Binds `handler` to a one-way `M::OPCODE`; nothing is sent back.
    pub fn register_one_way<M, F>(&mut self, handler: F) -> Result<&mut Self, RegistryError>
    where
        M: OneWay,
        F: Fn(&mut Ctx, M::Args) -> Result<(), E> + 'static,
    {
        self.bind::<M>(Box::new(move |ctx: &mut Ctx, r: &mut Reader<'_>| {
            let args = r.read::<M::Args>()?;
            r.finish()?;
            handler(ctx, args)?;
            Ok(None)
        }))
    }

    /// Marks `opcode` as known but unsupported.
    pub fn register_unimplemented(
        &mut self,
        opcode: Opcode,
        name: &'static str,
    ) -> Result<&mut Self, RegistryError> {
        self.reserve(opcode)?;
        self.entries.insert(opcode, Entry::Unimplemented { name });
        Ok(self)
    }

    /// Returns `true` if `opcode` has an entry of either kind.
    pub fn contains(&self, opcode: Opcode) -> bool {
        self.entries.contains_key(&opcode)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs the handler for `frame` and returns its reply frame, if any.
    pub fn dispatch(&self, ctx: &mut Ctx, frame: Frame) -> Result<Option<Frame>, E> {
        let Frame { data, handles } = frame;
        let mut r = Reader::new(&data, handles);
        let opcode = Opcode::from_raw(r.read::<u32>()?);
        if opcode == Opcode::RETURN {
            return Err(DispatchError::UnexpectedReply.into());
        }
        match self.entries.get(&opcode) {
            Some(Entry::Bound { name, handler }) => {
                log::trace!("vm-ipc: dispatch {name} ({opcode}) len={}", r.remaining());
                handler(ctx, &mut r)
            }
            Some(Entry::Unimplemented { name }) => {
                Err(DispatchError::Unimplemented { opcode, name: *name }.into())
            }
            None => Err(DispatchError::UnrecognizedOpcode(opcode).into()),
        }
    }
}
