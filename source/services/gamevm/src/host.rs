// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Engine-side session harness for driving a VM
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable (tests and tooling)
//! TEST_COVERAGE: tests/e2e
//!
//! PUBLIC API:
//!   - HostSession::accept(): read and check the VM's version announcement
//!   - HostSession::base_handlers(): region announcements and error reports
//!   - HostSession::call::<M>(): typed call into the VM, serving nested syscalls
//!
//! Callers extend `base_handlers()` with the syscalls their test needs before
//! accepting; anything else the VM calls is an unrecognized opcode.

use std::rc::Rc;

use log::{error, info};
use thiserror::Error;
use vm_abi::{ShmLayout, GAME_API_VERSION, MAX_CLIENTS, MAX_GENTITIES};
use vm_ipc::rpc::{self, Endpoint};
use vm_ipc::{
    Channel, DispatchError, HandlerTable, IpcError, Reader, RegistryError, Request, SharedMemory,
    WireError,
};

use crate::game_data::GameData;
use crate::messages::{ErrorMsg, LocateGameData1, LocateGameData2};

/// Failures seen by the host side of a session.
#[derive(Debug, Error)]
pub enum HostError {
    /// VM announced a different ABI version.
    #[error("api version mismatch: expected {expected:#010x}, found {found:#010x}")]
    VersionMismatch {
        /// Version the host speaks.
        expected: u32,
        /// Version the VM announced.
        found: u32,
    },
    /// Channel failure.
    #[error("ipc: {0}")]
    Ipc(#[from] IpcError),
    /// Payload shape mismatch.
    #[error("malformed payload: {0}")]
    Malformed(#[from] WireError),
    /// VM called an opcode the host does not serve.
    #[error("dispatch: {0}")]
    Dispatch(#[from] DispatchError),
    /// Handler table could not be built.
    #[error("registry: {0}")]
    Registry(#[from] RegistryError),
    /// Announced region does not match the host's record layout.
    #[error("shared region mismatch: {0}")]
    LayoutMismatch(String),
    /// VM reported a fatal error and exited.
    #[error("vm error: {0}")]
    VmFatal(String),
}

/// Host end of one VM connection.
pub struct HostSession<S: 'static> {
    channel: Box<dyn Channel>,
    handlers: Rc<HandlerTable<HostSession<S>, HostError>>,
    game_data: Option<GameData>,
    active_entities: usize,
    vm_error: Option<String>,
    /// Test or tool state reachable from handlers.
    pub state: S,
}

impl<S: 'static> Endpoint for HostSession<S> {
    type Error = HostError;

    fn channel(&self) -> &dyn Channel {
        &*self.channel
    }

    fn handlers(&self) -> Rc<HandlerTable<Self, HostError>> {
        Rc::clone(&self.handlers)
    }
}

fn record_size(value: i32) -> Result<usize, HostError> {
    usize::try_from(value).map_err(|_| HostError::LayoutMismatch(format!("negative record size {value}")))
}

fn entity_count(value: i32) -> Result<usize, HostError> {
    usize::try_from(value)
        .ok()
        .filter(|count| *count <= MAX_GENTITIES)
        .ok_or_else(|| HostError::LayoutMismatch(format!("entity count {value} out of range")))
}

impl<S: 'static> HostSession<S> {
    /// Table with the handlers every session needs.
    pub fn base_handlers() -> Result<HandlerTable<Self, HostError>, HostError> {
        let mut table: HandlerTable<Self, HostError> = HandlerTable::new();
        table
            .register::<LocateGameData1, _>(|host, (handle, count, entity_size, client_size)| {
                let layout =
                    ShmLayout::new(MAX_GENTITIES, record_size(entity_size)?, MAX_CLIENTS, record_size(client_size)?);
                let count = entity_count(count)?;
                let region = SharedMemory::from_handle(handle)?;
                let data = GameData::from_region(region, layout)
                    .map_err(|err| HostError::LayoutMismatch(err.to_string()))?;
                info!("host: mapped game data, {count} active entities, clients at {:#x}", layout.client_offset());
                host.game_data = Some(data);
                host.active_entities = count;
                Ok(())
            })?
            .register::<LocateGameData2, _>(|host, (count, entity_size, client_size)| {
                let Some(data) = &host.game_data else {
                    return Err(HostError::LayoutMismatch("region was never announced".into()));
                };
                let layout = data.layout();
                if layout.entity_size != record_size(entity_size)? || layout.client_size != record_size(client_size)? {
                    return Err(HostError::LayoutMismatch("record sizes changed after announcement".into()));
                }
                host.active_entities = entity_count(count)?;
                Ok(())
            })?
            .register_one_way::<ErrorMsg, _>(|host, text| {
                error!("host: vm reported: {text}");
                host.vm_error = Some(text);
                Ok(())
            })?;
        Ok(table)
    }

    /// Accepts a VM speaking [`GAME_API_VERSION`].
    pub fn accept(
        channel: Box<dyn Channel>,
        state: S,
        handlers: HandlerTable<Self, HostError>,
    ) -> Result<Self, HostError> {
        Self::accept_version(channel, GAME_API_VERSION, state, handlers)
    }

    /// Reads the version announcement and rejects anything but `expected`.
    pub fn accept_version(
        channel: Box<dyn Channel>,
        expected: u32,
        state: S,
        handlers: HandlerTable<Self, HostError>,
    ) -> Result<Self, HostError> {
        let frame = channel.recv()?;
        let mut r = Reader::new(&frame.data, frame.handles);
        let found = r.read::<u32>()?;
        r.finish()?;
        if found != expected {
            error!("host: rejecting vm, {}", HostError::VersionMismatch { expected, found });
            return Err(HostError::VersionMismatch { expected, found });
        }
        Ok(Self {
            channel,
            handlers: Rc::new(handlers),
            game_data: None,
            active_entities: 0,
            vm_error: None,
            state,
        })
    }

    /// Calls into the VM, serving its nested syscalls until the reply arrives.
    pub fn call<M: Request>(&mut self, args: &M::Args) -> Result<M::Reply, HostError> {
        let result = rpc::call::<_, M>(self, args);
        match (result, &self.vm_error) {
            (Err(HostError::Ipc(IpcError::PeerClosed)), Some(message)) => {
                Err(HostError::VmFatal(message.clone()))
            }
            (result, _) => result,
        }
    }

    /// Serves one VM-initiated frame.
    pub fn serve_one(&mut self) -> Result<(), HostError> {
        rpc::handle_incoming(self)
    }

    /// Region mapped from the VM's announcement.
    pub fn game_data(&self) -> Option<&GameData> {
        self.game_data.as_ref()
    }

    /// Entity count from the latest announcement.
    pub fn active_entities(&self) -> usize {
        self.active_entities
    }

    /// Last fatal error the VM reported.
    pub fn vm_error(&self) -> Option<&str> {
        self.vm_error.as_deref()
    }
}
