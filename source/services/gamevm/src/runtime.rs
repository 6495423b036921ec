// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: VM process runtime: handshake, handler table, serving loop
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests (loopback) + tests/e2e
//!
//! STATES:
//!   - Handshaking: send GAME_API_VERSION, allocate the shared region, build the table
//!   - Serving: receive one opcode, dispatch it (nested calls included), reply
//!   - Terminated: `VmError::Exit` from any depth, or a fatal transport/protocol error
//!
//! All process-wide state (channel, table, region, caches) lives in one
//! `VmContext` handed by `&mut` to every handler.

use std::collections::{BTreeSet, HashMap};
use std::mem;
use std::rc::Rc;

use log::{info, warn};
use vm_abi::{game, GAME_API_VERSION};
use vm_ipc::rpc::{self, Endpoint};
use vm_ipc::{Channel, Frame, HandlerTable};

use crate::error::{VmError, VmResult};
use crate::game_data::GameData;
use crate::messages::{
    CvarOnValueChanged, ErrorMsg, ExecuteCommand, GameClientBegin, GameClientCommand,
    GameClientConnect, GameClientDisconnect, GameClientThink, GameClientUserinfoChanged,
    GameInit, GameRunFrame, GameShutdown,
};
use crate::module::GameModule;

/// Observable phase of a [`VmRuntime`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuntimeState {
    /// Version not sent yet.
    Handshaking,
    /// Dispatching host calls.
    Serving,
    /// Loop ended; the process should exit.
    Terminated,
}

/// Per-process state shared by every handler.
pub struct VmContext<G: GameModule> {
    channel: Box<dyn Channel>,
    handlers: Rc<HandlerTable<VmContext<G>, VmError>>,
    pub(crate) game_data: GameData,
    pub(crate) region_announced: bool,
    pub(crate) error_reported: bool,
    pub(crate) cvars: HashMap<String, String>,
    pub(crate) commands: BTreeSet<String>,
    /// Game module state.
    pub game: G,
}

impl<G: GameModule> VmContext<G> {
    /// Shared entity/client tables.
    pub fn game_data(&self) -> &GameData {
        &self.game_data
    }

    /// Shared entity/client tables, writable.
    pub fn game_data_mut(&mut self) -> &mut GameData {
        &mut self.game_data
    }

    /// Returns `true` once the region handle has been sent to the host.
    pub fn region_announced(&self) -> bool {
        self.region_announced
    }

    /// Last value seen for a registered cvar.
    pub fn cached_cvar(&self, name: &str) -> Option<&str> {
        self.cvars.get(name).map(String::as_str)
    }

    /// Console commands currently registered with the host.
    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().map(String::as_str)
    }

    fn execute_command(&mut self, args: Vec<String>) -> VmResult<()> {
        let Some(name) = args.first() else {
            return Err(VmError::MalformedMessage("command execution without a name".into()));
        };
        if !self.commands.contains(name) {
            warn!("gamevm: host executed unregistered command {name}");
            return Ok(());
        }
        G::console_command(self, &args)
    }

    fn cvar_changed(&mut self, name: String, value: String) {
        log::debug!("gamevm: cvar {name} = {value:?}");
        self.cvars.insert(name, value);
    }

    /// Tells the host why the VM is about to die, once.
    fn report_fatal(&mut self, err: &VmError) {
        if self.error_reported || err.is_exit() || matches!(err, VmError::Transport(_)) {
            return;
        }
        self.error_reported = true;
        if let Err(send_err) = rpc::post::<_, ErrorMsg>(&*self, &err.to_string()) {
            warn!("gamevm: could not report fatal error: {send_err}");
        }
    }
}

impl<G: GameModule> Endpoint for VmContext<G> {
    type Error = VmError;

    fn channel(&self) -> &dyn Channel {
        &*self.channel
    }

    fn handlers(&self) -> Rc<HandlerTable<Self, VmError>> {
        Rc::clone(&self.handlers)
    }
}

/// Builds the inbound table: game family, common families, known-unimplemented opcodes.
pub fn build_handlers<G: GameModule>() -> VmResult<HandlerTable<VmContext<G>, VmError>> {
    let mut table: HandlerTable<VmContext<G>, VmError> = HandlerTable::new();
    table
        .register::<GameInit, _>(|vm, (level_time, seed, restart)| G::init(vm, level_time, seed, restart))?
        .register::<GameShutdown, _>(|vm, restart| G::shutdown(vm, restart))?
        .register::<GameClientConnect, _>(|vm, (client, first_time, is_bot)| {
            G::client_connect(vm, client, first_time, is_bot != 0)
        })?
        .register::<GameClientBegin, _>(|vm, client| G::client_begin(vm, client))?
        .register::<GameClientUserinfoChanged, _>(|vm, client| G::client_userinfo_changed(vm, client))?
        .register::<GameClientDisconnect, _>(|vm, client| G::client_disconnect(vm, client))?
        .register::<GameClientCommand, _>(|vm, (client, command)| G::client_command(vm, client, &command))?
        .register::<GameClientThink, _>(|vm, client| G::client_think(vm, client))?
        .register::<GameRunFrame, _>(|vm, level_time| G::run_frame(vm, level_time))?
        .register::<ExecuteCommand, _>(|vm, args| vm.execute_command(args))?
        .register::<CvarOnValueChanged, _>(|vm, (name, value)| {
            vm.cvar_changed(name, value);
            Ok(())
        })?
        .register_unimplemented(game::SNAPSHOT_CALLBACK, "GAME_SNAPSHOT_CALLBACK")?
        .register_unimplemented(game::BOTAI_START_FRAME, "BOTAI_START_FRAME")?
        .register_unimplemented(game::MESSAGE_RECEIVED, "GAME_MESSAGERECEIVED")?;
    Ok(table)
}

enum Phase<G: GameModule> {
    Handshaking { channel: Box<dyn Channel>, game: G },
    Serving(VmContext<G>),
    Terminated,
}

/// The VM side of one host connection.
pub struct VmRuntime<G: GameModule> {
    phase: Phase<G>,
}

impl<G: GameModule> VmRuntime<G> {
    /// Runtime that will speak over `channel` and drive `game`.
    pub fn new(channel: Box<dyn Channel>, game: G) -> Self {
        Self { phase: Phase::Handshaking { channel, game } }
    }

    /// Current phase.
    pub fn state(&self) -> RuntimeState {
        match self.phase {
            Phase::Handshaking { .. } => RuntimeState::Handshaking,
            Phase::Serving(_) => RuntimeState::Serving,
            Phase::Terminated => RuntimeState::Terminated,
        }
    }

    /// The serving context, once the handshake is done.
    pub fn context(&self) -> Option<&VmContext<G>> {
        match &self.phase {
            Phase::Serving(ctx) => Some(ctx),
            _ => None,
        }
    }

    /// The serving context, writable.
    pub fn context_mut(&mut self) -> Option<&mut VmContext<G>> {
        match &mut self.phase {
            Phase::Serving(ctx) => Some(ctx),
            _ => None,
        }
    }

    /// Handshaking -> Serving.
    ///
    /// Announces the ABI version, then allocates the shared region and builds
    /// the handler table. A no-op outside `Handshaking`.
    pub fn handshake(&mut self) -> VmResult<()> {
        let Phase::Handshaking { channel, game } = mem::replace(&mut self.phase, Phase::Terminated) else {
            return Ok(());
        };
        channel.send(Frame::bytes(GAME_API_VERSION.to_le_bytes().to_vec()))?;
        let game_data = GameData::allocate()?;
        let handlers = Rc::new(build_handlers::<G>()?);
        info!(
            "gamevm: serving api {GAME_API_VERSION:#010x}, region {} bytes, {} handlers",
            game_data.layout().total_len(),
            handlers.len()
        );
        self.phase = Phase::Serving(VmContext {
            channel,
            handlers,
            game_data,
            region_announced: false,
            error_reported: false,
            cvars: HashMap::new(),
            commands: BTreeSet::new(),
            game,
        });
        Ok(())
    }

    /// Receives and dispatches exactly one host call.
    pub fn serve_one(&mut self) -> VmResult<()> {
        let Phase::Serving(ctx) = &mut self.phase else {
            return Err(VmError::Transport(vm_ipc::IpcError::PeerClosed));
        };
        match rpc::handle_incoming(ctx) {
            Ok(()) => Ok(()),
            Err(err) => {
                ctx.report_fatal(&err);
                self.phase = Phase::Terminated;
                Err(err)
            }
        }
    }

    fn serve_forever(&mut self) -> VmResult<()> {
        loop {
            self.serve_one()?;
        }
    }

    /// Runs until exit. `Ok` for an explicit exit, `Err` for any fatal error.
    pub fn run(mut self) -> VmResult<()> {
        let result = self.handshake().and_then(|()| self.serve_forever());
        self.phase = Phase::Terminated;
        match result {
            Err(VmError::Exit) => {
                info!("gamevm: exit requested");
                Ok(())
            }
            other => other,
        }
    }
}
