// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Minimal game module shipped with the `gamevm` binary.
//!
//! It keeps no rules: it tracks connected clients, mirrors them into the
//! shared client table and answers a `status` console command.

use std::collections::BTreeSet;

use bytemuck::Zeroable;
use vm_abi::{ClientRecord, ENTITYNUM_WORLD, MAX_CLIENTS};

use crate::error::VmResult;
use crate::messages::ConnectVerdict;
use crate::module::GameModule;
use crate::runtime::VmContext;

/// Rule-less game module.
#[derive(Debug, Default)]
pub struct NullGame {
    level_time: i32,
    frames: u64,
    connected: BTreeSet<i32>,
}

impl NullGame {
    /// Level time of the last frame.
    pub fn level_time(&self) -> i32 {
        self.level_time
    }

    /// Frames run since init.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Connected client slots.
    pub fn connected(&self) -> impl Iterator<Item = i32> + '_ {
        self.connected.iter().copied()
    }
}

fn slot(client: i32) -> Option<usize> {
    usize::try_from(client).ok().filter(|slot| *slot < MAX_CLIENTS)
}

impl GameModule for NullGame {
    fn init(vm: &mut VmContext<Self>, level_time: i32, random_seed: i32, restart: bool) -> VmResult<()> {
        log::info!("gamevm: null game init time={level_time} seed={random_seed} restart={restart}");
        vm.game.level_time = level_time;
        vm.game.frames = 0;
        vm.register_cvar("g_motd", "message shown to connecting players", 0, "")?;
        vm.add_command("status")?;

        let world = ENTITYNUM_WORLD as usize;
        if let Some(entity) = vm.game_data_mut().entity_mut(world) {
            entity.number = ENTITYNUM_WORLD;
        }
        vm.locate_game_data(MAX_CLIENTS)?;
        vm.print("null game ready\n")
    }

    fn shutdown(vm: &mut VmContext<Self>, _restart: bool) -> VmResult<()> {
        vm.remove_command("status")?;
        vm.game.connected.clear();
        Ok(())
    }

    fn client_connect(
        vm: &mut VmContext<Self>,
        client: i32,
        _first_time: bool,
        _is_bot: bool,
    ) -> VmResult<ConnectVerdict> {
        let Some(index) = slot(client) else {
            return Ok(ConnectVerdict::Denied(format!("invalid client slot {client}")));
        };
        if let Some(record) = vm.game_data_mut().client_mut(index) {
            record.client_num = client;
        }
        vm.game.connected.insert(client);
        Ok(ConnectVerdict::Allowed)
    }

    fn client_disconnect(vm: &mut VmContext<Self>, client: i32) -> VmResult<()> {
        if let Some(index) = slot(client) {
            if let Some(record) = vm.game_data_mut().client_mut(index) {
                *record = ClientRecord::zeroed();
            }
        }
        vm.game.connected.remove(&client);
        Ok(())
    }

    fn client_command(vm: &mut VmContext<Self>, client: i32, command: &str) -> VmResult<()> {
        match command.split_once(' ') {
            Some(("say", text)) => vm.send_server_command(-1, &format!("print \"{client}: {text}\n\""))?,
            _ => vm.send_server_command(client, &format!("print \"unknown command {command}\n\""))?,
        };
        Ok(())
    }

    fn run_frame(vm: &mut VmContext<Self>, level_time: i32) -> VmResult<()> {
        vm.game.level_time = level_time;
        vm.game.frames += 1;
        Ok(())
    }

    fn console_command(vm: &mut VmContext<Self>, args: &[String]) -> VmResult<()> {
        match args.first().map(String::as_str) {
            Some("status") => {
                let line = format!(
                    "{} clients, level time {}, {} frames\n",
                    vm.game.connected.len(),
                    vm.game.level_time,
                    vm.game.frames
                );
                vm.print(&line)
            }
            _ => vm.print("unknown command\n"),
        }
    }
}
