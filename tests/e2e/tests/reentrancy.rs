// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Nested calls in both directions on one channel
//! INTENT: Each side serves the peer's calls while waiting for its own reply

use gamevm::messages::{ExecuteCommand, GameClientCommand, GameInit, GameRunFrame, GameShutdown};
use gamevm::{GameModule, NullGame, VmContext, VmResult};
use gamevm_e2e::{accept, spawn_vm, HostState};

#[test]
fn init_issues_nested_syscalls() {
    let (channel, vm) = spawn_vm(NullGame::default());
    let mut host = accept(channel, HostState::default());

    host.call::<GameInit>(&(100, 7, false)).expect("init");
    assert_eq!(host.state.prints, ["null game ready\n"]);
    assert!(host.state.commands.contains("status"));
    assert_eq!(host.state.cvars.get("g_motd").map(String::as_str), Some(""));
    assert!(host.game_data().is_some());

    host.call::<GameShutdown>(&false).expect("shutdown");
    assert!(host.state.commands.is_empty());

    drop(host);
    vm.join().expect("vm thread").expect_err("peer closed");
}

#[test]
fn host_calls_back_into_vm_during_a_syscall() {
    let (channel, vm) = spawn_vm(NullGame::default());
    let state = HostState::executing_on_print(vec!["status".into()]);
    let mut host = accept(channel, state);

    // GameInit -> Print (nested) -> ExecuteCommand (nested) -> Print (nested).
    host.call::<GameInit>(&(100, 7, false)).expect("init");
    assert_eq!(host.state.prints, ["null game ready\n", "0 clients, level time 100, 0 frames\n"]);

    host.call::<GameRunFrame>(&150).expect("frame");
    host.call::<ExecuteCommand>(&vec!["status".to_owned()]).expect("status");
    assert_eq!(host.state.prints.last().map(String::as_str), Some("0 clients, level time 150, 1 frames\n"));

    drop(host);
    vm.join().expect("vm thread").expect_err("peer closed");
}

#[test]
fn unregistered_console_command_is_ignored() {
    let (channel, vm) = spawn_vm(NullGame::default());
    let mut host = accept(channel, HostState::default());

    host.call::<ExecuteCommand>(&vec!["kick".to_owned(), "all".to_owned()]).expect("execute");
    assert!(host.state.prints.is_empty());

    drop(host);
    vm.join().expect("vm thread").expect_err("peer closed");
}

/// Reads a configstring the host sets from inside the VM's own call.
#[derive(Default)]
struct Relay {
    seen: Vec<String>,
}

impl GameModule for Relay {
    fn init(vm: &mut VmContext<Self>, _level_time: i32, _seed: i32, _restart: bool) -> VmResult<()> {
        vm.set_configstring(5, "relay")?;
        let value = vm.get_configstring(5, 64)?;
        vm.game.seen.push(value);
        Ok(())
    }

    fn run_frame(vm: &mut VmContext<Self>, _level_time: i32) -> VmResult<()> {
        let summary = vm.game.seen.join(",");
        vm.print(&summary)
    }
}

#[test]
fn values_round_trip_through_host_state() {
    let (channel, vm) = spawn_vm(Relay::default());
    let mut host = accept(channel, HostState::default());

    host.call::<GameInit>(&(0, 0, false)).expect("init");
    assert_eq!(host.state.configstrings.get(&5).map(String::as_str), Some("relay"));
    host.call::<GameRunFrame>(&50).expect("frame");
    assert_eq!(host.state.prints, ["relay"]);

    drop(host);
    vm.join().expect("vm thread").expect_err("peer closed");
}

#[test]
fn client_commands_reach_the_host_as_server_commands() {
    let (channel, vm) = spawn_vm(NullGame::default());
    let mut host = accept(channel, HostState::default());

    host.call::<GameClientCommand>(&(2, "say hello".to_owned())).expect("say");
    host.call::<GameClientCommand>(&(2, "dance".to_owned())).expect("dance");
    assert_eq!(
        host.state.server_commands,
        [(-1, "print \"2: hello\n\"".to_owned()), (2, "print \"unknown command dance\n\"".to_owned())]
    );

    drop(host);
    vm.join().expect("vm thread").expect_err("peer closed");
}
