// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Fatal paths of the VM and what the host observes
//! INTENT: Every fatal error reaches the host as an error report, then the VM exits

use gamevm::messages::{GameClientCommand, GameInit, GameRunFrame};
use gamevm::{GameModule, HostError, NullGame, VmContext, VmError, VmResult};
use gamevm_e2e::{accept, spawn_vm, HostState};
use vm_abi::{game, Opcode};
use vm_ipc::{Channel, Frame, Message, Request};

enum SnapshotCallback {}

impl Message for SnapshotCallback {
    const OPCODE: Opcode = game::SNAPSHOT_CALLBACK;
    const NAME: &'static str = "GAME_SNAPSHOT_CALLBACK";
    type Args = i32;
    type Reply = ();
}

impl Request for SnapshotCallback {}

#[test]
fn unimplemented_game_call_is_fatal() {
    let (channel, vm) = spawn_vm(NullGame::default());
    let mut host = accept(channel, HostState::default());

    let err = host.call::<SnapshotCallback>(&0).expect_err("vm must fail");
    assert!(matches!(&err, HostError::VmFatal(text) if text.contains("GAME_SNAPSHOT_CALLBACK")), "{err}");

    let result = vm.join().expect("vm thread");
    assert!(matches!(
        result,
        Err(VmError::UnimplementedOperation { opcode: game::SNAPSHOT_CALLBACK, .. })
    ));
}

#[test]
fn unknown_opcode_is_fatal() {
    let (channel, vm) = spawn_vm(NullGame::default());
    channel.recv().expect("version frame");
    channel.send(Frame::bytes(Opcode::new(0x7f, 3).raw().to_le_bytes().to_vec())).expect("send");

    let report = channel.recv().expect("error report");
    assert_eq!(&report.data[..4], gamevm::messages::ErrorMsg::OPCODE.raw().to_le_bytes());

    let result = vm.join().expect("vm thread");
    let err = result.expect_err("fatal");
    assert!(matches!(err, VmError::UnrecognizedOpcode(op) if op == Opcode::new(0x7f, 3)));
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn truncated_payload_is_fatal() {
    let (channel, vm) = spawn_vm(NullGame::default());
    channel.recv().expect("version frame");
    // GameInit wants (i32, i32, bool); send only the first field.
    let mut data = game::INIT.raw().to_le_bytes().to_vec();
    data.extend_from_slice(&5i32.to_le_bytes());
    channel.send(Frame::bytes(data)).expect("send");

    channel.recv().expect("error report");
    let err = vm.join().expect("vm thread").expect_err("fatal");
    assert!(matches!(err, VmError::MalformedMessage(_)), "{err}");
}

/// Fails on the second frame.
#[derive(Default)]
struct Fragile {
    frames: u32,
}

impl GameModule for Fragile {
    fn init(_vm: &mut VmContext<Self>, _level_time: i32, _seed: i32, _restart: bool) -> VmResult<()> {
        Ok(())
    }

    fn run_frame(vm: &mut VmContext<Self>, _level_time: i32) -> VmResult<()> {
        vm.game.frames += 1;
        if vm.game.frames > 1 {
            return Err(vm.error("entity table corrupted"));
        }
        Ok(())
    }
}

#[test]
fn game_error_reports_and_exits_cleanly() {
    let (channel, vm) = spawn_vm(Fragile::default());
    let mut host = accept(channel, HostState::default());

    host.call::<GameInit>(&(0, 0, false)).expect("init");
    host.call::<GameRunFrame>(&50).expect("first frame");
    let err = host.call::<GameRunFrame>(&100).expect_err("second frame");
    assert!(matches!(&err, HostError::VmFatal(text) if text == "entity table corrupted"), "{err}");
    assert_eq!(host.vm_error(), Some("entity table corrupted"));

    vm.join().expect("vm thread").expect("explicit exit is a clean stop");
}

#[test]
fn oversized_server_command_is_dropped() {
    let (channel, vm) = spawn_vm(NullGame::default());
    let mut host = accept(channel, HostState::default());

    let long = format!("say {}", "x".repeat(2000));
    host.call::<GameClientCommand>(&(1, long)).expect("oversized say");
    assert!(host.state.server_commands.is_empty());

    host.call::<GameClientCommand>(&(1, "say short".to_owned())).expect("short say");
    assert_eq!(host.state.server_commands.len(), 1);

    drop(host);
    vm.join().expect("vm thread").expect_err("peer closed");
}
