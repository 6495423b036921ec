// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Version handshake and the first typed call, byte for byte
//! INTENT: A host only talks to a VM announcing its ABI version; replies carry the RETURN tag

use gamevm::messages::GameClientConnect;
use gamevm::{ConnectVerdict, HostError, NullGame, VmError};
use gamevm_e2e::{accept, host_handlers, spawn_vm, HostState, TestHost};
use vm_abi::{Opcode, GAME_API_VERSION};
use vm_ipc::message::encode_call;
use vm_ipc::{loopback_pair, Channel, Frame, IpcError};

#[test]
fn vm_announces_version_first() {
    let (host, vm) = spawn_vm(NullGame::default());
    let first = host.recv().expect("version frame");
    assert_eq!(first.data, GAME_API_VERSION.to_le_bytes());
    assert!(first.handles.is_empty());

    drop(host);
    let result = vm.join().expect("vm thread");
    assert!(matches!(result, Err(VmError::Transport(IpcError::PeerClosed))));
}

#[test]
fn host_rejects_foreign_version_before_any_call() {
    let (host_end, vm_end) = loopback_pair();
    vm_end.send(Frame::bytes(0x0001_0002u32.to_le_bytes().to_vec())).expect("announce");

    let err = TestHost::accept(Box::new(host_end), HostState::default(), host_handlers())
        .err()
        .expect("mismatch must be rejected");
    assert!(matches!(
        err,
        HostError::VersionMismatch { expected: GAME_API_VERSION, found: 0x0001_0002 }
    ));

    // The host end is gone and no opcode was ever sent.
    assert!(matches!(vm_end.recv(), Err(IpcError::PeerClosed)));
}

#[test]
fn real_vm_is_rejected_by_newer_host() {
    let (channel, vm) = spawn_vm(NullGame::default());
    let err = TestHost::accept_version(channel, GAME_API_VERSION + 1, HostState::default(), host_handlers())
        .err()
        .expect("mismatch must be rejected");
    assert!(matches!(err, HostError::VersionMismatch { found: GAME_API_VERSION, .. }));

    let result = vm.join().expect("vm thread");
    assert!(matches!(result, Err(VmError::Transport(IpcError::PeerClosed))));
}

#[test]
fn allowed_connect_reply_is_return_tag_and_zero() {
    let (host, vm) = spawn_vm(NullGame::default());
    host.recv().expect("version frame");

    host.send(encode_call::<GameClientConnect>(&(3, true, 0)).expect("encode")).expect("send");
    let reply = host.recv().expect("reply");
    assert_eq!(reply.data, [0xFF, 0xFF, 0xFF, 0xFF, 0x00]);
    assert_eq!(&reply.data[..4], Opcode::RETURN.raw().to_le_bytes());

    drop(host);
    vm.join().expect("vm thread").expect_err("peer closed");
}

#[test]
fn denied_connect_carries_reason() {
    let (channel, vm) = spawn_vm(NullGame::default());
    let mut host = accept(channel, HostState::default());

    let verdict = host.call::<GameClientConnect>(&(9999, true, 0)).expect("connect");
    assert!(matches!(verdict, ConnectVerdict::Denied(reason) if reason.contains("9999")));
    let verdict = host.call::<GameClientConnect>(&(0, false, 1)).expect("connect");
    assert_eq!(verdict, ConnectVerdict::Allowed);

    drop(host);
    vm.join().expect("vm thread").expect_err("peer closed");
}
