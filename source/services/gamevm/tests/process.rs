// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: The gamevm binary as the engine launches it
//! INTENT: Bootstrap failures exit with status 2; an adopted socket speaks the protocol

use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::process::{Command, Stdio};

use gamevm::messages::{ExecuteCommand, GameRunFrame};
use gamevm::HostSession;
use vm_ipc::UnixChannel;

fn gamevm() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_gamevm"));
    cmd.env_remove("ROOT_SOCKET").env("GAMEVM_LOG", "off").stderr(Stdio::null());
    cmd
}

#[test]
fn missing_handle_exits_with_configuration_status() {
    let status = gamevm().status().expect("spawn");
    assert_eq!(status.code(), Some(2));
}

#[test]
fn non_numeric_handle_exits_with_configuration_status() {
    let status = gamevm().env("ROOT_SOCKET", "root").status().expect("spawn");
    assert_eq!(status.code(), Some(2));
}

#[test]
fn bootstrap_diagnostic_ignores_the_log_filter() {
    let output = gamevm().env("ROOT_SOCKET", "root").stderr(Stdio::piped()).output().expect("spawn");
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ROOT_SOCKET does not contain a valid handle"), "stderr: {stderr}");
}

#[test]
fn non_socket_handle_exits_with_configuration_status() {
    let status = gamevm().arg("0").stdin(Stdio::null()).status().expect("spawn");
    assert_eq!(status.code(), Some(2));
}

#[test]
fn adopted_socket_serves_calls_until_host_leaves() {
    let (host_end, vm_end) = UnixStream::pair().expect("socketpair");
    let mut child = gamevm()
        .env("ROOT_SOCKET", "0")
        .stdin(Stdio::from(OwnedFd::from(vm_end)))
        .spawn()
        .expect("spawn");

    let channel = Box::new(UnixChannel::from_stream(host_end));
    let handlers = HostSession::<()>::base_handlers().expect("handlers");
    let mut host = HostSession::accept(channel, (), handlers).expect("handshake");
    host.call::<GameRunFrame>(&50).expect("frame");
    host.call::<ExecuteCommand>(&vec!["unknown".to_owned()]).expect("ignored command");
    drop(host);

    let status = child.wait().expect("wait");
    assert_eq!(status.code(), Some(1));
}
