// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: File syscalls served by a host backed by a temporary directory
//! INTENT: Handles, lengths and byte payloads survive the trip in both directions

use gamevm::messages::{FsMode, GameInit, GameRunFrame};
use gamevm::{GameModule, VmContext, VmResult};
use gamevm_e2e::{accept, spawn_vm, HostState};

/// Writes a score file on init and reads it back every frame.
#[derive(Default)]
struct Scorekeeper;

impl GameModule for Scorekeeper {
    fn init(vm: &mut VmContext<Self>, _level_time: i32, _seed: i32, _restart: bool) -> VmResult<()> {
        let (_, handle) = vm.fs_fopen("scores.txt", FsMode::Write, true)?;
        let Some(handle) = handle else {
            return Err(vm.error("no handle for scores.txt"));
        };
        let written = vm.fs_write(handle, b"red 3 blue 1\n")?;
        vm.fs_fclose(handle)?;
        vm.print(&format!("wrote {written}\n"))
    }

    fn run_frame(vm: &mut VmContext<Self>, _level_time: i32) -> VmResult<()> {
        let (len, handle) = vm.fs_fopen("scores.txt", FsMode::Read, true)?;
        let Some(handle) = handle.filter(|_| len >= 0) else {
            return vm.print("missing\n");
        };
        let bytes = vm.fs_read(handle, len as usize)?;
        vm.fs_fclose(handle)?;
        vm.print(&String::from_utf8_lossy(&bytes))
    }
}

#[test]
fn files_written_by_the_vm_are_read_back() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (channel, vm) = spawn_vm(Scorekeeper);
    let state = HostState::with_fs_root(dir.path());
    let mut host = accept(channel, state);

    host.call::<GameInit>(&(0, 0, false)).expect("init");
    assert_eq!(std::fs::read_to_string(dir.path().join("scores.txt")).expect("file"), "red 3 blue 1\n");

    host.call::<GameRunFrame>(&50).expect("frame");
    assert_eq!(host.state.prints, ["wrote 13\n", "red 3 blue 1\n"]);
    assert!(host.state.files.is_empty());

    drop(host);
    vm.join().expect("vm thread").expect_err("peer closed");
}

#[test]
fn missing_file_reports_negative_length() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (channel, vm) = spawn_vm(Scorekeeper);
    let state = HostState::with_fs_root(dir.path());
    let mut host = accept(channel, state);

    host.call::<GameRunFrame>(&50).expect("frame");
    assert_eq!(host.state.prints, ["missing\n"]);

    drop(host);
    vm.join().expect("vm thread").expect_err("peer closed");
}
