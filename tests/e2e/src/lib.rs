// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared harness for the game VM end-to-end tests: a VM thread on one end of a
//! channel and a recording host on the other.

#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use gamevm::messages::{
    AddCommand, ExecuteCommand, FsFCloseFile, FsFOpenFile, FsMode, FsRead, FsWrite, GetConfigString,
    GetCvar, Milliseconds, Print, RegisterCvar, RemoveCommand, SendServerCommand, SetConfigString,
    SetCvar,
};
use gamevm::{GameModule, HostError, HostSession, VmResult, VmRuntime};
use vm_ipc::{loopback_pair, Blob, Channel, HandlerTable, RegistryError, UnixChannel};

/// What the fake engine saw and serves.
#[derive(Default)]
pub struct HostState {
    /// Print calls, in order.
    pub prints: Vec<String>,
    /// Reliable commands as `(client, text)`.
    pub server_commands: Vec<(i32, String)>,
    /// Configstrings by index.
    pub configstrings: BTreeMap<i32, String>,
    /// Console commands the VM registered.
    pub commands: BTreeSet<String>,
    /// Cvar values.
    pub cvars: HashMap<String, String>,
    /// When set, the host runs this VM command from inside the next print call.
    pub execute_on_print: Option<Vec<String>>,
    /// Root of the fake filesystem.
    pub fs_root: Option<PathBuf>,
    /// Open files by handle.
    pub files: HashMap<i32, File>,
    next_file: i32,
}

impl HostState {
    /// Serves the filesystem syscalls from `root`.
    pub fn with_fs_root(root: impl Into<PathBuf>) -> Self {
        Self { fs_root: Some(root.into()), ..Self::default() }
    }

    /// Runs `args` as a VM command from inside the next print call.
    pub fn executing_on_print(args: Vec<String>) -> Self {
        Self { execute_on_print: Some(args), ..Self::default() }
    }
}

/// Host session type used by every test.
pub type TestHost = HostSession<HostState>;

/// Base handlers plus the console, configstring, cvar and filesystem syscalls.
pub fn host_handlers() -> HandlerTable<TestHost, HostError> {
    let mut table = TestHost::base_handlers().expect("base handlers");
    register_engine(&mut table).expect("register host handlers");
    table
}

fn register_engine(table: &mut HandlerTable<TestHost, HostError>) -> Result<(), RegistryError> {
    table
        .register::<Print, _>(|host, text| {
            host.state.prints.push(text);
            if let Some(args) = host.state.execute_on_print.take() {
                host.call::<ExecuteCommand>(&args)?;
            }
            Ok(())
        })?
        .register::<SendServerCommand, _>(|host, (client, text)| {
            host.state.server_commands.push((client, text));
            Ok(())
        })?
        .register::<SetConfigString, _>(|host, (index, value)| {
            host.state.configstrings.insert(index, value);
            Ok(())
        })?
        .register::<GetConfigString, _>(|host, (index, _buffer_size)| {
            Ok(host.state.configstrings.get(&index).cloned().unwrap_or_default())
        })?
        .register::<AddCommand, _>(|host, name| {
            host.state.commands.insert(name);
            Ok(())
        })?
        .register::<RemoveCommand, _>(|host, name| {
            host.state.commands.remove(&name);
            Ok(())
        })?
        .register::<RegisterCvar, _>(|host, (name, _description, _flags, default)| {
            host.state.cvars.entry(name).or_insert(default);
            Ok(())
        })?
        .register::<GetCvar, _>(|host, name| Ok(host.state.cvars.get(&name).cloned().unwrap_or_default()))?
        .register::<SetCvar, _>(|host, (name, value)| {
            host.state.cvars.insert(name, value);
            Ok(())
        })?
        .register::<Milliseconds, _>(|_, ()| Ok(1234))?
        .register::<FsFOpenFile, _>(|host, (path, open, mode)| fs_open(host, &path, open, mode))?
        .register::<FsWrite, _>(|host, (handle, Blob(data))| {
            let Some(file) = host.state.files.get_mut(&handle) else {
                return Ok(0);
            };
            Ok(file.write(&data).map(|n| n as i32).unwrap_or(-1))
        })?
        .register::<FsRead, _>(|host, (handle, len)| {
            let mut data = vec![0u8; usize::try_from(len).unwrap_or(0)];
            let read = match host.state.files.get_mut(&handle) {
                Some(file) => file.read(&mut data).unwrap_or(0),
                None => 0,
            };
            data.truncate(read);
            Ok(Blob(data))
        })?
        .register::<FsFCloseFile, _>(|host, handle| {
            host.state.files.remove(&handle);
            Ok(())
        })?;
    Ok(())
}

fn fs_open(host: &mut TestHost, path: &str, open: bool, mode: i32) -> Result<(i32, i32), HostError> {
    let Some(root) = host.state.fs_root.clone() else {
        return Ok((-1, 0));
    };
    let full = root.join(path);
    let file = if mode == FsMode::Read as i32 {
        File::open(&full)
    } else {
        OpenOptions::new()
            .write(true)
            .create(true)
            .append(mode != FsMode::Write as i32)
            .truncate(mode == FsMode::Write as i32)
            .open(&full)
    };
    let Ok(file) = file else {
        return Ok((-1, 0));
    };
    let len = file.metadata().map(|m| m.len() as i32).unwrap_or(0);
    if !open {
        return Ok((len, 0));
    }
    host.state.next_file += 1;
    let handle = host.state.next_file;
    host.state.files.insert(handle, file);
    Ok((len, handle))
}

/// Runs `game` on a loopback channel in a new thread; returns the host end.
pub fn spawn_vm<G: GameModule + Send>(game: G) -> (Box<dyn Channel>, JoinHandle<VmResult<()>>) {
    let (host_end, vm_end) = loopback_pair();
    let vm = thread::spawn(move || VmRuntime::new(Box::new(vm_end), game).run());
    (Box::new(host_end), vm)
}

/// Runs `game` over a Unix socketpair in a new thread; returns the host end.
pub fn spawn_vm_unix<G: GameModule + Send>(game: G) -> (Box<dyn Channel>, JoinHandle<VmResult<()>>) {
    let (host_end, vm_end) = UnixChannel::pair().expect("socketpair");
    let vm = thread::spawn(move || VmRuntime::new(Box::new(vm_end), game).run());
    (Box::new(host_end), vm)
}

/// Accepts the VM on `channel` with the recording handlers.
pub fn accept(channel: Box<dyn Channel>, state: HostState) -> TestHost {
    TestHost::accept(channel, state, host_handlers()).expect("handshake")
}
