// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: gamevm entrypoint wiring the inherited root channel to the runtime
//! Game VM process: `gamevm [handle]`, or the handle in `ROOT_SOCKET`.

use std::process::ExitCode;

use env_logger::{Env, Target};
use log::error;

use gamevm::config::LOG_ENV;
use gamevm::{BootstrapConfig, NullGame, VmError, VmResult, VmRuntime};
use vm_ipc::UnixChannel;

fn run() -> VmResult<()> {
    let config = BootstrapConfig::from_process()?;
    // SAFETY: the engine hands this descriptor to us at spawn; nothing else in
    // the process refers to it.
    let channel = unsafe { UnixChannel::from_inherited_fd(config.root_handle) }
        .map_err(|err| VmError::Configuration(format!("root channel: {err}")))?;
    VmRuntime::new(Box::new(channel), NullGame::default()).run()
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().filter_or(LOG_ENV, "info"))
        .target(Target::Stderr)
        .init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        // Written even when the log filter is off; the launcher reads this line.
        Err(err @ VmError::Configuration(_)) => {
            eprintln!("gamevm: {err}");
            ExitCode::from(err.exit_code())
        }
        Err(err) => {
            error!("gamevm: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}
