// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Game-rule collaborator plugged into the runtime.

use crate::error::VmResult;
use crate::messages::ConnectVerdict;
use crate::runtime::VmContext;

/// Game logic driven by the host through the runtime.
///
/// Methods are associated functions taking the whole [`VmContext`]: the module's
/// own state lives in `vm.game`, and the same context carries the outbound trap
/// surface, so a handler can call back into the host while holding its state.
/// Returning `Err(vm.error(..))` reports a fatal error to the host and exits.
pub trait GameModule: Sized + 'static {
    /// Level start.
    fn init(vm: &mut VmContext<Self>, level_time: i32, random_seed: i32, restart: bool) -> VmResult<()>;

    /// Level end.
    fn shutdown(_vm: &mut VmContext<Self>, _restart: bool) -> VmResult<()> {
        Ok(())
    }

    /// Connection attempt; `is_bot` for server-side bots.
    fn client_connect(
        _vm: &mut VmContext<Self>,
        _client: i32,
        _first_time: bool,
        _is_bot: bool,
    ) -> VmResult<ConnectVerdict> {
        Ok(ConnectVerdict::Allowed)
    }

    /// Client finished loading and enters the world.
    fn client_begin(_vm: &mut VmContext<Self>, _client: i32) -> VmResult<()> {
        Ok(())
    }

    /// Client userinfo string changed.
    fn client_userinfo_changed(_vm: &mut VmContext<Self>, _client: i32) -> VmResult<()> {
        Ok(())
    }

    /// Client left or was dropped.
    fn client_disconnect(_vm: &mut VmContext<Self>, _client: i32) -> VmResult<()> {
        Ok(())
    }

    /// Client sent a command line.
    fn client_command(_vm: &mut VmContext<Self>, _client: i32, _command: &str) -> VmResult<()> {
        Ok(())
    }

    /// Client input is ready to be simulated.
    fn client_think(_vm: &mut VmContext<Self>, _client: i32) -> VmResult<()> {
        Ok(())
    }

    /// One server frame.
    fn run_frame(vm: &mut VmContext<Self>, level_time: i32) -> VmResult<()>;

    /// Host ran a console command registered with [`VmContext::add_command`].
    fn console_command(vm: &mut VmContext<Self>, args: &[String]) -> VmResult<()> {
        let name = args.first().map(String::as_str).unwrap_or_default();
        vm.print(&format!("unhandled command {name}\n"))
    }
}
