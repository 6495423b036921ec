// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Game VM runtime: the process side of the host <-> game module boundary
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests per module + tests/e2e
//!
//! PUBLIC API:
//!   - VmRuntime: handshake + serving loop over any `vm_ipc::Channel`
//!   - VmContext: per-process state and the outbound trap surface
//!   - GameModule: game-rule collaborator trait (NullGame ships with the binary)
//!   - GameData: typed entity/client views over the shared region
//!   - HostSession: engine-side harness used by tests and tooling
//!   - BootstrapConfig: ROOT_SOCKET / argv handle resolution
//!
//! DEPENDENCIES:
//!   - vm-ipc: codec, channels, shared memory, dispatcher
//!   - vm-abi: opcodes, ABI version, record layouts
//!   - bytemuck: record views over raw region bytes
//!   - log / env_logger: diagnostics on stderr
//!
//! ADR: docs/adr/0003-ipc-runtime-architecture.md

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

pub mod config;
pub mod error;
pub mod game_data;
pub mod host;
pub mod messages;
pub mod module;
pub mod null_game;
pub mod runtime;
pub mod trap;

pub use config::BootstrapConfig;
pub use error::{VmError, VmResult};
pub use game_data::GameData;
pub use host::{HostError, HostSession};
pub use messages::ConnectVerdict;
pub use module::GameModule;
pub use null_game::NullGame;
pub use runtime::{RuntimeState, VmContext, VmRuntime};
