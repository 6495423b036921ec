// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Process bootstrap configuration
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests
//!
//! SOURCES (first match wins):
//!   - argv[1]: decimal channel handle
//!   - ROOT_SOCKET: decimal channel handle
//!   - GAMEVM_LOG: env_logger filter (read by the binary, default `info`)

use std::os::fd::RawFd;

use crate::error::{VmError, VmResult};

/// Environment variable carrying the channel handle.
pub const ROOT_SOCKET_ENV: &str = "ROOT_SOCKET";

/// Environment variable carrying the log filter.
pub const LOG_ENV: &str = "GAMEVM_LOG";

/// Where the channel handle came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleSource {
    /// First command-line argument.
    Argument,
    /// [`ROOT_SOCKET_ENV`].
    Environment,
}

/// Startup parameters of the VM process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BootstrapConfig {
    /// Inherited descriptor of the root channel.
    pub root_handle: RawFd,
    /// Origin of `root_handle`.
    pub source: HandleSource,
}

impl BootstrapConfig {
    /// Resolves the configuration from `args` (including the program name) and `env`.
    pub fn from_sources<I, F>(args: I, env: F) -> VmResult<Self>
    where
        I: IntoIterator<Item = String>,
        F: Fn(&str) -> Option<String>,
    {
        let (raw, source) = match args.into_iter().nth(1) {
            Some(arg) => (arg, HandleSource::Argument),
            None => match env(ROOT_SOCKET_ENV) {
                Some(value) => (value, HandleSource::Environment),
                None => {
                    return Err(VmError::Configuration(format!(
                        "environment variable {ROOT_SOCKET_ENV} not found"
                    )))
                }
            },
        };
        let root_handle = parse_handle(&raw).ok_or_else(|| {
            VmError::Configuration(format!("{ROOT_SOCKET_ENV} does not contain a valid handle"))
        })?;
        Ok(Self { root_handle, source })
    }

    /// Reads the real process arguments and environment.
    pub fn from_process() -> VmResult<Self> {
        Self::from_sources(std::env::args(), |key| std::env::var(key).ok())
    }
}

fn parse_handle(raw: &str) -> Option<RawFd> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn argument_wins_over_environment() {
        let config = BootstrapConfig::from_sources(args(&["gamevm", "7"]), |_| Some("9".into())).unwrap();
        assert_eq!(config, BootstrapConfig { root_handle: 7, source: HandleSource::Argument });
    }

    #[test]
    fn environment_is_the_fallback() {
        let config = BootstrapConfig::from_sources(args(&["gamevm"]), |key| {
            (key == ROOT_SOCKET_ENV).then(|| "12".to_string())
        })
        .unwrap();
        assert_eq!(config.root_handle, 12);
        assert_eq!(config.source, HandleSource::Environment);
    }

    #[test]
    fn missing_handle_is_a_configuration_error() {
        let err = BootstrapConfig::from_sources(args(&["gamevm"]), no_env).unwrap_err();
        assert_eq!(err.to_string(), "configuration error: environment variable ROOT_SOCKET not found");
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn malformed_handles_are_rejected() {
        for bad in ["", "abc", "12x", " 3", "-1", "+4", "99999999999999999999"] {
            let err = BootstrapConfig::from_sources(args(&["gamevm", bad]), no_env).unwrap_err();
            assert!(matches!(err, VmError::Configuration(_)), "{bad:?} accepted");
        }
    }
}
