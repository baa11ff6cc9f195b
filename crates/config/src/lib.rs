//! Configuration module for Skyhook
//!
//! Both binaries load configuration the same way: start from defaults, merge
//! an optional YAML file, then apply `SKYHOOK_*` environment overrides, then
//! validate. File and environment are both optional so a bare `skyhook-server`
//! starts with sensible localhost defaults.
//!
//! # Module Organization
//!
//! - [`server`]: Server configuration (ports, auth, tunnel knobs)
//! - [`agent`]: Agent configuration (server URL, identity, reconnect policy)
//! - [`defaults`]: Default value functions shared by serde and tests

pub mod agent;
mod defaults;
pub mod server;

pub use agent::AgentConfig;
pub use server::{ServerConfig, TlsConfig};

use skyhook_common::{TunnelError, TunnelResult};
use std::path::Path;

/// Read and deserialize one YAML config file.
pub(crate) fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> TunnelResult<T> {
    let content = std::fs::read_to_string(path).map_err(|e| TunnelError::Config {
        message: format!("failed to read config file {}: {e}", path.display()),
    })?;
    serde_yaml::from_str(&content).map_err(|e| TunnelError::Config {
        message: format!("failed to parse config file {}: {e}", path.display()),
    })
}

/// Environment override helpers.
pub(crate) fn env_string(name: &str, into: &mut String) {
    if let Ok(value) = std::env::var(name) {
        if !value.is_empty() {
            *into = value;
        }
    }
}

pub(crate) fn env_parse<T: std::str::FromStr>(name: &str, into: &mut T) {
    if let Ok(value) = std::env::var(name) {
        if let Ok(parsed) = value.parse::<T>() {
            *into = parsed;
        } else {
            tracing::warn!(var = name, value = %value, "ignoring unparsable environment override");
        }
    }
}
