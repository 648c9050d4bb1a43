//! Configuration schema definitions.
//!
//! ```toml
//! [general]
//! log_level = "info"
//!
//! [registry]
//! state_dir = "/var/lib/devproxy/devices"
//!
//! [forwarder]
//! log_dir = "/var/log/devproxy"
//! stop_signal = "SIGTERM"
//! ```
//!
//! Every field is optional. Empty values mean "not set" and fall back to
//! the built-in defaults when the configuration is resolved.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use nix::sys::signal::Signal;

use super::error::ConfigError;
use crate::device::{DEFAULT_LOG_DIR, DEFAULT_STATE_DIR, ForwarderSettings};

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Where forwarder PIDs are recorded.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// How forwarders are run.
    #[serde(default)]
    pub forwarder: ForwarderConfig,
}

impl Config {
    /// Merge another config into this one.
    ///
    /// Scalars set in `other` override the ones in `self`.
    pub fn merge(&mut self, other: Config) {
        self.general.merge(other.general);
        self.registry.merge(other.registry);
        self.forwarder.merge(other.forwarder);
    }

    /// Registry root, with the default applied.
    pub fn state_dir(&self) -> PathBuf {
        self.registry
            .state_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR))
    }

    /// Controller settings, with defaults applied.
    pub fn forwarder_settings(&self) -> Result<ForwarderSettings, ConfigError> {
        let log_dir = match &self.forwarder.log_dir {
            Some(dir) if dir.as_os_str().is_empty() => None,
            Some(dir) => Some(dir.clone()),
            None => Some(PathBuf::from(DEFAULT_LOG_DIR)),
        };

        let stop_signal = if self.forwarder.stop_signal.is_empty() {
            Signal::SIGTERM
        } else {
            parse_signal(&self.forwarder.stop_signal)?
        };

        Ok(ForwarderSettings {
            log_dir,
            stop_signal,
        })
    }
}

/// Accepts `SIGTERM`, `TERM` and `term`.
fn parse_signal(name: &str) -> Result<Signal, ConfigError> {
    let upper = name.trim().to_ascii_uppercase();
    let full = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{}", upper)
    };

    Signal::from_str(&full).map_err(|_| ConfigError::InvalidValue {
        field: "forwarder.stop_signal".to_string(),
        message: format!("unknown signal '{}'", name),
    })
}

/// General application settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub log_level: String,
}

impl GeneralConfig {
    fn merge(&mut self, other: GeneralConfig) {
        if !other.log_level.is_empty() {
            self.log_level = other.log_level;
        }
    }
}

/// Registry settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RegistryConfig {
    /// Directory holding one sub-directory of PID files per container.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

impl RegistryConfig {
    fn merge(&mut self, other: RegistryConfig) {
        if other.state_dir.is_some() {
            self.state_dir = other.state_dir;
        }
    }
}

/// Forwarder settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ForwarderConfig {
    /// Directory for forwarder logs. An empty string discards their output.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Signal sent to stop a forwarder.
    #[serde(default)]
    pub stop_signal: String,
}

impl ForwarderConfig {
    fn merge(&mut self, other: ForwarderConfig) {
        if other.log_dir.is_some() {
            self.log_dir = other.log_dir;
        }
        if !other.stop_signal.is_empty() {
            self.stop_signal = other.stop_signal;
        }
    }
}
