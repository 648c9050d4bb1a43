//! Configuration system for devproxy.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Built-in defaults
//! 2. System config: `/etc/devproxy/config.toml`
//! 3. User config: `~/.config/devproxy/config.toml`
//! 4. Additional config file (via `--config` flag)
//! 5. CLI flags (highest priority)
//!
//! Missing system and user files are skipped. A missing `--config` file is
//! an error.

mod error;
mod loader;
mod schema;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{Config, ForwarderConfig, GeneralConfig, RegistryConfig};
