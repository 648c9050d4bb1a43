//! Configuration loading with hierarchy merging.
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Built-in defaults
//! 2. System config: `/etc/devproxy/config.toml`
//! 3. User config: `~/.config/devproxy/config.toml`
//! 4. Additional config file (via `--config` flag)
//! 5. CLI flags (highest priority)

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::ConfigError;
use super::schema::{Config, RegistryConfig};
use crate::cli::Cli;

/// System-wide configuration path.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/devproxy/config.toml";

/// User configuration directory name.
pub const USER_CONFIG_DIR: &str = "devproxy";

/// User configuration filename.
pub const USER_CONFIG_FILE: &str = "config.toml";

/// Configuration loader with support for hierarchy merging.
#[derive(Debug)]
pub struct ConfigLoader {
    /// Path to system-wide configuration.
    system_path: PathBuf,
    /// Path to user configuration.
    user_path: PathBuf,
}

impl ConfigLoader {
    /// Create a new ConfigLoader with default paths.
    #[must_use]
    pub fn new() -> Self {
        let user_config_dir = dirs::config_dir()
            .map(|p| p.join(USER_CONFIG_DIR))
            .unwrap_or_else(|| PathBuf::from(".config").join(USER_CONFIG_DIR));

        Self {
            system_path: PathBuf::from(SYSTEM_CONFIG_PATH),
            user_path: user_config_dir.join(USER_CONFIG_FILE),
        }
    }

    /// Create a ConfigLoader with custom paths (for testing).
    #[must_use]
    pub fn with_paths(system_path: PathBuf, user_path: PathBuf) -> Self {
        Self {
            system_path,
            user_path,
        }
    }

    /// Load and merge configuration from all sources.
    ///
    /// Missing system and user files are skipped. Invalid TOML is an error,
    /// and so is a `--config` file that does not exist.
    pub fn load(&self, cli: &Cli) -> Result<Config, ConfigError> {
        let mut config = Config::default();

        for path in [&self.system_path, &self.user_path] {
            if let Some(file_config) = self.load_file(path)? {
                config.merge(file_config);
                debug!("Loaded config from {:?}", path);
            } else {
                debug!("No config found at {:?}", path);
            }
        }

        if let Some(ref cli_config_path) = cli.config {
            match self.load_file(cli_config_path)? {
                Some(cli_config) => {
                    config.merge(cli_config);
                    debug!("Loaded additional config from {:?}", cli_config_path);
                }
                None => {
                    // Unlike system/user config, a missing CLI-specified config is an error
                    return Err(ConfigError::ReadError {
                        path: cli_config_path.clone(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "Specified config file not found",
                        ),
                    });
                }
            }
        }

        if let Some(ref state_dir) = cli.state_dir {
            config.merge(Config {
                registry: RegistryConfig {
                    state_dir: Some(state_dir.clone()),
                },
                ..Default::default()
            });
            debug!("Registry directory set from CLI: {:?}", state_dir);
        }

        // Fail here rather than at the first device operation.
        config.forwarder_settings()?;

        Ok(config)
    }

    /// Load a config file, returning None if it doesn't exist.
    fn load_file(&self, path: &Path) -> Result<Option<Config>, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config: Config =
                    toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
                        path: path.to_path_buf(),
                        source: e,
                    })?;
                Ok(Some(config))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConfigError::ReadError {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Commands;
    use crate::device::DEFAULT_STATE_DIR;
    use nix::sys::signal::Signal;
    use tempfile::tempdir;

    fn create_test_cli() -> Cli {
        Cli {
            command: Commands::Prune,
            config: None,
            state_dir: None,
            verbose: 0,
        }
    }

    fn loader_in(dir: &Path) -> ConfigLoader {
        ConfigLoader::with_paths(dir.join("system.toml"), dir.join("user.toml"))
    }

    #[test]
    fn test_missing_files_use_defaults() {
        let dir = tempdir().unwrap();
        let config = loader_in(dir.path()).load(&create_test_cli()).unwrap();

        assert_eq!(config.state_dir(), PathBuf::from(DEFAULT_STATE_DIR));
        assert_eq!(config.forwarder_settings().unwrap().stop_signal, Signal::SIGTERM);
    }

    #[test]
    fn test_user_config_overrides_system() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("system.toml"),
            "[general]\nlog_level = \"warn\"\n[registry]\nstate_dir = \"/system/devices\"\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("user.toml"),
            "[registry]\nstate_dir = \"/user/devices\"\n",
        )
        .unwrap();

        let config = loader_in(dir.path()).load(&create_test_cli()).unwrap();

        assert_eq!(config.general.log_level, "warn");
        assert_eq!(config.state_dir(), PathBuf::from("/user/devices"));
    }

    #[test]
    fn test_cli_config_and_flags() {
        let dir = tempdir().unwrap();
        let extra = dir.path().join("extra.toml");
        fs::write(
            &extra,
            "[registry]\nstate_dir = \"/extra/devices\"\n[forwarder]\nstop_signal = \"SIGINT\"\n",
        )
        .unwrap();

        let mut cli = create_test_cli();
        cli.config = Some(extra);
        let config = loader_in(dir.path()).load(&cli).unwrap();
        assert_eq!(config.state_dir(), PathBuf::from("/extra/devices"));
        assert_eq!(config.forwarder_settings().unwrap().stop_signal, Signal::SIGINT);

        cli.state_dir = Some(PathBuf::from("/flag/devices"));
        let config = loader_in(dir.path()).load(&cli).unwrap();
        assert_eq!(config.state_dir(), PathBuf::from("/flag/devices"));
    }

    #[test]
    fn test_missing_cli_config_is_error() {
        let dir = tempdir().unwrap();
        let mut cli = create_test_cli();
        cli.config = Some(dir.path().join("nope.toml"));

        let result = loader_in(dir.path()).load(&cli);
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("user.toml"), "[registry\nstate_dir = 1").unwrap();

        let result = loader_in(dir.path()).load(&create_test_cli());
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_invalid_signal_returns_error() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("system.toml"),
            "[forwarder]\nstop_signal = \"SIGBOGUS\"\n",
        )
        .unwrap();

        let result = loader_in(dir.path()).load(&create_test_cli());
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }
}
