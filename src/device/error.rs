//! Error types for proxy device management.
//!
//! Registry errors come from the on-disk PID records. Lifecycle errors are
//! what device create/restart report to the caller; configuration problems
//! are always reported before any process is spawned.

use crate::forwarder::AddressError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from the proxy process registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No record for the container (or for the device in it).
    #[error("No proxy record for {}", describe_key(.container, .device.as_deref()))]
    NotFound {
        /// Container name.
        container: String,
        /// Device name, `None` when the whole container was looked up.
        device: Option<String>,
    },

    /// A container or device name cannot be used as a record key.
    #[error("Invalid registry name '{0}'")]
    InvalidName(String),

    /// A record does not contain a PID.
    #[error("Corrupt proxy record {path}: {content:?}")]
    CorruptEntry {
        /// Path of the record file.
        path: PathBuf,
        /// What the file contains.
        content: String,
    },

    /// File-system failure while reading or writing records.
    #[error("Registry I/O error on {path}: {source}")]
    Io {
        /// The path being accessed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

fn describe_key(container: &str, device: Option<&str>) -> String {
    match device {
        Some(device) => format!("device '{}' of container '{}'", device, container),
        None => format!("container '{}'", container),
    }
}

impl RegistryError {
    /// Whether this is a lookup miss.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound { .. })
    }
}

/// Errors from proxy device lifecycle operations.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The container has no init PID.
    #[error("Container '{0}' is not running")]
    ContainerNotRunning(String),

    /// A required device configuration key is absent.
    #[error("Proxy device is missing the '{0}' key")]
    MissingKey(&'static str),

    /// `bind` is absent or not one of `container`/`host`.
    #[error("Invalid bind side {0:?}: expected \"container\" or \"host\"")]
    InvalidBindSide(Option<String>),

    /// The listen or connect address is malformed.
    #[error("Invalid proxy address: {0}")]
    Address(#[from] AddressError),

    /// The path of the running executable is unknown.
    #[error("Cannot determine the daemon executable: {0}")]
    Executable(#[source] std::io::Error),

    /// The device already has a running forwarder.
    #[error("Proxy {container}/{device} is already running (PID {pid})")]
    AlreadyRunning {
        /// Container name.
        container: String,
        /// Device name.
        device: String,
        /// PID of the running forwarder.
        pid: u32,
    },

    /// Spawning the forwarder process failed.
    #[error("Failed to spawn proxy forwarder: {0}")]
    Spawn(#[source] std::io::Error),

    /// Registry access failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Result type for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = RegistryError::NotFound {
            container: "c1".to_string(),
            device: Some("web".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("'web'"));
        assert!(msg.contains("'c1'"));
        assert!(err.is_not_found());

        let err = RegistryError::NotFound {
            container: "c1".to_string(),
            device: None,
        };
        assert_eq!(err.to_string(), "No proxy record for container 'c1'");
    }

    #[test]
    fn test_invalid_bind_side_display() {
        let err = LifecycleError::InvalidBindSide(Some("guest".to_string()));
        assert!(err.to_string().contains("guest"));

        let err = LifecycleError::InvalidBindSide(None);
        assert!(err.to_string().contains("None"));
    }

    #[test]
    fn test_lifecycle_from_registry() {
        let err: LifecycleError = RegistryError::InvalidName("..".to_string()).into();
        assert!(matches!(err, LifecycleError::Registry(_)));
    }
}
