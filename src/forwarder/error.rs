//! Error types for the forwarder process.
//!
//! Address errors cover parsing, resolving, binding and dialing. Bootstrap
//! errors are the fatal failures of the bind/re-exec/rebuild sequence; every
//! one of them ends the forwarder process with a non-zero status.

use std::os::fd::RawFd;
use thiserror::Error;

/// Errors from address parsing and socket setup.
#[derive(Debug, Error)]
pub enum AddressError {
    /// The address is not `tcp:<host>:<port>` or `unix:<path>`.
    #[error("Invalid proxy address '{addr}': {reason}")]
    InvalidAddress {
        /// The address as given.
        addr: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The endpoint could not be turned into a socket address.
    #[error("Cannot resolve socket address {addr}: {message}")]
    Resolution {
        /// The address being resolved.
        addr: String,
        /// Resolver message.
        message: String,
    },

    /// Binding the listener failed.
    #[error("Cannot bind {addr}: {source}")]
    Bind {
        /// The address we tried to bind.
        addr: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Connecting to the target failed.
    #[error("Failed to connect to {addr}: {source}")]
    Dial {
        /// The address we tried to reach.
        addr: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Fatal errors of the listener bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The listen address could not be parsed or bound.
    #[error(transparent)]
    Address(#[from] AddressError),

    /// The descriptor argument is neither the marker nor a descriptor number.
    #[error("Invalid descriptor argument '{0}'")]
    InvalidDescriptor(String),

    /// Duplicating the listener descriptor failed.
    #[error("Failed to duplicate the listener fd: {0}")]
    Duplicate(#[source] nix::Error),

    /// Replacing the process image failed.
    #[error("Failed to re-exec: {0}")]
    ReExec(#[source] std::io::Error),

    /// The inherited descriptor does not hold a usable listener.
    #[error("Failed to re-assemble listener from fd {fd}: {source}")]
    ListenerRebuild {
        /// The inherited descriptor number.
        fd: RawFd,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The async runtime could not be started.
    #[error("Failed to create tokio runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

/// Result type for forwarder operations.
pub type ForwarderResult<T> = Result<T, BootstrapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_address_display() {
        let err = AddressError::InvalidAddress {
            addr: "ftp:host:21".to_string(),
            reason: "unsupported scheme 'ftp'".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("ftp:host:21"));
        assert!(msg.contains("unsupported scheme"));
    }

    #[test]
    fn test_bind_error_display() {
        let err = AddressError::Bind {
            addr: "tcp:127.0.0.1:80".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("tcp:127.0.0.1:80"));
    }

    #[test]
    fn test_rebuild_error_mentions_fd() {
        let err = BootstrapError::ListenerRebuild {
            fd: 7,
            source: std::io::Error::from(std::io::ErrorKind::InvalidInput),
        };
        assert!(err.to_string().contains("fd 7"));
    }

    #[test]
    fn test_bootstrap_from_address_error() {
        let err: BootstrapError = AddressError::Resolution {
            addr: "tcp:nope".to_string(),
            message: "invalid socket address".to_string(),
        }
        .into();
        assert!(matches!(err, BootstrapError::Address(_)));
    }
}
