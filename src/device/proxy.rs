//! Proxy device configuration.
//!
//! A proxy device is configured by three string keys:
//!
//! ```text
//! listen  = "tcp:127.0.0.1:9000"     where the forwarder listens
//! connect = "unix:/run/app.sock"     where it forwards to
//! bind    = "host" | "container"     which side owns the listener
//! ```

use super::error::LifecycleError;
use crate::forwarder::{Address, ForwarderArgs};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Device configuration as stored by the daemon.
pub type DeviceConfig = HashMap<String, String>;

/// Key of the listen address.
pub const KEY_LISTEN: &str = "listen";
/// Key of the connect address.
pub const KEY_CONNECT: &str = "connect";
/// Key of the bind side.
pub const KEY_BIND: &str = "bind";

/// Side of the container boundary that owns the listening socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindSide {
    /// Listen inside the container, connect from the host.
    Container,
    /// Listen on the host, connect into the container.
    Host,
}

impl FromStr for BindSide {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "container" => Ok(BindSide::Container),
            "host" => Ok(BindSide::Host),
            other => Err(LifecycleError::InvalidBindSide(Some(other.to_string()))),
        }
    }
}

impl fmt::Display for BindSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BindSide::Container => "container",
            BindSide::Host => "host",
        })
    }
}

/// Everything a forwarder process needs to know about its device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySpec {
    /// Which side listens.
    pub listen_side: BindSide,
    /// Address to listen on.
    pub listen_addr: Address,
    /// Address to forward to.
    pub connect_addr: Address,
    /// PID of the listening side (diagnostic).
    pub listen_pid: i32,
    /// PID of the connecting side (diagnostic).
    pub connect_pid: i32,
}

impl ProxySpec {
    /// Build from device configuration.
    ///
    /// The container side is identified by `container_pid`, the host side by
    /// `daemon_pid`.
    pub fn from_config(
        config: &DeviceConfig,
        container_pid: i32,
        daemon_pid: i32,
    ) -> Result<Self, LifecycleError> {
        let listen_side: BindSide = config
            .get(KEY_BIND)
            .ok_or(LifecycleError::InvalidBindSide(None))?
            .parse()?;

        let listen_addr = Address::parse(
            config
                .get(KEY_LISTEN)
                .ok_or(LifecycleError::MissingKey(KEY_LISTEN))?,
        )?;
        let connect_addr = Address::parse(
            config
                .get(KEY_CONNECT)
                .ok_or(LifecycleError::MissingKey(KEY_CONNECT))?,
        )?;

        let (listen_pid, connect_pid) = match listen_side {
            BindSide::Container => (container_pid, daemon_pid),
            BindSide::Host => (daemon_pid, container_pid),
        };

        Ok(Self {
            listen_side,
            listen_addr,
            connect_addr,
            listen_pid,
            connect_pid,
        })
    }

    /// Forwarder arguments for a first invocation.
    pub fn forwarder_args(&self) -> ForwarderArgs {
        ForwarderArgs::new(
            self.listen_pid,
            self.listen_addr.clone(),
            self.connect_pid,
            self.connect_addr.clone(),
        )
    }
}
