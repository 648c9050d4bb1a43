//! Command-line interface definitions for devproxy.
//!
//! Uses clap's derive API for type-safe argument parsing.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::device::{DeviceConfig, KEY_BIND, KEY_CONNECT, KEY_LISTEN};

/// Network proxy devices for containers.
///
/// devproxy starts one forwarder process per proxy device. Each forwarder
/// listens on one side of a container boundary and relays every connection
/// to an address on the other side.
#[derive(Parser, Debug)]
#[command(name = "devproxy")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,

    /// Path to additional config file.
    ///
    /// This config file is merged on top of system and user configs,
    /// giving it the highest priority (except for CLI flags).
    #[arg(short = 'c', long = "config", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Override the registry directory.
    #[arg(long = "state-dir", value_name = "DIR", global = true)]
    pub state_dir: Option<PathBuf>,

    /// Increase log verbosity.
    ///
    /// Can be specified multiple times:
    /// -v    = info level
    /// -vv   = debug level
    /// -vvv  = trace level
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

/// Subcommands for devproxy.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage proxy devices of a container.
    #[command(subcommand)]
    Device(DeviceCommand),

    /// Forget registry records whose forwarder is no longer running.
    Prune,

    /// Forwarder process (hidden).
    ///
    /// Started by `device add` and `device restart`; it should not be
    /// invoked directly. The last argument is `-1` on the first run and the
    /// inherited listener descriptor after the forwarder re-executes itself.
    #[command(name = "forkproxy", hide = true, allow_negative_numbers = true)]
    Forkproxy {
        /// PID of the listening side.
        listen_pid: String,
        /// Address to listen on, `tcp:host:port` or `unix:/path`.
        listen_addr: String,
        /// PID of the connecting side.
        connect_pid: String,
        /// Address to forward to.
        connect_addr: String,
        /// Inherited listener descriptor, or `-1`.
        fd: String,
    },
}

/// `device` subcommands.
#[derive(Subcommand, Debug)]
pub enum DeviceCommand {
    /// Start a forwarder for a new device.
    Add(ProxyDeviceArgs),

    /// Stop a device's forwarder and forget it.
    Remove {
        /// Container name.
        container: String,
        /// Device name.
        device: String,
    },

    /// Replace a device's forwarder with a fresh one.
    Restart(ProxyDeviceArgs),

    /// Stop every forwarder of a container.
    RemoveAll {
        /// Container name.
        container: String,
    },

    /// Show the recorded forwarders of a container.
    List {
        /// Container name.
        container: String,
    },
}

/// A proxy device as given on the command line.
#[derive(Args, Debug, Clone)]
pub struct ProxyDeviceArgs {
    /// Container name.
    pub container: String,

    /// Device name.
    pub device: String,

    /// PID of the container's init process.
    #[arg(long = "pid", value_name = "PID")]
    pub pid: i32,

    /// Address to listen on, `tcp:host:port` or `unix:/path`.
    #[arg(long = "listen", value_name = "ADDR")]
    pub listen: String,

    /// Address to forward to.
    #[arg(long = "connect", value_name = "ADDR")]
    pub connect: String,

    /// Side that listens: `host` or `container`.
    #[arg(long = "bind", value_name = "SIDE", default_value = "host")]
    pub bind: String,
}

impl ProxyDeviceArgs {
    /// Device configuration as the controller expects it.
    pub fn device_config(&self) -> DeviceConfig {
        let mut config = DeviceConfig::new();
        config.insert(KEY_LISTEN.to_string(), self.listen.clone());
        config.insert(KEY_CONNECT.to_string(), self.connect.clone());
        config.insert(KEY_BIND.to_string(), self.bind.clone());
        config
    }
}
