//! Positional argument contract of the forwarder process.
//!
//! ```text
//! devproxy forkproxy <listen_pid> <listen_addr> <connect_pid> <connect_addr> <fd>
//! ```
//!
//! The PIDs are carried for diagnostics only. The last argument is
//! [`NO_FD_MARKER`] on first invocation and the number of the inherited
//! listener descriptor after the re-exec. It must stay the last argument,
//! because the re-exec replaces exactly that element.

use super::address::Address;
use super::error::{AddressError, BootstrapError};
use std::ffi::OsString;
use std::os::fd::RawFd;
use std::path::Path;

/// Hidden subcommand that runs a forwarder.
pub const FORKPROXY_COMMAND: &str = "forkproxy";

/// Descriptor argument meaning "nothing inherited yet".
pub const NO_FD_MARKER: &str = "-1";

/// Arguments of one forwarder process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwarderArgs {
    listen_pid: String,
    listen_addr: Address,
    connect_pid: String,
    connect_addr: Address,
    fd: String,
}

impl ForwarderArgs {
    /// Arguments for a first invocation (no inherited descriptor).
    pub fn new(listen_pid: i32, listen_addr: Address, connect_pid: i32, connect_addr: Address) -> Self {
        Self {
            listen_pid: listen_pid.to_string(),
            listen_addr,
            connect_pid: connect_pid.to_string(),
            connect_addr,
            fd: NO_FD_MARKER.to_string(),
        }
    }

    /// Build from the raw positional arguments.
    pub fn from_positional(
        listen_pid: &str,
        listen_addr: &str,
        connect_pid: &str,
        connect_addr: &str,
        fd: &str,
    ) -> Result<Self, AddressError> {
        Ok(Self {
            listen_pid: listen_pid.to_string(),
            listen_addr: Address::parse(listen_addr)?,
            connect_pid: connect_pid.to_string(),
            connect_addr: Address::parse(connect_addr)?,
            fd: fd.to_string(),
        })
    }

    /// PID of the listening side, as given.
    pub fn listen_pid(&self) -> &str {
        &self.listen_pid
    }

    /// Address to listen on.
    pub fn listen_addr(&self) -> &Address {
        &self.listen_addr
    }

    /// PID of the connecting side, as given.
    pub fn connect_pid(&self) -> &str {
        &self.connect_pid
    }

    /// Address to forward to.
    pub fn connect_addr(&self) -> &Address {
        &self.connect_addr
    }

    /// The inherited listener descriptor, if one is open.
    ///
    /// The marker and any number without an open descriptor behind it mean
    /// nothing was inherited. Anything that is not a number is an error.
    pub fn inherited_fd(&self) -> Result<Option<RawFd>, BootstrapError> {
        let fd: RawFd = self
            .fd
            .parse()
            .map_err(|_| BootstrapError::InvalidDescriptor(self.fd.clone()))?;

        if fd < 0 || !fd_is_open(fd) {
            return Ok(None);
        }
        Ok(Some(fd))
    }

    /// Arguments to pass after the executable path, subcommand included.
    pub fn to_command_args(&self) -> Vec<String> {
        vec![
            FORKPROXY_COMMAND.to_string(),
            self.listen_pid.clone(),
            self.listen_addr.to_string(),
            self.connect_pid.clone(),
            self.connect_addr.to_string(),
            self.fd.clone(),
        ]
    }
}

/// Whether `fd` is open in this process.
pub fn fd_is_open(fd: RawFd) -> bool {
    Path::new(&format!("/proc/self/fd/{}", fd)).exists()
}

/// Replace the trailing descriptor argument of `argv` with `fd`.
pub fn with_inherited_fd(mut argv: Vec<OsString>, fd: RawFd) -> Vec<OsString> {
    if let Some(last) = argv.last_mut() {
        *last = OsString::from(fd.to_string());
    }
    argv
}
