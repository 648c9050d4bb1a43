//! Listener bootstrap: bind once, hand the socket across `exec`.
//!
//! A forwarder starts in the **binding** state. It binds the listen address,
//! duplicates the listener descriptor (the duplicate is not close-on-exec)
//! and replaces its own image with `/proc/self/exe`, passing the duplicate's
//! number as the last argument. The new image finds that descriptor open and
//! enters the **serving** state: it rebuilds the listener and runs the
//! forwarding engine.
//!
//! Whoever spawns the forwarder may have narrowed its context (namespace,
//! privileges) in ways that would stop it from binding; the second image
//! never binds anything itself.

use super::address::{Address, Listener, Scheme};
use super::error::{BootstrapError, ForwarderResult};
use super::invocation::{with_inherited_fd, ForwarderArgs};
use super::relay;
use std::ffi::OsString;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::process::Command;
use tracing::{debug, info};

/// Path used to re-execute the running binary.
pub const SELF_EXE: &str = "/proc/self/exe";

/// Where the forwarder is in its start-up sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    /// No inherited listener; bind and re-exec.
    Binding,
    /// Listener inherited at this descriptor.
    Serving(RawFd),
}

impl BootstrapState {
    /// Determine the state from the forwarder arguments.
    pub fn detect(args: &ForwarderArgs) -> ForwarderResult<Self> {
        Ok(match args.inherited_fd()? {
            Some(fd) => BootstrapState::Serving(fd),
            None => BootstrapState::Binding,
        })
    }
}

/// Run a forwarder to completion.
///
/// In the binding state this only returns on failure. In the serving state
/// it returns `Ok(())` after a termination signal.
pub fn run(args: &ForwarderArgs) -> ForwarderResult<()> {
    match BootstrapState::detect(args)? {
        BootstrapState::Binding => Err(bind_and_reexec(args)),
        BootstrapState::Serving(fd) => serve(args, fd),
    }
}

/// Bind the listen address and re-execute with the descriptor inherited.
fn bind_and_reexec(args: &ForwarderArgs) -> BootstrapError {
    info!(
        "Listening on {} in {}, forwarding to {} from {}",
        args.listen_addr(),
        args.listen_pid(),
        args.connect_addr(),
        args.connect_pid()
    );

    let listener = match args.listen_addr().bind() {
        Ok(listener) => listener,
        Err(e) => return e.into(),
    };

    let fd = match nix::unistd::dup(listener.as_raw_fd()) {
        Ok(fd) => fd,
        Err(e) => return BootstrapError::Duplicate(e),
    };

    let mut argv: Vec<OsString> = std::env::args_os().collect();
    let argv0 = if argv.is_empty() {
        OsString::from(SELF_EXE)
    } else {
        argv.remove(0)
    };
    let argv = with_inherited_fd(argv, fd);

    debug!("Re-executing with listener on fd {}", fd);
    let err = Command::new(SELF_EXE).arg0(argv0).args(argv).exec();
    BootstrapError::ReExec(err)
}

/// Rebuild the inherited listener and forward until told to stop.
fn serve(args: &ForwarderArgs, fd: RawFd) -> ForwarderResult<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(BootstrapError::Runtime)?;

    rt.block_on(async {
        let listener = Listener::from_inherited_fd(args.listen_addr().scheme(), fd)
            .map_err(|source| BootstrapError::ListenerRebuild { fd, source })?;

        info!("Starting to proxy {} -> {}", args.listen_addr(), args.connect_addr());
        relay::serve_until_shutdown(listener, args.connect_addr().clone()).await;
        Ok::<(), BootstrapError>(())
    })?;

    remove_socket_file(args.listen_addr());
    Ok(())
}

/// Unlink a Unix listen path after a deliberate shutdown so the device can
/// bind it again.
fn remove_socket_file(addr: &Address) {
    if addr.scheme() != Scheme::Unix {
        return;
    }
    if let Err(e) = std::fs::remove_file(addr.endpoint()) {
        debug!("Could not remove socket {}: {}", addr.endpoint(), e);
    }
}
