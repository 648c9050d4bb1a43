//! Collaborators of the device controller.
//!
//! The controller does not run containers or own the daemon; it only needs a
//! container's name and init PID, the daemon's executable and PID, and a way
//! to start a process. Those needs are expressed as traits so a daemon can
//! plug in its own runtime.

use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// A container that proxy devices attach to.
pub trait Container {
    /// Container name, used as the registry key.
    fn name(&self) -> &str;

    /// PID of the container's init process, `None` when not running.
    fn init_pid(&self) -> Option<i32>;
}

/// A container known only by name and (optional) init PID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRef {
    name: String,
    init_pid: Option<i32>,
}

impl ContainerRef {
    /// A running container.
    pub fn running(name: impl Into<String>, init_pid: i32) -> Self {
        Self {
            name: name.into(),
            init_pid: Some(init_pid),
        }
    }

    /// A stopped container.
    pub fn stopped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            init_pid: None,
        }
    }
}

impl Container for ContainerRef {
    fn name(&self) -> &str {
        &self.name
    }

    fn init_pid(&self) -> Option<i32> {
        self.init_pid
    }
}

/// The daemon hosting the controller.
pub trait DaemonState {
    /// Path of the executable that provides the `forkproxy` subcommand.
    fn executable(&self) -> io::Result<PathBuf>;

    /// PID recorded for the host side of a proxy.
    fn pid(&self) -> i32 {
        std::process::id() as i32
    }

    /// Start `program` with `args` and return its PID without waiting for it.
    ///
    /// When `log_path` is given, the child's stdout and stderr are appended
    /// to that file.
    fn spawn(&self, program: &Path, args: &[String], log_path: Option<&Path>) -> io::Result<u32>;
}

/// Spawns forwarders as children of the current process.
#[derive(Debug, Clone, Default)]
pub struct LocalDaemon {
    executable: Option<PathBuf>,
}

impl LocalDaemon {
    /// Use the currently running executable.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific executable (tests, or a daemon installed elsewhere).
    pub fn with_executable(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: Some(executable.into()),
        }
    }
}

impl DaemonState for LocalDaemon {
    fn executable(&self) -> io::Result<PathBuf> {
        match &self.executable {
            Some(path) => Ok(path.clone()),
            None => std::env::current_exe(),
        }
    }

    fn spawn(&self, program: &Path, args: &[String], log_path: Option<&Path>) -> io::Result<u32> {
        let (stdout, stderr) = match log_path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                (Stdio::from(file.try_clone()?), Stdio::from(file))
            }
            None => (Stdio::null(), Stdio::null()),
        };

        // Own process group, so terminal signals aimed at the daemon do not
        // reach its forwarders.
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .process_group(0)
            .spawn()?;

        let pid = child.id();
        debug!("Spawned {} as PID {}", program.display(), pid);

        // Reap the child when it exits so a killed forwarder does not stay
        // around as a zombie.
        std::thread::Builder::new()
            .name(format!("reap-{}", pid))
            .spawn(move || {
                let _ = child.wait();
            })?;

        Ok(pid)
    }
}
