//! Start, stop and restart forwarders for proxy devices.
//!
//! The controller is the daemon-side half of a proxy device. It turns device
//! configuration into forwarder arguments, spawns the forwarder through the
//! [`DaemonState`], and keeps the registry in step with what it started.
//!
//! Ordering rules:
//! - nothing is spawned before the configuration has been validated
//! - a PID is only recorded after the spawn succeeded
//! - a record is always forgotten once its process has been signalled
//! - a device never has two live forwarders

use super::cleanup::is_forwarder_process;
use super::container::{Container, DaemonState};
use super::error::{LifecycleError, LifecycleResult, RegistryError};
use super::proxy::{DeviceConfig, ProxySpec};
use super::registry::Registry;
use crate::telemetry::{AuditEvent, AuditLogger, StopReason};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default directory for forwarder logs.
pub const DEFAULT_LOG_DIR: &str = "/var/log/devproxy";

/// How long a stopped forwarder is given to exit.
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// How the controller runs forwarders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwarderSettings {
    /// Forwarder output goes to `<log_dir>/<container>/proxy.<device>.log`.
    /// `None` discards it.
    pub log_dir: Option<PathBuf>,
    /// Signal used to stop a forwarder.
    pub stop_signal: Signal,
}

impl Default for ForwarderSettings {
    fn default() -> Self {
        Self {
            log_dir: Some(PathBuf::from(DEFAULT_LOG_DIR)),
            stop_signal: Signal::SIGTERM,
        }
    }
}

/// What `start_all` did for one device.
#[derive(Debug)]
pub enum StartOutcome {
    /// A recorded forwarder was still running and kept.
    Adopted(u32),
    /// A new forwarder was started.
    Started(u32),
    /// Starting failed.
    Failed(LifecycleError),
}

/// Lifecycle controller for proxy devices.
#[derive(Debug)]
pub struct ProxyController<D: DaemonState> {
    registry: Arc<Registry>,
    daemon: D,
    settings: ForwarderSettings,
    audit: Option<Arc<AuditLogger>>,
}

impl<D: DaemonState> ProxyController<D> {
    /// Create a controller over `registry`.
    pub fn new(registry: Arc<Registry>, daemon: D, settings: ForwarderSettings) -> Self {
        Self {
            registry,
            daemon,
            settings,
            audit: None,
        }
    }

    /// Send audit events to `audit`.
    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// The registry this controller records into.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Start a forwarder for `device` and record its PID.
    ///
    /// Fails with [`LifecycleError::AlreadyRunning`] when the device's
    /// recorded forwarder is still alive. A record of a dead forwarder is
    /// replaced.
    pub fn create(
        &self,
        container: &impl Container,
        device: &str,
        config: &DeviceConfig,
    ) -> LifecycleResult<u32> {
        self.spec_for(container, device, config)?;

        match self.registry.lookup(container.name(), device) {
            Ok(pid) if is_forwarder_process(pid) => {
                return Err(LifecycleError::AlreadyRunning {
                    container: container.name().to_string(),
                    device: device.to_string(),
                    pid,
                });
            }
            Ok(pid) => debug!(
                "Replacing stale record of {}/{} (PID {})",
                container.name(),
                device,
                pid
            ),
            Err(RegistryError::NotFound { .. }) | Err(RegistryError::CorruptEntry { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        let pid = self.spawn_forwarder(container, device, config)?;
        info!("Started proxy {}/{} (PID {})", container.name(), device, pid);
        Ok(pid)
    }

    /// Stop the forwarder of `device` and forget it.
    ///
    /// A device without a record is not an error.
    pub fn remove(&self, container: &str, device: &str) -> LifecycleResult<()> {
        let pid = match self.registry.lookup(container, device) {
            Ok(pid) => Some(pid),
            Err(e) if e.is_not_found() => {
                debug!("No forwarder recorded for {}/{}", container, device);
                return Ok(());
            }
            Err(RegistryError::CorruptEntry { path, .. }) => {
                warn!("Forgetting unreadable proxy record {:?}", path);
                None
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(pid) = pid {
            self.stop_process(pid);
            self.wait_for_exit(pid);
        }
        self.registry.forget(container, device)?;

        info!("Removed proxy {}/{}", container, device);
        self.audit(AuditEvent::ProxyStop {
            container: container.to_string(),
            device: device.to_string(),
            pid,
            reason: StopReason::Removed,
        });
        Ok(())
    }

    /// Stop every forwarder of `container` and forget them all.
    pub fn remove_all(&self, container: &str) -> LifecycleResult<()> {
        let records = match self.registry.lookup_all(container) {
            Ok(records) => records,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        for (_, pid) in &records {
            self.stop_process(*pid);
        }
        for (device, pid) in &records {
            self.wait_for_exit(*pid);
            self.audit(AuditEvent::ProxyStop {
                container: container.to_string(),
                device: device.clone(),
                pid: Some(*pid),
                reason: StopReason::ContainerStopped,
            });
        }
        self.registry.forget_all(container)?;

        if !records.is_empty() {
            info!("Removed {} proxies of {}", records.len(), container);
        }
        Ok(())
    }

    /// Start a fresh forwarder for `device`, replacing the recorded one.
    ///
    /// A recorded forwarder that is still running is stopped first so that
    /// the new one can bind the same address. Returns the new PID.
    pub fn restart(
        &self,
        container: &impl Container,
        device: &str,
        config: &DeviceConfig,
    ) -> LifecycleResult<u32> {
        let old_pid = match self.registry.lookup(container.name(), device) {
            Ok(pid) => Some(pid),
            Err(RegistryError::NotFound { .. }) | Err(RegistryError::CorruptEntry { .. }) => None,
            Err(e) => return Err(e.into()),
        };

        // Validate before touching a running forwarder.
        self.spec_for(container, device, config)?;

        if let Some(pid) = old_pid
            && is_forwarder_process(pid)
        {
            self.stop_process(pid);
            self.wait_for_exit(pid);
        }

        let new_pid = self.spawn_forwarder(container, device, config)?;
        info!(
            "Restarted proxy {}/{} (PID {:?} -> {})",
            container.name(),
            device,
            old_pid,
            new_pid
        );
        self.audit(AuditEvent::ProxyRestart {
            container: container.name().to_string(),
            device: device.to_string(),
            old_pid,
            new_pid,
        });
        Ok(new_pid)
    }

    /// Bring up every proxy device of a container that is starting.
    ///
    /// Forwarders that survived (for example a daemon restart) are adopted;
    /// the rest are restarted. Results are sorted by device name.
    pub fn start_all(
        &self,
        container: &impl Container,
        devices: &HashMap<String, DeviceConfig>,
    ) -> Vec<(String, StartOutcome)> {
        let mut names: Vec<&String> = devices.keys().collect();
        names.sort();

        names
            .into_iter()
            .map(|device| {
                let config = &devices[device];
                let outcome = match self.registry.lookup(container.name(), device) {
                    Ok(pid) if self.is_alive(pid) => {
                        debug!("Adopting forwarder {}/{} (PID {})", container.name(), device, pid);
                        StartOutcome::Adopted(pid)
                    }
                    _ => match self.restart(container, device, config) {
                        Ok(pid) => StartOutcome::Started(pid),
                        Err(e) => {
                            warn!("Failed to start proxy {}/{}: {}", container.name(), device, e);
                            StartOutcome::Failed(e)
                        }
                    },
                };
                (device.clone(), outcome)
            })
            .collect()
    }

    /// Whether `pid` is a running forwarder.
    pub fn is_alive(&self, pid: u32) -> bool {
        is_forwarder_process(pid)
    }

    /// Everything that can be rejected without side effects: the record key,
    /// the container state and the device configuration.
    fn spec_for(
        &self,
        container: &impl Container,
        device: &str,
        config: &DeviceConfig,
    ) -> LifecycleResult<ProxySpec> {
        Registry::validate_key(container.name(), device)?;
        let container_pid = container
            .init_pid()
            .ok_or_else(|| LifecycleError::ContainerNotRunning(container.name().to_string()))?;
        ProxySpec::from_config(config, container_pid, self.daemon.pid())
    }

    fn spawn_forwarder(
        &self,
        container: &impl Container,
        device: &str,
        config: &DeviceConfig,
    ) -> LifecycleResult<u32> {
        let spec = self.spec_for(container, device, config)?;
        let program = self.daemon.executable().map_err(LifecycleError::Executable)?;
        let args = spec.forwarder_args().to_command_args();

        let log_path = self.settings.log_dir.as_ref().map(|dir| {
            dir.join(container.name())
                .join(format!("proxy.{}.log", device))
        });

        let pid = self
            .daemon
            .spawn(&program, &args, log_path.as_deref())
            .map_err(LifecycleError::Spawn)?;

        if let Err(e) = self.registry.record(container.name(), device, pid) {
            // Not recorded means nobody could stop it later.
            self.stop_process(pid);
            return Err(e.into());
        }

        self.audit(AuditEvent::ProxyStart {
            container: container.name().to_string(),
            device: device.to_string(),
            pid,
            listen: spec.listen_addr.to_string(),
            connect: spec.connect_addr.to_string(),
        });
        Ok(pid)
    }

    /// Signal a forwarder. A process that is already gone is fine.
    fn stop_process(&self, pid: u32) {
        let Ok(raw) = i32::try_from(pid) else {
            warn!("Ignoring out-of-range PID {}", pid);
            return;
        };

        match signal::kill(Pid::from_raw(raw), self.settings.stop_signal) {
            Ok(()) => debug!("Sent {:?} to forwarder {}", self.settings.stop_signal, pid),
            Err(Errno::ESRCH) => debug!("Forwarder {} already gone", pid),
            Err(e) => warn!("Failed to signal forwarder {}: {}", pid, e),
        }
    }

    fn wait_for_exit(&self, pid: u32) {
        let deadline = Instant::now() + STOP_TIMEOUT;
        while is_forwarder_process(pid) {
            if Instant::now() >= deadline {
                warn!("Forwarder {} still running after {:?}", pid, STOP_TIMEOUT);
                return;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    fn audit(&self, event: AuditEvent) {
        if let Some(audit) = &self.audit {
            audit.log(event);
        }
    }
}
