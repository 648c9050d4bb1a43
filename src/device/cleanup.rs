//! Reconciliation of the registry with running processes.
//!
//! Forwarders outlive the daemon, and the daemon may be restarted (or the
//! host rebooted) while records still point at PIDs. At start-up the daemon
//! walks the registry, keeps records of forwarders that are still running
//! and forgets the rest.
//!
//! A record only counts as live when the PID exists *and* its command line
//! carries the `forkproxy` subcommand, so a PID recycled by an unrelated
//! process is not mistaken for a forwarder.

use super::registry::Registry;
use crate::forwarder::FORKPROXY_COMMAND;
use crate::telemetry::{AuditEvent, AuditLogger, StopReason};
use std::fs;
use tracing::{debug, info, warn};

/// Outcome of a reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneReport {
    /// `(container, device, pid)` of forwarders still running.
    pub adopted: Vec<(String, String, u32)>,
    /// `(container, device, pid)` of records that were forgotten.
    pub removed: Vec<(String, String, u32)>,
}

impl PruneReport {
    /// Whether nothing was found at all.
    pub fn is_empty(&self) -> bool {
        self.adopted.is_empty() && self.removed.is_empty()
    }
}

/// Forget registry records whose forwarder is gone.
///
/// Every forgotten record is reported to `audit` as a stale stop. Best
/// effort: errors are logged and the pass continues.
pub fn prune_stale_entries(registry: &Registry, audit: Option<&AuditLogger>) -> PruneReport {
    info!("Checking proxy records in {:?}", registry.root());
    let mut report = PruneReport::default();

    let containers = match registry.containers() {
        Ok(containers) => containers,
        Err(e) => {
            warn!("Cannot list proxy records: {}", e);
            return report;
        }
    };

    for container in containers {
        let records = match registry.lookup_all(&container) {
            Ok(records) => records,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => {
                warn!("Cannot read proxy records of {}: {}", container, e);
                continue;
            }
        };

        for (device, pid) in records {
            if is_forwarder_process(pid) {
                debug!("Forwarder {}/{} still running (PID {})", container, device, pid);
                report.adopted.push((container.clone(), device, pid));
                continue;
            }

            info!("Forgetting stale proxy record {}/{} (PID {})", container, device, pid);
            match registry.forget(&container, &device) {
                Ok(()) => {
                    if let Some(audit) = audit {
                        audit.log(AuditEvent::ProxyStop {
                            container: container.clone(),
                            device: device.clone(),
                            pid: Some(pid),
                            reason: StopReason::Stale,
                        });
                    }
                    report.removed.push((container.clone(), device, pid));
                }
                Err(e) => warn!("Failed to forget {}/{}: {}", container, device, e),
            }
        }

        if let Err(e) = registry.remove_if_empty(&container) {
            warn!("Failed to remove empty record directory of {}: {}", container, e);
        }
    }

    report
}

/// Check if `pid` is a running forwarder.
///
/// Zombies have an empty command line and are not counted.
pub fn is_forwarder_process(pid: u32) -> bool {
    match fs::read(format!("/proc/{}/cmdline", pid)) {
        Ok(cmdline) => cmdline
            .split(|b| *b == 0)
            .any(|arg| arg == FORKPROXY_COMMAND.as_bytes()),
        Err(_) => false,
    }
}
