//! Command handling for devproxy.
//!
//! Device commands drive a [`ProxyController`] over the configured registry;
//! `forkproxy` runs the forwarder itself.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::cli::{Commands, DeviceCommand, ProxyDeviceArgs};
use crate::config::Config;
use crate::device::{
    prune_stale_entries, ContainerRef, LocalDaemon, ProxyController, Registry,
};
use crate::forwarder::{self, ForwarderArgs};
use crate::telemetry::AuditLogger;

/// Handle a parsed subcommand.
pub fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Forkproxy {
            listen_pid,
            listen_addr,
            connect_pid,
            connect_addr,
            fd,
        } => {
            let args = ForwarderArgs::from_positional(
                &listen_pid,
                &listen_addr,
                &connect_pid,
                &connect_addr,
                &fd,
            )
            .context("Invalid forwarder arguments")?;
            forwarder::run(&args).context("Forwarder failed")
        }
        Commands::Device(command) => handle_device(command, config),
        Commands::Prune => {
            let registry = Registry::new(config.state_dir());
            let audit = audit_logger();
            let report = prune_stale_entries(&registry, Some(&audit));
            for (container, device, pid) in &report.removed {
                println!("removed\t{}\t{}\t{}", container, device, pid);
            }
            for (container, device, pid) in &report.adopted {
                println!("running\t{}\t{}\t{}", container, device, pid);
            }
            Ok(())
        }
    }
}

fn handle_device(command: DeviceCommand, config: &Config) -> Result<()> {
    let controller = controller(config)?;

    match command {
        DeviceCommand::Add(args) => {
            let pid = controller
                .create(&container_of(&args), &args.device, &args.device_config())
                .with_context(|| format!("Failed to add {}/{}", args.container, args.device))?;
            println!("{}", pid);
        }
        DeviceCommand::Restart(args) => {
            let pid = controller
                .restart(&container_of(&args), &args.device, &args.device_config())
                .with_context(|| {
                    format!("Failed to restart {}/{}", args.container, args.device)
                })?;
            println!("{}", pid);
        }
        DeviceCommand::Remove { container, device } => {
            controller
                .remove(&container, &device)
                .with_context(|| format!("Failed to remove {}/{}", container, device))?;
        }
        DeviceCommand::RemoveAll { container } => {
            controller
                .remove_all(&container)
                .with_context(|| format!("Failed to remove proxies of {}", container))?;
        }
        DeviceCommand::List { container } => {
            let records = match controller.registry().lookup_all(&container) {
                Ok(records) => records,
                Err(e) if e.is_not_found() => Vec::new(),
                Err(e) => return Err(e).context("Failed to read proxy records"),
            };
            for (device, pid) in records {
                let state = if controller.is_alive(pid) {
                    "running"
                } else {
                    "dead"
                };
                println!("{}\t{}\t{}", device, pid, state);
            }
        }
    }

    Ok(())
}

fn controller(config: &Config) -> Result<ProxyController<LocalDaemon>> {
    let registry = Arc::new(Registry::new(config.state_dir()));
    let settings = config
        .forwarder_settings()
        .context("Invalid forwarder configuration")?;

    info!("Using proxy registry at {:?}", registry.root());
    Ok(ProxyController::new(registry, LocalDaemon::new(), settings)
        .with_audit(Arc::new(audit_logger())))
}

fn audit_logger() -> AuditLogger {
    AuditLogger::new().unwrap_or_else(|e| {
        warn!("Audit logging disabled: {}", e);
        AuditLogger::new_null()
    })
}

fn container_of(args: &ProxyDeviceArgs) -> ContainerRef {
    ContainerRef::running(args.container.clone(), args.pid)
}
