//! devproxy: network proxy devices for containers.
//!
//! This is the main entry point for the devproxy binary. It parses the
//! command line, sets up logging, loads configuration and dispatches to the
//! command handlers.
//!
//! # I/O
//!
//! - **Debug logging** (`tracing`) goes to stderr. Forwarders started by the
//!   daemon have their stderr redirected to a per-device log file.
//! - **Audit logging** goes to syslog, never to stdout or stderr.
//! - stdout carries command results only (PIDs, record listings).

use anyhow::{Context, Result};
use clap::Parser;
use devproxy::{cli::Cli, cli_handler, config::ConfigLoader};
use tracing::debug;

fn main() -> Result<()> {
    // Parse CLI arguments first (before any other initialization)
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load(&cli)
        .context("Failed to load configuration")?;

    init_tracing(cli.verbose, &config.general.log_level)?;
    debug!("Loaded configuration: {:?}", config);

    cli_handler::handle_command(cli.command, &config)
}

/// Initialize the tracing subscriber for debug/development logging.
///
/// This is separate from the audit telemetry which goes to syslog.
///
/// # Verbosity Levels
/// - 0 (default): `RUST_LOG`, else the configured `log_level`, else warnings
/// - 1 (-v): Info level
/// - 2 (-vv): Debug level
/// - 3+ (-vvv): Trace level
fn init_tracing(verbose: u8, log_level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let fallback = if log_level.is_empty() { "warn" } else { log_level };
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}
