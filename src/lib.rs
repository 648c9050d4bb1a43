//! devproxy: network proxy devices for containers.
//!
//! A proxy device forwards stream connections between the host and a
//! container. Each device is served by its own forwarder process that
//! listens on one side (TCP or Unix socket) and relays every accepted
//! connection to an address on the other side.
//!
//! # Architecture
//!
//! - **Forwarder**: address parsing, listener bootstrap across `exec`, and
//!   the accept/dial/copy loop
//! - **Device**: daemon-side lifecycle (create, remove, restart) and the
//!   on-disk registry of forwarder PIDs
//! - **Config**: Hierarchical TOML configuration
//! - **Telemetry**: Structured syslog logging for audit trails

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod cli;
pub mod cli_handler;
pub mod config;
pub mod device;
pub mod forwarder;
pub mod telemetry;
