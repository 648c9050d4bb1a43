//! Audit logging for devproxy.
//!
//! Forwarder starts, stops and restarts are logged to syslog with the
//! `DEVPROXY` tag. This is separate from the `tracing` output on stderr,
//! which is for debugging.
//!
//! # Usage
//!
//! ```no_run
//! use devproxy::telemetry::{AuditEvent, AuditLogger};
//!
//! let audit = AuditLogger::new().unwrap_or_else(|_| AuditLogger::new_null());
//! audit.log(AuditEvent::ProxyRestart {
//!     container: "web-1".to_string(),
//!     device: "http".to_string(),
//!     old_pid: None,
//!     new_pid: 4242,
//! });
//! ```
//!
//! # Event Format
//!
//! ```json
//! {"ts":"2026-01-07T14:32:01Z","event":"proxy_start","container":"web-1","device":"http","pid":4242,"listen":"tcp:127.0.0.1:9000","connect":"unix:/run/app.sock"}
//! ```

mod error;
mod events;
mod syslog;

pub use error::TelemetryError;
pub use events::{AuditEvent, StopReason};
pub use syslog::{AuditLogger, SYSLOG_TAG};
