//! Syslog integration for audit logging.

use std::fmt;
use std::sync::Mutex;

use syslog::{Facility, Formatter3164};
use tracing::{debug, error};

use super::error::TelemetryError;
use super::events::AuditEvent;

/// Syslog tag for all audit events.
pub const SYSLOG_TAG: &str = "DEVPROXY";

type SyslogWriter = syslog::Logger<syslog::LoggerBackend, Formatter3164>;

/// Audit logger that writes structured JSON events to syslog.
///
/// Shared between the controller and the CLI behind an `Arc`, so the writer
/// sits behind a mutex.
pub struct AuditLogger {
    /// `None` for a null logger.
    writer: Option<Mutex<SyslogWriter>>,
}

impl fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditLogger")
            .field("null", &self.is_null())
            .finish()
    }
}

impl AuditLogger {
    /// Connect to the local syslog daemon over its Unix socket.
    pub fn new() -> Result<Self, TelemetryError> {
        let formatter = Formatter3164 {
            facility: Facility::LOG_DAEMON,
            hostname: None,
            process: SYSLOG_TAG.to_string(),
            pid: std::process::id(),
        };

        let writer =
            syslog::unix(formatter).map_err(|e| TelemetryError::SyslogConnection(e.to_string()))?;

        debug!("Connected to syslog with tag '{}'", SYSLOG_TAG);
        Ok(Self {
            writer: Some(Mutex::new(writer)),
        })
    }

    /// A logger that discards all events.
    ///
    /// Used in tests and when no syslog daemon is reachable.
    pub fn new_null() -> Self {
        Self { writer: None }
    }

    /// Log an audit event as timestamped JSON.
    ///
    /// Failures are reported through `tracing` and otherwise ignored.
    pub fn log(&self, event: AuditEvent) {
        let Some(ref writer) = self.writer else {
            return;
        };

        let json = match serde_json::to_string(&event.with_timestamp()) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize audit event: {}", e);
                return;
            }
        };

        match writer.lock() {
            Ok(mut writer) => {
                if let Err(e) = writer.info(&json) {
                    error!("Failed to write to syslog: {}", e);
                }
            }
            Err(e) => {
                error!("Failed to acquire syslog writer lock: {}", e);
            }
        }
        debug!("Logged audit event: {}", json);
    }

    /// Check if this is a null logger.
    pub fn is_null(&self) -> bool {
        self.writer.is_none()
    }
}
