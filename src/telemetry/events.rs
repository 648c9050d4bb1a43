//! Audit event types for structured logging.
//!
//! These events are logged to syslog with the `DEVPROXY` tag so that
//! operators can see which forwarders were started and stopped, and why.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Audit events for proxy device management.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Forwarder started for a device.
    ProxyStart {
        /// Container the device belongs to.
        container: String,
        /// Device name.
        device: String,
        /// Forwarder PID.
        pid: u32,
        /// Listen address, `scheme:endpoint`.
        listen: String,
        /// Connect address, `scheme:endpoint`.
        connect: String,
    },

    /// Forwarder stopped.
    ProxyStop {
        /// Container the device belongs to.
        container: String,
        /// Device name.
        device: String,
        /// Forwarder PID, `None` when the record was unreadable.
        pid: Option<u32>,
        /// Why it was stopped.
        reason: StopReason,
    },

    /// Forwarder replaced by a fresh one.
    ProxyRestart {
        /// Container the device belongs to.
        container: String,
        /// Device name.
        device: String,
        /// PID of the replaced forwarder, if one was recorded.
        old_pid: Option<u32>,
        /// PID of the new forwarder.
        new_pid: u32,
    },
}

/// Reasons for stopping a forwarder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Device removed.
    Removed,
    /// All devices of the container removed.
    ContainerStopped,
    /// Recorded process no longer running.
    Stale,
}

/// Wrapper for serializing events with timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct TimestampedEvent<'a> {
    /// ISO8601 timestamp.
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,

    /// The actual event (flattened into this struct).
    #[serde(flatten)]
    pub event: &'a AuditEvent,
}

impl AuditEvent {
    /// Wrap this event with a timestamp for serialization.
    pub fn with_timestamp(&self) -> TimestampedEvent<'_> {
        TimestampedEvent {
            timestamp: Utc::now(),
            event: self,
        }
    }
}
