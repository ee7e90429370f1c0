//! Event log entry types
//!
//! Every worker status transition, error report and restart decision is
//! recorded under its own event type. Heartbeat timeouts and explicit error
//! reports feed the same restart decision but are logged separately.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Kind of supervisor event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// First registration of a worker
    WorkerRegistered,
    /// Any status transition not covered by a more specific type
    StatusChanged,
    /// Health check found the heartbeat stale
    HeartbeatTimeout,
    /// Error pushed through the status channel
    WorkerError,
    /// Restart recorded and handed to the restart hook
    RestartScheduled,
    /// Restart budget exhausted, worker terminated
    RestartLimitExceeded,
    /// Heartbeat received after a restart
    WorkerRecovered,
    WorkerStopped,
    WorkerReset,
    WorkerRemoved,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkerRegistered => "worker_registered",
            Self::StatusChanged => "status_changed",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::WorkerError => "worker_error",
            Self::RestartScheduled => "restart_scheduled",
            Self::RestartLimitExceeded => "restart_limit_exceeded",
            Self::WorkerRecovered => "worker_recovered",
            Self::WorkerStopped => "worker_stopped",
            Self::WorkerReset => "worker_reset",
            Self::WorkerRemoved => "worker_removed",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One append-only event log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    /// Unique, time-ordered event ID
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    /// Worker the event is about
    pub subject_id: String,
    pub payload: Value,
}

impl EventLogEntry {
    pub fn new(event_type: EventType, subject_id: impl Into<String>, payload: Value, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            timestamp,
            event_type,
            subject_id: subject_id.into(),
            payload,
        }
    }
}
