//! Worker domain types
//!
//! The scheduler and the supervisor track workers independently and share only
//! the worker ID:
//! - [`WorkerDefinition`] is the scheduler's view (capacity bookkeeping)
//! - [`WorkerRuntimeState`] is the supervisor's view (liveness and restarts)

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Worker capacity as registered with the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerDefinition {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(rename = "type", default)]
    pub worker_type: String,

    /// Relative throughput weight, reported alongside load
    #[serde(default = "default_capacity")]
    pub capacity: u32,

    /// Hard ceiling on concurrently assigned tasks
    #[serde(default = "default_max_parallel_tasks")]
    pub max_parallel_tasks: u32,

    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

fn default_capacity() -> u32 {
    1
}

fn default_max_parallel_tasks() -> u32 {
    1
}

impl WorkerDefinition {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        worker_type: impl Into<String>,
        max_parallel_tasks: u32,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            worker_type: worker_type.into(),
            capacity: default_capacity(),
            max_parallel_tasks,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Apply a re-registration: descriptive fields are replaced, metadata is merged
    pub(crate) fn merge(&mut self, other: WorkerDefinition) {
        self.name = other.name;
        self.worker_type = other.worker_type;
        self.capacity = other.capacity;
        self.max_parallel_tasks = other.max_parallel_tasks;
        self.metadata.extend(other.metadata);
    }
}

/// Worker liveness status
///
/// initializing → idle ⇄ busy → error → restarting → {idle | terminated}.
/// `stopped` and `terminated` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Registered, no heartbeat yet
    #[default]
    Initializing,
    Idle,
    Busy,
    /// Reported failure, waiting for a restart decision
    Error,
    /// Restart requested, waiting for the worker to heartbeat again
    Restarting,
    /// Explicitly stopped
    Stopped,
    /// Restart budget exhausted
    Terminated,
}

impl WorkerStatus {
    pub const ALL: [WorkerStatus; 7] = [
        Self::Initializing,
        Self::Idle,
        Self::Busy,
        Self::Error,
        Self::Restarting,
        Self::Stopped,
        Self::Terminated,
    ];

    /// No transition leaves this status without an explicit reset
    pub fn is_absorbing(&self) -> bool {
        matches!(self, Self::Stopped | Self::Terminated)
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::Idle => write!(f, "idle"),
            Self::Busy => write!(f, "busy"),
            Self::Error => write!(f, "error"),
            Self::Restarting => write!(f, "restarting"),
            Self::Stopped => write!(f, "stopped"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

impl std::str::FromStr for WorkerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "initializing" => Ok(Self::Initializing),
            "idle" => Ok(Self::Idle),
            "busy" => Ok(Self::Busy),
            "error" => Ok(Self::Error),
            "restarting" => Ok(Self::Restarting),
            "stopped" => Ok(Self::Stopped),
            "terminated" => Ok(Self::Terminated),
            _ => Err(format!("Unknown worker status: {}", s)),
        }
    }
}

/// Supervisor-owned liveness record for one worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRuntimeState {
    pub id: String,
    pub name: String,

    #[serde(rename = "type")]
    pub worker_type: String,

    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,

    pub status: WorkerStatus,

    /// Last self-reported heartbeat (None until the first one arrives)
    pub last_heartbeat: Option<DateTime<Utc>>,

    /// Restarts recorded since registration or the last reset
    pub restart_count: u32,

    pub current_task_id: Option<String>,

    pub last_error: Option<String>,

    pub registered_at: DateTime<Utc>,

    /// When the most recent restart was requested
    pub last_restart_at: Option<DateTime<Utc>>,

    pub updated_at: DateTime<Utc>,
}

impl WorkerRuntimeState {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        worker_type: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            worker_type: worker_type.into(),
            metadata: BTreeMap::new(),
            status: WorkerStatus::Initializing,
            last_heartbeat: None,
            restart_count: 0,
            current_task_id: None,
            last_error: None,
            registered_at: now,
            last_restart_at: None,
            updated_at: now,
        }
    }

    /// Point in time heartbeat staleness is measured from
    ///
    /// A worker that never sent a heartbeat is measured from registration, and a
    /// restart request restarts the clock so the respawned process gets a full
    /// timeout window to report in.
    pub fn liveness_reference(&self) -> DateTime<Utc> {
        let heartbeat = self.last_heartbeat.unwrap_or(self.registered_at);
        match self.last_restart_at {
            Some(restart) if restart > heartbeat => restart,
            _ => heartbeat,
        }
    }
}
