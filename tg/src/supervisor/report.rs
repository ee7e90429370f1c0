//! Supervisor results and snapshots

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{WorkerRuntimeState, WorkerStatus};

/// Result of a restart request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartOutcome {
    /// Worker is restarting; the hook was handed this attempt
    Scheduled { attempt: u32, delay: Duration },
    /// Restart budget exhausted, worker is terminated for good
    Terminated { restart_count: u32 },
    /// Worker is stopped or terminated; nothing was recorded
    Ignored { status: WorkerStatus },
}

/// Result of one health check pass over all workers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub checked_at: Option<DateTime<Utc>>,
    /// Heartbeat within the timeout and not in error
    pub healthy: Vec<String>,
    /// Heartbeat at least as old as the timeout
    pub stale: Vec<String>,
    /// Restart scheduled during this pass
    pub restarted: Vec<String>,
    /// Terminated during this pass
    pub terminated: Vec<String>,
}

impl HealthReport {
    pub fn is_all_healthy(&self) -> bool {
        self.stale.is_empty() && self.restarted.is_empty() && self.terminated.is_empty()
    }
}

/// Aggregate worker status at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub timestamp: DateTime<Utc>,
    pub total: usize,
    /// Count per status name, every status present
    pub by_status: BTreeMap<String, usize>,
}

impl StatusSnapshot {
    pub(crate) fn new<'a>(timestamp: DateTime<Utc>, workers: impl IntoIterator<Item = &'a WorkerRuntimeState>) -> Self {
        let mut by_status: BTreeMap<String, usize> = WorkerStatus::ALL.iter().map(|s| (s.to_string(), 0)).collect();
        let mut total = 0;
        for worker in workers {
            total += 1;
            *by_status.entry(worker.status.to_string()).or_default() += 1;
        }
        Self {
            timestamp,
            total,
            by_status,
        }
    }

    pub fn count(&self, status: WorkerStatus) -> usize {
        self.by_status.get(&status.to_string()).copied().unwrap_or(0)
    }
}
