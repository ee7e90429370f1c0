//! Scheduler configuration

use serde::{Deserialize, Serialize};

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Automatic failure → pending transitions allowed per task
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    3
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
        }
    }
}

impl SchedulerConfig {
    /// Whether a task that has failed `attempt_count` times goes back to the queue
    pub fn allows_retry(&self, attempt_count: u32) -> bool {
        attempt_count <= self.max_retries
    }
}
