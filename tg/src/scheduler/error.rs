//! Scheduler error types

use statestore::StoreError;
use thiserror::Error;

use crate::domain::TaskStatus;

/// Errors returned by [`TaskScheduler`](super::TaskScheduler) operations
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Unknown worker: {0}")]
    UnknownWorker(String),

    /// Assignment would push the worker over max_parallel_tasks
    #[error(
        "Worker {worker_id} is at capacity: {active} active + {requested} requested exceeds max {max_parallel_tasks}"
    )]
    CapacityExceeded {
        worker_id: String,
        active: u32,
        requested: u32,
        max_parallel_tasks: u32,
    },

    #[error("Task {task_id} has unmet dependencies: {}", .unmet.join(", "))]
    DependencyUnsatisfied { task_id: String, unmet: Vec<String> },

    #[error("Task {task_id} is {status}, expected {expected}")]
    InvalidState {
        task_id: String,
        status: TaskStatus,
        expected: &'static str,
    },

    #[error("Dependency cycle detected: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("State persistence failed: {0}")]
    Store(#[from] StoreError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
