//! Supervisor error types

use statestore::StoreError;
use thiserror::Error;

use crate::domain::WorkerStatus;
use crate::events::EventLogError;

/// Errors returned by [`WorkerSupervisor`](super::WorkerSupervisor) operations
///
/// An exhausted restart budget is not an error: it surfaces as
/// [`RestartOutcome::Terminated`](super::RestartOutcome::Terminated).
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Unknown worker: {0}")]
    UnknownWorker(String),

    #[error("Worker {worker_id} cannot move from {from} to {to}")]
    InvalidTransition {
        worker_id: String,
        from: WorkerStatus,
        to: WorkerStatus,
    },

    #[error("State persistence failed: {0}")]
    Store(#[from] StoreError),

    #[error("Event log write failed: {0}")]
    EventLog(#[from] EventLogError),
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;
