//! TaskGraph - dependency-aware task scheduling with supervised workers
//!
//! Two cooperating components over a shared durable state directory:
//!
//! - A **task scheduler** holding a dependency graph of tasks. It releases
//!   tasks whose dependencies have completed, assigns them to workers within
//!   capacity limits, tracks progress and retries failures within a budget.
//! - A **worker supervisor** tracking worker liveness through heartbeats. It
//!   detects silent workers, records bounded restarts and keeps an audit log of
//!   every lifecycle event.
//!
//! The two share only worker IDs. Feeding supervisor findings back into the
//! scheduler is left to the caller.
//!
//! # Modules
//!
//! - [`scheduler`] - Task graph, readiness, assignment and retry
//! - [`supervisor`] - Heartbeats, restart budget and the monitor loop
//! - [`events`] - Retention-bounded JSONL event log
//! - [`domain`] - Task and worker types
//! - [`clock`] - Injectable time source
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod clock;
pub mod config;
pub mod domain;
pub mod events;
pub mod scheduler;
pub mod supervisor;

// Re-export commonly used types
pub use clock::{ManualTimeProvider, SystemTimeProvider, TimeProvider};
pub use config::{Config, StorageConfig};
pub use domain::{Task, TaskDefinition, TaskRuntimeState, TaskStatus, WorkerDefinition, WorkerRuntimeState, WorkerStatus};
pub use events::{EventLog, EventLogEntry, EventType, RetentionPolicy};
pub use scheduler::{
    CriticalPath, SchedulerConfig, SchedulerError, SchedulerResult, SchedulerStats, TaskScheduler, TaskSummary,
    WorkerLoad,
};
pub use supervisor::{
    CommandRestartHook, HealthReport, MonitorCallback, MonitorTick, NoopRestartHook, RestartHook, RestartOutcome,
    RestartRequest, StatusSnapshot, SupervisorConfig, SupervisorError, SupervisorResult, WorkerSupervisor,
};
