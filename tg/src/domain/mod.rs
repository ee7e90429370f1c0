//! Domain types for TaskGraph
//!
//! Tasks (definition + runtime state) and workers (scheduler capacity view and
//! supervisor liveness view). Status fields are exhaustive enums.

mod task;
mod worker;

pub use task::{Task, TaskDefinition, TaskRuntimeState, TaskStatus};
pub use worker::{WorkerDefinition, WorkerRuntimeState, WorkerStatus};
