//! Task graph scheduler
//!
//! Tracks task definitions and their lifecycle, worker capacity, and
//! dependency readiness. Assignment is all-or-nothing against each worker's
//! max_parallel_tasks, and failed tasks re-queue within a retry budget.

mod config;
mod core;
mod error;
mod graph;
mod report;

pub use config::SchedulerConfig;
pub use core::{STATE_DOCUMENT, TaskScheduler};
pub use error::{SchedulerError, SchedulerResult};
pub use graph::{critical_path, missing_dependencies, topological_sort, validate_dependency_graph};
pub use report::{CriticalPath, SchedulerStats, TaskSummary, WorkerLoad};
