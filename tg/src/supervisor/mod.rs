//! Worker health supervisor
//!
//! Tracks worker liveness through self-reported heartbeats, records restart
//! decisions within a restart budget, and logs every transition to the event
//! log. A polling monitor loop ties health checks to auto-restart.

mod config;
mod core;
mod error;
mod hook;
mod monitor;
mod report;

pub use config::SupervisorConfig;
pub use core::{EVENT_LOG_FILE, STATE_DOCUMENT, WorkerSupervisor};
pub use error::{SupervisorError, SupervisorResult};
pub use hook::{CommandRestartHook, NoopRestartHook, RestartHook, RestartRequest};
pub use monitor::{MonitorCallback, MonitorTick, stop_monitor};
pub use report::{HealthReport, RestartOutcome, StatusSnapshot};
