//! Supervisor event log
//!
//! Append-only record of worker transitions, queryable by recency and by
//! subject, with age and count retention enforced on every write.

mod log;
mod types;

pub use log::{EventLog, EventLogError, RetentionPolicy};
pub use types::{EventLogEntry, EventType};
