//! StateStore - durable whole-document state persistence
//!
//! Each named document is a single JSON file that is read whole at startup and
//! rewritten whole after every mutation. Writes are atomic (temp file + rename)
//! and serialized across processes with an advisory lock. Callers that modify a
//! document hold the lock across the whole load, modify, save cycle through
//! [`StoreLock`].
//!
//! # Layout
//!
//! ```text
//! {state-dir}/
//! ├── .lock            # advisory lock
//! ├── scheduler.json   # one file per document
//! └── supervisor.json
//! ```
//!
//! # Example
//!
//! ```ignore
//! use statestore::StateStore;
//!
//! let store = StateStore::open("/var/lib/taskgraph")?;
//! store.save("scheduler", &snapshot)?;
//! let restored: Option<Snapshot> = store.load("scheduler")?;
//!
//! let lock = store.lock()?;
//! let mut current: Snapshot = lock.load("scheduler")?.unwrap_or_default();
//! current.version += 1;
//! lock.save("scheduler", &current)?;
//! ```

mod error;
mod store;

pub use error::StoreError;
pub use store::{StateStore, StoreLock};

/// File extension used for every document
pub const DOCUMENT_EXTENSION: &str = "json";
