//! Event log - append-only JSONL record with retention
//!
//! Entries are kept in memory for queries and mirrored to a JSONL file. Every
//! append enforces the retention policy: entries older than the age window are
//! dropped first, then the oldest entries until the count ceiling holds.

use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

use super::types::EventLogEntry;

/// Errors from event log persistence
#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("Event log I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Event serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// How long and how many entries are retained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age: chrono::Duration,
    pub max_entries: usize,
}

impl RetentionPolicy {
    pub fn new(max_age: chrono::Duration, max_entries: usize) -> Self {
        Self { max_age, max_entries }
    }
}

/// Append-only event log
#[derive(Debug)]
pub struct EventLog {
    /// Backing JSONL file (None for in-memory logs)
    path: Option<PathBuf>,
    entries: VecDeque<EventLogEntry>,
    retention: RetentionPolicy,
}

impl EventLog {
    /// Create a log that is never written to disk
    pub fn in_memory(retention: RetentionPolicy) -> Self {
        Self {
            path: None,
            entries: VecDeque::new(),
            retention,
        }
    }

    /// Open the log at `path`, loading and pruning existing entries
    pub fn open(path: impl AsRef<Path>, retention: RetentionPolicy, now: DateTime<Utc>) -> Result<Self, EventLogError> {
        let path = path.as_ref().to_path_buf();
        debug!(?path, "EventLog::open: called");

        let (entries, unreadable) = read_entries(&path)?;
        let mut log = Self {
            path: Some(path),
            entries,
            retention,
        };

        let pruned = log.prune(now);
        if pruned > 0 || unreadable > 0 {
            debug!(pruned, unreadable, "EventLog::open: rewriting log");
            log.rewrite()?;
        }

        debug!(count = log.entries.len(), "EventLog::open: loaded entries");
        Ok(log)
    }

    /// Replace the in-memory entries with the current file content
    ///
    /// Another process may have appended or pruned since this log was opened.
    /// Callers sharing the file across processes reload and append while
    /// holding the same exclusive lock, otherwise a prune can rewrite the file
    /// from a stale copy. No-op for in-memory logs.
    pub fn reload(&mut self) -> Result<(), EventLogError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        debug!(?path, "EventLog::reload: called");

        let (entries, unreadable) = read_entries(path)?;
        if unreadable > 0 {
            warn!(unreadable, "EventLog::reload: skipped unreadable lines");
        }
        self.entries = entries;
        Ok(())
    }

    /// Append an entry, enforcing retention relative to its timestamp
    pub fn append(&mut self, entry: EventLogEntry) -> Result<(), EventLogError> {
        debug!(event_type = %entry.event_type, subject_id = %entry.subject_id, "EventLog::append: called");
        let now = entry.timestamp;
        self.entries.push_back(entry);

        let pruned = self.prune(now);
        if pruned > 0 {
            debug!(pruned, "EventLog::append: retention pruned entries");
            self.rewrite()
        } else {
            self.append_last()
        }
    }

    /// Newest entries first, at most `limit`
    pub fn recent(&self, limit: usize) -> Vec<EventLogEntry> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }

    /// Entries about one subject, oldest first
    pub fn for_subject(&self, subject_id: &str) -> Vec<EventLogEntry> {
        self.entries
            .iter()
            .filter(|e| e.subject_id == subject_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Drop entries outside the age window, then the oldest over the ceiling
    fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();

        if let Some(cutoff) = now.checked_sub_signed(self.retention.max_age) {
            self.entries.retain(|e| e.timestamp >= cutoff);
        }

        while self.entries.len() > self.retention.max_entries {
            self.entries.pop_front();
        }

        before - self.entries.len()
    }

    fn append_last(&self) -> Result<(), EventLogError> {
        let (Some(path), Some(entry)) = (&self.path, self.entries.back()) else {
            return Ok(());
        };

        let line = serde_json::to_string(entry)?;
        let io_err = |source| EventLogError::Io {
            path: path.clone(),
            source,
        };

        let mut file = OpenOptions::new().create(true).append(true).open(path).map_err(io_err)?;
        writeln!(file, "{}", line).map_err(io_err)?;
        file.flush().map_err(io_err)?;
        Ok(())
    }

    fn rewrite(&self) -> Result<(), EventLogError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut content = String::new();
        for entry in &self.entries {
            content.push_str(&serde_json::to_string(entry)?);
            content.push('\n');
        }

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let io_err = |source| EventLogError::Io {
            path: path.clone(),
            source,
        };

        let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(content.as_bytes()).map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}

/// Parse a JSONL file, returning the entries and the number of unreadable lines
fn read_entries(path: &Path) -> Result<(VecDeque<EventLogEntry>, usize), EventLogError> {
    let mut entries = VecDeque::new();
    let mut unreadable = 0usize;

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(?path, "EventLog: no existing log");
            return Ok((entries, unreadable));
        }
        Err(e) => {
            return Err(EventLogError::Io {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };

    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<EventLogEntry>(line) {
            Ok(entry) => entries.push_back(entry),
            Err(e) => {
                warn!(line, error = %e, "EventLog: failed to parse line");
                unreadable += 1;
            }
        }
    }
    Ok((entries, unreadable))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use chrono::Duration;
    use serde_json::json;
    use tempfile::tempdir;

    fn policy(max_age_secs: i64, max_entries: usize) -> RetentionPolicy {
        RetentionPolicy::new(Duration::seconds(max_age_secs), max_entries)
    }

    fn entry(subject: &str, at: DateTime<Utc>) -> EventLogEntry {
        EventLogEntry::new(EventType::StatusChanged, subject, json!({ "to": "idle" }), at)
    }

    #[test]
    fn test_append_and_query() {
        let now = Utc::now();
        let mut log = EventLog::in_memory(policy(3600, 100));

        log.append(entry("w1", now)).unwrap();
        log.append(entry("w2", now + Duration::seconds(1))).unwrap();
        log.append(entry("w1", now + Duration::seconds(2))).unwrap();

        assert_eq!(log.len(), 3);

        let recent = log.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].subject_id, "w1");
        assert_eq!(recent[1].subject_id, "w2");

        let w1 = log.for_subject("w1");
        assert_eq!(w1.len(), 2);
        assert!(w1[0].timestamp < w1[1].timestamp);
    }

    #[test]
    fn test_count_ceiling_prunes_oldest() {
        let now = Utc::now();
        let mut log = EventLog::in_memory(policy(3600, 3));

        for i in 0..5 {
            log.append(entry(&format!("w{}", i), now + Duration::seconds(i))).unwrap();
        }

        assert_eq!(log.len(), 3);
        let subjects: Vec<_> = log.recent(10).into_iter().map(|e| e.subject_id).collect();
        assert_eq!(subjects, vec!["w4", "w3", "w2"]);
    }

    #[test]
    fn test_age_window_prunes_on_write() {
        let now = Utc::now();
        let mut log = EventLog::in_memory(policy(60, 100));

        log.append(entry("old", now)).unwrap();
        log.append(entry("new", now + Duration::seconds(61))).unwrap();

        assert_eq!(log.len(), 1);
        assert_eq!(log.recent(1)[0].subject_id, "new");
    }

    #[test]
    fn test_persists_and_reloads() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("events.jsonl");
        let now = Utc::now();

        {
            let mut log = EventLog::open(&path, policy(3600, 100), now).unwrap();
            log.append(entry("w1", now)).unwrap();
            log.append(entry("w2", now)).unwrap();
        }

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);

        let log = EventLog::open(&path, policy(3600, 100), now).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log.path(), Some(path.as_path()));
    }

    #[test]
    fn test_pruning_rewrites_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("events.jsonl");
        let now = Utc::now();

        let mut log = EventLog::open(&path, policy(3600, 2), now).unwrap();
        for i in 0..4 {
            log.append(entry(&format!("w{}", i), now + Duration::seconds(i))).unwrap();
        }

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("\"w3\""));
        assert!(!content.contains("\"w0\""));
    }

    #[test]
    fn test_open_prunes_expired_entries() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("events.jsonl");
        let now = Utc::now();

        {
            let mut log = EventLog::open(&path, policy(3600, 100), now).unwrap();
            log.append(entry("w1", now)).unwrap();
        }

        let later = now + Duration::hours(2);
        let log = EventLog::open(&path, policy(3600, 100), later).unwrap();
        assert!(log.is_empty());
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 0);
    }

    #[test]
    fn test_open_skips_unreadable_lines() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("events.jsonl");
        let now = Utc::now();

        let good = serde_json::to_string(&entry("w1", now)).unwrap();
        fs::write(&path, format!("{}\nnot json\n\n", good)).unwrap();

        let log = EventLog::open(&path, policy(3600, 100), now).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 1);
    }

    #[test]
    fn test_reload_keeps_entries_from_other_writers() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("events.jsonl");
        let now = Utc::now();

        let mut first = EventLog::open(&path, policy(3600, 3), now).unwrap();
        let mut second = EventLog::open(&path, policy(3600, 3), now).unwrap();

        first.append(entry("a1", now)).unwrap();
        second.reload().unwrap();
        second.append(entry("b1", now + Duration::seconds(1))).unwrap();
        first.reload().unwrap();
        first.append(entry("a2", now + Duration::seconds(2))).unwrap();
        second.reload().unwrap();
        // Over the ceiling: the rewrite must start from the file, not a stale copy
        second.append(entry("b2", now + Duration::seconds(3))).unwrap();

        let reopened = EventLog::open(&path, policy(3600, 3), now + Duration::seconds(3)).unwrap();
        let subjects: Vec<_> = reopened.recent(10).into_iter().map(|e| e.subject_id).collect();
        assert_eq!(subjects, vec!["b2", "a2", "b1"]);
    }

    #[test]
    fn test_reload_in_memory_is_noop() {
        let mut log = EventLog::in_memory(policy(3600, 100));
        log.append(entry("w1", Utc::now())).unwrap();
        log.reload().unwrap();
        assert_eq!(log.len(), 1);
    }
}
