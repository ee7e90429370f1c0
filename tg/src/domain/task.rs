//! Task domain types
//!
//! A task pairs an immutable [`TaskDefinition`] with scheduler-owned
//! [`TaskRuntimeState`].

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Task lifecycle status
///
/// pending → assigned → running → {completed | failed}; failed tasks may return
/// to pending through the retry budget or a manual retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for dependencies and a worker
    #[default]
    Pending,
    /// Handed to a worker, no progress reported yet
    Assigned,
    /// Worker has reported progress
    Running,
    /// Finished successfully
    Completed,
    /// Retry budget exhausted
    Failed,
    /// Withdrawn before it was assigned
    Cancelled,
}

impl TaskStatus {
    /// Every status, in lifecycle order
    pub const ALL: [TaskStatus; 6] = [
        Self::Pending,
        Self::Assigned,
        Self::Running,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Occupies a worker slot
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Assigned | Self::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Assigned => write!(f, "assigned"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "assigned" => Ok(Self::Assigned),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown task status: {}", s)),
        }
    }
}

/// What a task is: identity, graph edges and scheduling hints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Unique identifier
    pub id: String,

    /// Category label
    #[serde(rename = "type", default)]
    pub task_type: String,

    /// Display name
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Task IDs that must complete before this task is ready
    #[serde(default)]
    pub dependencies: BTreeSet<String>,

    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// Higher is scheduled sooner
    #[serde(default)]
    pub priority: i32,

    /// Expected run time in seconds, used as the critical path weight
    #[serde(default, rename = "estimated_duration")]
    pub estimated_duration_secs: u64,

    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl TaskDefinition {
    pub fn new(id: impl Into<String>, task_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.into(),
            name: name.into(),
            description: String::new(),
            dependencies: BTreeSet::new(),
            tags: BTreeSet::new(),
            priority: 0,
            estimated_duration_secs: 0,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_estimated_duration(mut self, secs: u64) -> Self {
        self.estimated_duration_secs = secs;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Dependencies not contained in `completed`
    pub fn unmet_dependencies<'a>(&'a self, completed: &HashSet<&str>) -> Vec<&'a str> {
        self.dependencies
            .iter()
            .map(String::as_str)
            .filter(|dep| !completed.contains(dep))
            .collect()
    }
}

/// Scheduler-owned mutable half of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TaskRuntimeState {
    pub status: TaskStatus,

    /// Fraction done, always within [0, 1]
    pub progress: f64,

    pub assigned_worker_id: Option<String>,

    /// Failed attempts so far
    pub attempt_count: u32,

    pub last_error: Option<String>,

    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRuntimeState {
    /// Back to the queue with no worker attached
    pub(crate) fn requeue(&mut self) {
        self.status = TaskStatus::Pending;
        self.progress = 0.0;
        self.assigned_worker_id = None;
        self.assigned_at = None;
        self.started_at = None;
        self.completed_at = None;
    }
}

/// A task definition together with its runtime state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub definition: TaskDefinition,
    pub state: TaskRuntimeState,
}

impl Task {
    /// Fresh pending task
    pub fn new(definition: TaskDefinition) -> Self {
        Self {
            definition,
            state: TaskRuntimeState::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn status(&self) -> TaskStatus {
        self.state.status
    }

    /// Pending with every dependency in `completed`
    pub fn is_ready(&self, completed: &HashSet<&str>) -> bool {
        self.state.status == TaskStatus::Pending
            && self
                .definition
                .dependencies
                .iter()
                .all(|dep| completed.contains(dep.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display_and_parse() {
        for status in TaskStatus::ALL {
            let parsed: TaskStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert_eq!("RUNNING".parse::<TaskStatus>().unwrap(), TaskStatus::Running);
        assert!("done".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_status_classification() {
        assert!(TaskStatus::Assigned.is_active());
        assert!(TaskStatus::Running.is_active());
        assert!(!TaskStatus::Pending.is_active());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn test_readiness_requires_all_dependencies() {
        let task = Task::new(TaskDefinition::new("c", "build", "C").with_dependencies(["a", "b"]));

        let none = HashSet::new();
        assert!(!task.is_ready(&none));

        let only_a: HashSet<&str> = ["a"].into_iter().collect();
        assert!(!task.is_ready(&only_a));
        assert_eq!(task.definition.unmet_dependencies(&only_a), vec!["b"]);

        let both: HashSet<&str> = ["a", "b"].into_iter().collect();
        assert!(task.is_ready(&both));
    }

    #[test]
    fn test_readiness_requires_pending() {
        let mut task = Task::new(TaskDefinition::new("a", "build", "A"));
        let completed = HashSet::new();
        assert!(task.is_ready(&completed));

        task.state.status = TaskStatus::Assigned;
        assert!(!task.is_ready(&completed));
    }

    #[test]
    fn test_definition_deserializes_with_defaults() {
        let yaml = r#"
id: compile
type: build
dependencies: [fetch]
priority: 5
estimated_duration: 120
"#;
        let def: TaskDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(def.id, "compile");
        assert_eq!(def.task_type, "build");
        assert_eq!(def.priority, 5);
        assert_eq!(def.estimated_duration_secs, 120);
        assert!(def.dependencies.contains("fetch"));
        assert!(def.tags.is_empty());
        assert!(def.name.is_empty());
    }

    #[test]
    fn test_requeue_clears_assignment() {
        let mut state = TaskRuntimeState {
            status: TaskStatus::Running,
            progress: 0.6,
            assigned_worker_id: Some("w1".to_string()),
            attempt_count: 1,
            last_error: Some("boom".to_string()),
            assigned_at: Some(Utc::now()),
            started_at: Some(Utc::now()),
            completed_at: None,
        };
        state.requeue();
        assert_eq!(state.status, TaskStatus::Pending);
        assert_eq!(state.progress, 0.0);
        assert!(state.assigned_worker_id.is_none());
        assert!(state.started_at.is_none());
        assert_eq!(state.attempt_count, 1);
        assert_eq!(state.last_error.as_deref(), Some("boom"));
    }
}
