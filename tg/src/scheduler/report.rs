//! Read-only views produced by the scheduler

use serde::{Deserialize, Serialize};

use crate::domain::{Task, TaskStatus, WorkerDefinition};

/// Task counts by status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub total: usize,
    pub pending: usize,
    pub assigned: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Completed share of all tasks, 0-100
    pub percent_complete: f64,
}

impl TaskSummary {
    pub(crate) fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut summary = Self::default();
        for task in tasks {
            summary.total += 1;
            match task.status() {
                TaskStatus::Pending => summary.pending += 1,
                TaskStatus::Assigned => summary.assigned += 1,
                TaskStatus::Running => summary.running += 1,
                TaskStatus::Completed => summary.completed += 1,
                TaskStatus::Failed => summary.failed += 1,
                TaskStatus::Cancelled => summary.cancelled += 1,
            }
        }
        if summary.total > 0 {
            summary.percent_complete = summary.completed as f64 / summary.total as f64 * 100.0;
        }
        summary
    }

    /// Count for one status
    pub fn count(&self, status: TaskStatus) -> usize {
        match status {
            TaskStatus::Pending => self.pending,
            TaskStatus::Assigned => self.assigned,
            TaskStatus::Running => self.running,
            TaskStatus::Completed => self.completed,
            TaskStatus::Failed => self.failed,
            TaskStatus::Cancelled => self.cancelled,
        }
    }
}

/// A worker's current load against its limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerLoad {
    pub worker_id: String,
    pub name: String,
    pub worker_type: String,
    /// Tasks assigned to the worker and not yet resolved
    pub active_tasks: u32,
    pub max_parallel_tasks: u32,
    pub capacity: u32,
    pub available_slots: u32,
    /// active_tasks / max_parallel_tasks
    pub utilization: f64,
    pub task_ids: Vec<String>,
}

impl WorkerLoad {
    pub(crate) fn new(worker: &WorkerDefinition, task_ids: Vec<String>) -> Self {
        let active_tasks = u32::try_from(task_ids.len()).unwrap_or(u32::MAX);
        let utilization = if worker.max_parallel_tasks == 0 {
            0.0
        } else {
            f64::from(active_tasks) / f64::from(worker.max_parallel_tasks)
        };

        Self {
            worker_id: worker.id.clone(),
            name: worker.name.clone(),
            worker_type: worker.worker_type.clone(),
            active_tasks,
            max_parallel_tasks: worker.max_parallel_tasks,
            capacity: worker.capacity,
            available_slots: worker.max_parallel_tasks.saturating_sub(active_tasks),
            utilization,
            task_ids,
        }
    }
}

/// Lifetime counters, persisted with the scheduler state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerStats {
    pub total_added: u64,
    pub total_assigned: u64,
    pub total_completed: u64,
    /// Every failed completion, including ones that were retried
    pub failed_attempts: u64,
    pub automatic_retries: u64,
    pub manual_retries: u64,
    pub terminal_failures: u64,
    pub total_cancelled: u64,
}

/// The dependency chain with the largest cumulative estimated duration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticalPath {
    /// Task IDs, dependencies first
    pub task_ids: Vec<String>,
    pub total_duration_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskDefinition;

    fn task(id: &str, status: TaskStatus) -> Task {
        let mut task = Task::new(TaskDefinition::new(id, "build", id));
        task.state.status = status;
        task
    }

    #[test]
    fn test_summary_counts() {
        let tasks = vec![
            task("a", TaskStatus::Completed),
            task("b", TaskStatus::Completed),
            task("c", TaskStatus::Running),
            task("d", TaskStatus::Pending),
        ];

        let summary = TaskSummary::from_tasks(&tasks);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.count(TaskStatus::Running), 1);
        assert_eq!(summary.count(TaskStatus::Pending), 1);
        assert!((summary.percent_complete - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_summary() {
        let summary = TaskSummary::from_tasks(&[]);
        assert_eq!(summary.total, 0);
        assert_eq!(summary.percent_complete, 0.0);
    }

    #[test]
    fn test_worker_load() {
        let worker = WorkerDefinition::new("w1", "Worker 1", "cpu", 4);
        let load = WorkerLoad::new(&worker, vec!["a".to_string()]);
        assert_eq!(load.active_tasks, 1);
        assert_eq!(load.available_slots, 3);
        assert!((load.utilization - 0.25).abs() < f64::EPSILON);

        let zero = WorkerDefinition::new("w2", "Worker 2", "cpu", 0);
        let load = WorkerLoad::new(&zero, vec![]);
        assert_eq!(load.available_slots, 0);
        assert_eq!(load.utilization, 0.0);
    }
}
