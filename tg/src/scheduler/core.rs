//! Task graph scheduler implementation

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use statestore::{StateStore, StoreLock};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::clock::TimeProvider;
use crate::domain::{Task, TaskDefinition, TaskStatus, WorkerDefinition};

use super::config::SchedulerConfig;
use super::error::{SchedulerError, SchedulerResult};
use super::graph;
use super::report::{CriticalPath, SchedulerStats, TaskSummary, WorkerLoad};

/// Store document holding the scheduler state
pub const STATE_DOCUMENT: &str = "scheduler";

/// Internal state protected by mutex, persisted as a whole
#[derive(Debug, Default, Serialize, Deserialize)]
struct SchedulerState {
    /// Tasks in insertion order
    tasks: Vec<Task>,

    workers: BTreeMap<String, WorkerDefinition>,

    #[serde(default)]
    stats: SchedulerStats,

    /// Task ID -> position in `tasks`
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl SchedulerState {
    fn rebuild_index(&mut self) {
        self.index = self
            .tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id().to_string(), i))
            .collect();
    }

    /// Insert a fresh task, returning false if the ID is taken
    fn insert(&mut self, definition: TaskDefinition) -> bool {
        if self.index.contains_key(&definition.id) {
            return false;
        }
        self.index.insert(definition.id.clone(), self.tasks.len());
        self.tasks.push(Task::new(definition));
        self.stats.total_added += 1;
        true
    }

    fn position(&self, task_id: &str) -> SchedulerResult<usize> {
        self.index
            .get(task_id)
            .copied()
            .ok_or_else(|| SchedulerError::UnknownTask(task_id.to_string()))
    }

    fn completed_ids(&self) -> HashSet<&str> {
        self.tasks
            .iter()
            .filter(|t| t.status() == TaskStatus::Completed)
            .map(Task::id)
            .collect()
    }

    /// Tasks holding a slot on the worker
    fn active_task_ids(&self, worker_id: &str) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|t| t.status().is_active() && t.state.assigned_worker_id.as_deref() == Some(worker_id))
            .map(|t| t.id().to_string())
            .collect()
    }

    fn available(&self) -> Vec<Task> {
        let completed = self.completed_ids();
        self.tasks.iter().filter(|t| t.is_ready(&completed)).cloned().collect()
    }
}

/// The TaskScheduler tracks task definitions and runtime state, worker
/// capacity and dependency readiness.
///
/// With a store, every call first reloads the whole state under the store lock,
/// and a mutating call keeps that lock until the new state is written. One
/// mutation completes entirely before the next begins, even across processes
/// sharing the state directory. If the write fails the error is returned and
/// the next call starts again from the stored state.
pub struct TaskScheduler {
    config: SchedulerConfig,
    store: Option<StateStore>,
    clock: Arc<dyn TimeProvider>,
    inner: Mutex<SchedulerState>,
}

impl TaskScheduler {
    /// Create a scheduler that keeps state in memory only
    pub fn in_memory(config: SchedulerConfig, clock: Arc<dyn TimeProvider>) -> Self {
        debug!(?config, "TaskScheduler::in_memory: called");
        Self {
            config,
            store: None,
            clock,
            inner: Mutex::new(SchedulerState::default()),
        }
    }

    /// Load prior state from the store and merge startup definitions
    ///
    /// A startup definition whose ID is already known is ignored: existing
    /// runtime state always wins over a fresh default.
    pub fn open(
        config: SchedulerConfig,
        store: StateStore,
        clock: Arc<dyn TimeProvider>,
        initial_tasks: Vec<TaskDefinition>,
    ) -> SchedulerResult<Self> {
        debug!(?config, root = %store.root().display(), initial = initial_tasks.len(), "TaskScheduler::open: called");

        let lock = store.lock()?;
        let mut state = lock.load::<SchedulerState>(STATE_DOCUMENT)?.unwrap_or_default();
        state.rebuild_index();
        let loaded = state.tasks.len();

        let mut merged = 0usize;
        for definition in initial_tasks {
            if state.insert(definition) {
                merged += 1;
            }
        }

        if merged > 0 {
            lock.save(STATE_DOCUMENT, &state)?;
        }
        drop(lock);

        info!(loaded, merged, workers = state.workers.len(), "Scheduler state opened");

        Ok(Self {
            config,
            store: Some(store),
            clock,
            inner: Mutex::new(state),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Take the store lock and reload the state under it
    ///
    /// Returns `None` for in-memory schedulers. Mutations keep the guard until
    /// [`persist`](Self::persist) has run.
    fn sync(&self, state: &mut SchedulerState) -> SchedulerResult<Option<StoreLock<'_>>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let lock = store.lock()?;
        *state = lock.load::<SchedulerState>(STATE_DOCUMENT)?.unwrap_or_default();
        state.rebuild_index();
        debug!(tasks = state.tasks.len(), workers = state.workers.len(), "TaskScheduler::sync: reloaded");
        Ok(Some(lock))
    }

    /// Lock the in-memory state, refreshed from the store for reads
    ///
    /// A failed refresh is logged and the last known state is served.
    async fn view(&self) -> MutexGuard<'_, SchedulerState> {
        let mut state = self.inner.lock().await;
        if let Err(e) = self.sync(&mut state) {
            warn!(error = %e, "Failed to refresh scheduler state, serving last known state");
        }
        state
    }

    fn persist(&self, lock: Option<&StoreLock<'_>>, state: &SchedulerState) -> SchedulerResult<()> {
        let Some(lock) = lock else {
            return Ok(());
        };
        lock.save(STATE_DOCUMENT, state).map_err(|e| {
            error!(error = %e, "Failed to persist scheduler state");
            SchedulerError::from(e)
        })
    }

    /// Bulk insert task definitions as pending tasks
    ///
    /// Dependencies may name tasks that do not exist yet. IDs already present
    /// are skipped. Returns the number of tasks inserted.
    pub async fn add_tasks(&self, definitions: Vec<TaskDefinition>) -> SchedulerResult<usize> {
        debug!(count = definitions.len(), "TaskScheduler::add_tasks: called");
        let mut state = self.inner.lock().await;
        let lock = self.sync(&mut state)?;

        let mut added = 0usize;
        for definition in definitions {
            let id = definition.id.clone();
            if state.insert(definition) {
                added += 1;
            } else {
                warn!(task_id = %id, "Task already exists, skipping");
            }
        }

        if added > 0 {
            info!(added, total = state.tasks.len(), "Tasks added");
            self.persist(lock.as_ref(), &state)?;
        }
        Ok(added)
    }

    /// Idempotent upsert of a worker's capacity record
    pub async fn register_worker(&self, definition: WorkerDefinition) -> SchedulerResult<()> {
        debug!(worker_id = %definition.id, max_parallel = definition.max_parallel_tasks, "TaskScheduler::register_worker: called");
        let mut state = self.inner.lock().await;
        let lock = self.sync(&mut state)?;

        match state.workers.get_mut(&definition.id) {
            Some(existing) => {
                debug!(worker_id = %definition.id, "TaskScheduler::register_worker: merging into existing worker");
                existing.merge(definition);
            }
            None => {
                info!(worker_id = %definition.id, "Worker registered with scheduler");
                state.workers.insert(definition.id.clone(), definition);
            }
        }

        self.persist(lock.as_ref(), &state)
    }

    /// Pending tasks whose dependencies are all completed, in insertion order
    pub async fn get_available_tasks(&self) -> Vec<Task> {
        debug!("TaskScheduler::get_available_tasks: called");
        self.view().await.available()
    }

    /// Available tasks by priority (descending), then insertion order
    pub async fn get_next_batch(&self, batch_size: Option<usize>) -> Vec<Task> {
        debug!(?batch_size, "TaskScheduler::get_next_batch: called");
        let mut batch = self.view().await.available();

        // Stable sort keeps insertion order within a priority
        batch.sort_by(|a, b| b.definition.priority.cmp(&a.definition.priority));
        if let Some(size) = batch_size {
            batch.truncate(size);
        }
        batch
    }

    /// Assign tasks to a worker, all or nothing
    ///
    /// Every task must be pending with all dependencies completed, and the
    /// worker's active load plus the request must fit in max_parallel_tasks.
    /// Duplicate IDs in the request count once.
    pub async fn assign_tasks<S: AsRef<str>>(&self, task_ids: &[S], worker_id: &str) -> SchedulerResult<()> {
        debug!(%worker_id, count = task_ids.len(), "TaskScheduler::assign_tasks: called");
        let mut state = self.inner.lock().await;
        let lock = self.sync(&mut state)?;

        let worker = state
            .workers
            .get(worker_id)
            .ok_or_else(|| SchedulerError::UnknownWorker(worker_id.to_string()))?;
        let max_parallel_tasks = worker.max_parallel_tasks;

        let mut seen = HashSet::new();
        let mut positions = Vec::new();
        {
            let completed = state.completed_ids();
            for task_id in task_ids.iter().map(AsRef::as_ref) {
                if !seen.insert(task_id) {
                    continue;
                }
                let pos = state.position(task_id)?;
                let task = &state.tasks[pos];

                if task.status() != TaskStatus::Pending {
                    return Err(SchedulerError::InvalidState {
                        task_id: task_id.to_string(),
                        status: task.status(),
                        expected: "pending",
                    });
                }

                let unmet = task.definition.unmet_dependencies(&completed);
                if !unmet.is_empty() {
                    return Err(SchedulerError::DependencyUnsatisfied {
                        task_id: task_id.to_string(),
                        unmet: unmet.into_iter().map(String::from).collect(),
                    });
                }
                positions.push(pos);
            }
        }

        if positions.is_empty() {
            return Ok(());
        }

        let active = u32::try_from(state.active_task_ids(worker_id).len()).unwrap_or(u32::MAX);
        let requested = u32::try_from(positions.len()).unwrap_or(u32::MAX);
        if active.saturating_add(requested) > max_parallel_tasks {
            warn!(%worker_id, active, requested, max_parallel_tasks, "Assignment rejected: capacity exceeded");
            return Err(SchedulerError::CapacityExceeded {
                worker_id: worker_id.to_string(),
                active,
                requested,
                max_parallel_tasks,
            });
        }

        let now = self.clock.now();
        for &pos in &positions {
            let runtime = &mut state.tasks[pos].state;
            runtime.status = TaskStatus::Assigned;
            runtime.assigned_worker_id = Some(worker_id.to_string());
            runtime.assigned_at = Some(now);
            runtime.progress = 0.0;
        }
        state.stats.total_assigned += u64::from(requested);

        info!(%worker_id, count = requested, "Tasks assigned");
        self.persist(lock.as_ref(), &state)
    }

    /// Record progress, moving an assigned task to running
    ///
    /// The value is clamped to [0, 1]; NaN counts as 0. Returns the stored value.
    pub async fn update_task_progress(&self, task_id: &str, value: f64) -> SchedulerResult<f64> {
        debug!(%task_id, value, "TaskScheduler::update_task_progress: called");
        let mut state = self.inner.lock().await;
        let lock = self.sync(&mut state)?;
        let pos = state.position(task_id)?;
        let now = self.clock.now();

        let task = &mut state.tasks[pos];
        if !task.status().is_active() {
            return Err(SchedulerError::InvalidState {
                task_id: task_id.to_string(),
                status: task.status(),
                expected: "assigned or running",
            });
        }

        let progress = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
        if progress != value {
            debug!(%task_id, value, progress, "TaskScheduler::update_task_progress: clamped");
        }

        if task.state.status == TaskStatus::Assigned {
            debug!(%task_id, "TaskScheduler::update_task_progress: first progress, now running");
            task.state.status = TaskStatus::Running;
            task.state.started_at = Some(now);
        }
        task.state.progress = progress;

        self.persist(lock.as_ref(), &state)?;
        Ok(progress)
    }

    /// Resolve an assigned or running task
    ///
    /// Failure increments attempt_count and re-queues the task while the retry
    /// budget allows, otherwise the task is terminally failed. Either outcome
    /// frees the worker slot. Returns the resulting status.
    pub async fn complete_task(&self, task_id: &str, success: bool, error: Option<String>) -> SchedulerResult<TaskStatus> {
        debug!(%task_id, success, ?error, "TaskScheduler::complete_task: called");
        let mut state = self.inner.lock().await;
        let lock = self.sync(&mut state)?;
        let pos = state.position(task_id)?;
        let now = self.clock.now();

        let task = &mut state.tasks[pos];
        if !task.status().is_active() {
            return Err(SchedulerError::InvalidState {
                task_id: task_id.to_string(),
                status: task.status(),
                expected: "assigned or running",
            });
        }

        let status = if success {
            task.state.status = TaskStatus::Completed;
            task.state.progress = 1.0;
            task.state.completed_at = Some(now);
            info!(%task_id, "Task completed");
            state.stats.total_completed += 1;
            TaskStatus::Completed
        } else {
            task.state.attempt_count = task.state.attempt_count.saturating_add(1);
            task.state.last_error = error;
            let attempts = task.state.attempt_count;

            if self.config.allows_retry(attempts) {
                task.state.requeue();
                info!(%task_id, attempts, max_retries = self.config.max_retries, "Task failed, re-queued");
                state.stats.automatic_retries += 1;
                TaskStatus::Pending
            } else {
                task.state.status = TaskStatus::Failed;
                task.state.completed_at = Some(now);
                warn!(%task_id, attempts, "Task failed, retry budget exhausted");
                state.stats.terminal_failures += 1;
                TaskStatus::Failed
            }
        };
        if !success {
            state.stats.failed_attempts += 1;
        }

        self.persist(lock.as_ref(), &state)?;
        Ok(status)
    }

    /// Manually re-queue a terminally failed task
    ///
    /// attempt_count is preserved, so the next failure is terminal again.
    pub async fn retry_task(&self, task_id: &str) -> SchedulerResult<()> {
        debug!(%task_id, "TaskScheduler::retry_task: called");
        let mut state = self.inner.lock().await;
        let lock = self.sync(&mut state)?;
        let pos = state.position(task_id)?;

        let task = &mut state.tasks[pos];
        if task.status() != TaskStatus::Failed {
            return Err(SchedulerError::InvalidState {
                task_id: task_id.to_string(),
                status: task.status(),
                expected: "failed",
            });
        }

        task.state.requeue();
        info!(%task_id, attempts = task.state.attempt_count, "Task manually re-queued");
        state.stats.manual_retries += 1;

        self.persist(lock.as_ref(), &state)
    }

    /// Withdraw a pending or failed task
    ///
    /// Assigned and running tasks cannot be cancelled.
    pub async fn cancel_task(&self, task_id: &str) -> SchedulerResult<()> {
        debug!(%task_id, "TaskScheduler::cancel_task: called");
        let mut state = self.inner.lock().await;
        let lock = self.sync(&mut state)?;
        let pos = state.position(task_id)?;
        let now = self.clock.now();

        let task = &mut state.tasks[pos];
        if !matches!(task.status(), TaskStatus::Pending | TaskStatus::Failed) {
            return Err(SchedulerError::InvalidState {
                task_id: task_id.to_string(),
                status: task.status(),
                expected: "pending or failed",
            });
        }

        task.state.status = TaskStatus::Cancelled;
        task.state.completed_at = Some(now);
        info!(%task_id, "Task cancelled");
        state.stats.total_cancelled += 1;

        self.persist(lock.as_ref(), &state)
    }

    /// Dependency chain with the largest cumulative estimated duration
    pub async fn get_critical_path(&self) -> SchedulerResult<CriticalPath> {
        debug!("TaskScheduler::get_critical_path: called");
        let state = self.view().await;
        graph::critical_path(&state.tasks).map_err(SchedulerError::DependencyCycle)
    }

    /// Fail with the cycle path if the dependency graph is cyclic
    pub async fn validate_dependency_graph(&self) -> SchedulerResult<()> {
        debug!("TaskScheduler::validate_dependency_graph: called");
        let state = self.view().await;
        graph::validate_dependency_graph(&state.tasks).map_err(SchedulerError::DependencyCycle)
    }

    /// `(task_id, dependency_id)` pairs naming tasks that were never added
    ///
    /// Such tasks stay pending until the dependency is added and completes.
    pub async fn missing_dependencies(&self) -> Vec<(String, String)> {
        debug!("TaskScheduler::missing_dependencies: called");
        graph::missing_dependencies(&self.view().await.tasks)
    }

    pub async fn get_summary(&self) -> TaskSummary {
        debug!("TaskScheduler::get_summary: called");
        TaskSummary::from_tasks(&self.view().await.tasks)
    }

    pub async fn get_tasks_by_type(&self, task_type: &str) -> Vec<Task> {
        debug!(%task_type, "TaskScheduler::get_tasks_by_type: called");
        let state = self.view().await;
        state
            .tasks
            .iter()
            .filter(|t| t.definition.task_type == task_type)
            .cloned()
            .collect()
    }

    pub async fn get_tasks_by_tag(&self, tag: &str) -> Vec<Task> {
        debug!(%tag, "TaskScheduler::get_tasks_by_tag: called");
        let state = self.view().await;
        state
            .tasks
            .iter()
            .filter(|t| t.definition.tags.contains(tag))
            .cloned()
            .collect()
    }

    /// Current load against the worker's limits
    pub async fn get_worker_status(&self, worker_id: &str) -> SchedulerResult<WorkerLoad> {
        debug!(%worker_id, "TaskScheduler::get_worker_status: called");
        let state = self.view().await;
        let worker = state
            .workers
            .get(worker_id)
            .ok_or_else(|| SchedulerError::UnknownWorker(worker_id.to_string()))?;
        Ok(WorkerLoad::new(worker, state.active_task_ids(worker_id)))
    }

    /// Load of every registered worker, by ID
    pub async fn worker_loads(&self) -> Vec<WorkerLoad> {
        debug!("TaskScheduler::worker_loads: called");
        let state = self.view().await;
        state
            .workers
            .values()
            .map(|w| WorkerLoad::new(w, state.active_task_ids(&w.id)))
            .collect()
    }

    pub async fn get_task(&self, task_id: &str) -> SchedulerResult<Task> {
        debug!(%task_id, "TaskScheduler::get_task: called");
        let state = self.view().await;
        let pos = state.position(task_id)?;
        Ok(state.tasks[pos].clone())
    }

    /// All tasks in insertion order
    pub async fn list_tasks(&self) -> Vec<Task> {
        debug!("TaskScheduler::list_tasks: called");
        self.view().await.tasks.clone()
    }

    /// All workers, by ID
    pub async fn list_workers(&self) -> Vec<WorkerDefinition> {
        debug!("TaskScheduler::list_workers: called");
        self.view().await.workers.values().cloned().collect()
    }

    pub async fn stats(&self) -> SchedulerStats {
        debug!("TaskScheduler::stats: called");
        self.view().await.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualTimeProvider;
    use tempfile::tempdir;

    fn scheduler(max_retries: u32) -> TaskScheduler {
        TaskScheduler::in_memory(SchedulerConfig { max_retries }, Arc::new(ManualTimeProvider::default()))
    }

    fn def(id: &str) -> TaskDefinition {
        TaskDefinition::new(id, "build", id)
    }

    fn ids(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(Task::id).collect()
    }

    #[tokio::test]
    async fn test_add_tasks_skips_duplicates() {
        let s = scheduler(3);
        assert_eq!(s.add_tasks(vec![def("a"), def("b")]).await.unwrap(), 2);
        assert_eq!(s.add_tasks(vec![def("b"), def("c")]).await.unwrap(), 1);

        let tasks = s.list_tasks().await;
        assert_eq!(ids(&tasks), vec!["a", "b", "c"]);
        assert!(tasks.iter().all(|t| t.status() == TaskStatus::Pending));
        assert_eq!(s.stats().await.total_added, 3);
    }

    #[tokio::test]
    async fn test_readiness_follows_dependencies() {
        let s = scheduler(3);
        s.add_tasks(vec![def("a"), def("b"), def("c").with_dependencies(["a", "b"])])
            .await
            .unwrap();
        s.register_worker(WorkerDefinition::new("w1", "W1", "cpu", 2)).await.unwrap();

        assert_eq!(ids(&s.get_available_tasks().await), vec!["a", "b"]);

        s.assign_tasks(&["a", "b"], "w1").await.unwrap();
        assert!(s.get_available_tasks().await.is_empty());

        s.complete_task("a", true, None).await.unwrap();
        assert!(s.get_available_tasks().await.is_empty());

        s.complete_task("b", true, None).await.unwrap();
        assert_eq!(ids(&s.get_available_tasks().await), vec!["c"]);
    }

    #[tokio::test]
    async fn test_unknown_dependency_never_ready() {
        let s = scheduler(3);
        s.add_tasks(vec![def("a").with_dependencies(["later"])]).await.unwrap();

        assert!(s.get_available_tasks().await.is_empty());
        assert_eq!(
            s.missing_dependencies().await,
            vec![("a".to_string(), "later".to_string())]
        );

        s.add_tasks(vec![def("later")]).await.unwrap();
        assert!(s.missing_dependencies().await.is_empty());
        assert_eq!(ids(&s.get_available_tasks().await), vec!["later"]);
    }

    #[tokio::test]
    async fn test_next_batch_orders_by_priority_then_insertion() {
        let s = scheduler(3);
        s.add_tasks(vec![
            def("low").with_priority(1),
            def("high-1").with_priority(5),
            def("mid").with_priority(3),
            def("high-2").with_priority(5),
        ])
        .await
        .unwrap();

        assert_eq!(ids(&s.get_next_batch(None).await), vec!["high-1", "high-2", "mid", "low"]);
        assert_eq!(ids(&s.get_next_batch(Some(2)).await), vec!["high-1", "high-2"]);
        assert!(s.get_next_batch(Some(0)).await.is_empty());
    }

    #[tokio::test]
    async fn test_assign_rejects_over_capacity_without_mutation() {
        let s = scheduler(3);
        s.add_tasks(vec![def("a"), def("b"), def("c")]).await.unwrap();
        s.register_worker(WorkerDefinition::new("w1", "W1", "cpu", 2)).await.unwrap();

        s.assign_tasks(&["a", "b"], "w1").await.unwrap();
        let err = s.assign_tasks(&["c"], "w1").await.unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::CapacityExceeded {
                active: 2,
                requested: 1,
                max_parallel_tasks: 2,
                ..
            }
        ));

        assert_eq!(s.get_task("c").await.unwrap().status(), TaskStatus::Pending);
        let load = s.get_worker_status("w1").await.unwrap();
        assert_eq!(load.active_tasks, 2);
        assert_eq!(load.available_slots, 0);
    }

    #[tokio::test]
    async fn test_assign_is_all_or_nothing() {
        let s = scheduler(3);
        s.add_tasks(vec![def("a"), def("b").with_dependencies(["a"])]).await.unwrap();
        s.register_worker(WorkerDefinition::new("w1", "W1", "cpu", 4)).await.unwrap();

        let err = s.assign_tasks(&["a", "b"], "w1").await.unwrap_err();
        assert!(matches!(err, SchedulerError::DependencyUnsatisfied { ref task_id, .. } if task_id == "b"));
        assert_eq!(s.get_task("a").await.unwrap().status(), TaskStatus::Pending);

        let err = s.assign_tasks(&["a", "ghost"], "w1").await.unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownTask(ref id) if id == "ghost"));
        assert_eq!(s.get_task("a").await.unwrap().status(), TaskStatus::Pending);

        let err = s.assign_tasks(&["a"], "nobody").await.unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownWorker(_)));
    }

    #[tokio::test]
    async fn test_assign_rejects_non_pending() {
        let s = scheduler(3);
        s.add_tasks(vec![def("a")]).await.unwrap();
        s.register_worker(WorkerDefinition::new("w1", "W1", "cpu", 4)).await.unwrap();

        s.assign_tasks(&["a"], "w1").await.unwrap();
        let err = s.assign_tasks(&["a"], "w1").await.unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::InvalidState {
                status: TaskStatus::Assigned,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_assign_dedupes_ids() {
        let s = scheduler(3);
        s.add_tasks(vec![def("a")]).await.unwrap();
        s.register_worker(WorkerDefinition::new("w1", "W1", "cpu", 1)).await.unwrap();

        s.assign_tasks(&["a", "a"], "w1").await.unwrap();
        let task = s.get_task("a").await.unwrap();
        assert_eq!(task.status(), TaskStatus::Assigned);
        assert_eq!(task.state.assigned_worker_id.as_deref(), Some("w1"));
        assert_eq!(s.stats().await.total_assigned, 1);
    }

    #[tokio::test]
    async fn test_progress_clamps_and_starts_running() {
        let s = scheduler(3);
        s.add_tasks(vec![def("a"), def("b")]).await.unwrap();
        s.register_worker(WorkerDefinition::new("w1", "W1", "cpu", 2)).await.unwrap();

        let err = s.update_task_progress("a", 0.5).await.unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidState { .. }));

        s.assign_tasks(&["a"], "w1").await.unwrap();
        assert_eq!(s.update_task_progress("a", 1.7).await.unwrap(), 1.0);
        let task = s.get_task("a").await.unwrap();
        assert_eq!(task.status(), TaskStatus::Running);
        assert!(task.state.started_at.is_some());

        assert_eq!(s.update_task_progress("a", -0.3).await.unwrap(), 0.0);
        assert_eq!(s.update_task_progress("a", f64::NAN).await.unwrap(), 0.0);
        assert_eq!(s.update_task_progress("a", 0.25).await.unwrap(), 0.25);
    }

    #[tokio::test]
    async fn test_retry_budget() {
        let s = scheduler(2);
        s.add_tasks(vec![def("a")]).await.unwrap();
        s.register_worker(WorkerDefinition::new("w1", "W1", "cpu", 1)).await.unwrap();

        for expected in [TaskStatus::Pending, TaskStatus::Pending, TaskStatus::Failed] {
            s.assign_tasks(&["a"], "w1").await.unwrap();
            let status = s.complete_task("a", false, Some("boom".to_string())).await.unwrap();
            assert_eq!(status, expected);
            assert_eq!(s.get_worker_status("w1").await.unwrap().active_tasks, 0);
        }

        let task = s.get_task("a").await.unwrap();
        assert_eq!(task.state.attempt_count, 3);
        assert_eq!(task.state.last_error.as_deref(), Some("boom"));

        let stats = s.stats().await;
        assert_eq!(stats.failed_attempts, 3);
        assert_eq!(stats.automatic_retries, 2);
        assert_eq!(stats.terminal_failures, 1);
    }

    #[tokio::test]
    async fn test_manual_retry_preserves_attempts() {
        let s = scheduler(0);
        s.add_tasks(vec![def("a")]).await.unwrap();
        s.register_worker(WorkerDefinition::new("w1", "W1", "cpu", 1)).await.unwrap();

        s.assign_tasks(&["a"], "w1").await.unwrap();
        assert_eq!(s.complete_task("a", false, None).await.unwrap(), TaskStatus::Failed);

        s.retry_task("a").await.unwrap();
        let task = s.get_task("a").await.unwrap();
        assert_eq!(task.status(), TaskStatus::Pending);
        assert_eq!(task.state.attempt_count, 1);
        assert!(task.state.assigned_worker_id.is_none());

        let err = s.retry_task("a").await.unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidState { .. }));
        assert_eq!(s.stats().await.manual_retries, 1);
    }

    #[tokio::test]
    async fn test_complete_requires_active_task() {
        let s = scheduler(3);
        s.add_tasks(vec![def("a")]).await.unwrap();

        let err = s.complete_task("a", true, None).await.unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidState { .. }));

        let err = s.complete_task("ghost", true, None).await.unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownTask(_)));
    }

    #[tokio::test]
    async fn test_cancel_only_unassigned() {
        let s = scheduler(3);
        s.add_tasks(vec![def("a"), def("b")]).await.unwrap();
        s.register_worker(WorkerDefinition::new("w1", "W1", "cpu", 1)).await.unwrap();

        s.assign_tasks(&["a"], "w1").await.unwrap();
        assert!(s.cancel_task("a").await.is_err());

        s.cancel_task("b").await.unwrap();
        assert_eq!(s.get_task("b").await.unwrap().status(), TaskStatus::Cancelled);
        assert!(s.get_available_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn test_queries() {
        let s = scheduler(3);
        s.add_tasks(vec![
            def("a").with_tags(["fast"]),
            TaskDefinition::new("b", "test", "B").with_tags(["fast", "ci"]),
            TaskDefinition::new("c", "test", "C"),
        ])
        .await
        .unwrap();

        assert_eq!(ids(&s.get_tasks_by_type("test").await), vec!["b", "c"]);
        assert_eq!(ids(&s.get_tasks_by_tag("fast").await), vec!["a", "b"]);
        assert!(s.get_tasks_by_tag("none").await.is_empty());

        let summary = s.get_summary().await;
        assert_eq!(summary.total, 3);
        assert_eq!(summary.pending, 3);

        assert!(matches!(s.get_worker_status("w9").await, Err(SchedulerError::UnknownWorker(_))));
    }

    #[tokio::test]
    async fn test_register_worker_is_idempotent() {
        let s = scheduler(3);
        s.add_tasks(vec![def("a")]).await.unwrap();
        s.register_worker(
            WorkerDefinition::new("w1", "W1", "cpu", 1).with_metadata("zone", serde_json::json!("a")),
        )
        .await
        .unwrap();
        s.assign_tasks(&["a"], "w1").await.unwrap();

        s.register_worker(
            WorkerDefinition::new("w1", "W1", "cpu", 3).with_metadata("rack", serde_json::json!(7)),
        )
        .await
        .unwrap();

        let workers = s.list_workers().await;
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].max_parallel_tasks, 3);
        assert_eq!(workers[0].metadata.len(), 2);
        assert_eq!(s.get_task("a").await.unwrap().status(), TaskStatus::Assigned);
        assert_eq!(s.get_worker_status("w1").await.unwrap().active_tasks, 1);
    }

    #[tokio::test]
    async fn test_critical_path_and_cycles() {
        let s = scheduler(3);
        s.add_tasks(vec![
            def("a").with_estimated_duration(10),
            def("b").with_dependencies(["a"]).with_estimated_duration(20),
            def("c").with_dependencies(["a"]).with_estimated_duration(5),
        ])
        .await
        .unwrap();

        let path = s.get_critical_path().await.unwrap();
        assert_eq!(path.task_ids, vec!["a", "b"]);
        assert_eq!(path.total_duration_secs, 30);
        assert!(s.validate_dependency_graph().await.is_ok());

        s.add_tasks(vec![def("x").with_dependencies(["y"]), def("y").with_dependencies(["x"])])
            .await
            .unwrap();
        assert!(matches!(
            s.get_critical_path().await,
            Err(SchedulerError::DependencyCycle(_))
        ));
        assert!(s.validate_dependency_graph().await.is_err());
    }

    #[tokio::test]
    async fn test_open_round_trip_and_merge() {
        let temp = tempdir().unwrap();
        let store = StateStore::open(temp.path()).unwrap();
        let clock: Arc<dyn TimeProvider> = Arc::new(ManualTimeProvider::default());

        {
            let s = TaskScheduler::open(SchedulerConfig::default(), store.clone(), clock.clone(), vec![def("a")]).unwrap();
            s.register_worker(WorkerDefinition::new("w1", "W1", "cpu", 1)).await.unwrap();
            s.assign_tasks(&["a"], "w1").await.unwrap();
        }

        // "a" is re-supplied at startup but its stored runtime state wins
        let s = TaskScheduler::open(
            SchedulerConfig::default(),
            store,
            clock,
            vec![def("a").with_priority(9), def("b")],
        )
        .unwrap();

        let a = s.get_task("a").await.unwrap();
        assert_eq!(a.status(), TaskStatus::Assigned);
        assert_eq!(a.definition.priority, 0);
        assert_eq!(ids(&s.list_tasks().await), vec!["a", "b"]);
        assert_eq!(s.get_worker_status("w1").await.unwrap().active_tasks, 1);
    }

    #[tokio::test]
    async fn test_instances_sharing_a_store_see_each_other() {
        let temp = tempdir().unwrap();
        let store = StateStore::open(temp.path()).unwrap();
        let clock: Arc<dyn TimeProvider> = Arc::new(ManualTimeProvider::default());
        let first = TaskScheduler::open(SchedulerConfig::default(), store.clone(), clock.clone(), Vec::new()).unwrap();
        let second = TaskScheduler::open(SchedulerConfig::default(), store, clock, Vec::new()).unwrap();

        first
            .add_tasks(vec![def("a"), def("b"), def("c").with_dependencies(["a"])])
            .await
            .unwrap();
        second
            .register_worker(WorkerDefinition::new("w1", "W1", "cpu", 1))
            .await
            .unwrap();

        first.assign_tasks(&["a"], "w1").await.unwrap();
        // Capacity counts the assignment made through the other instance
        assert!(matches!(
            second.assign_tasks(&["b"], "w1").await,
            Err(SchedulerError::CapacityExceeded { active: 1, .. })
        ));

        second.complete_task("a", true, None).await.unwrap();
        assert_eq!(ids(&first.get_available_tasks().await), vec!["b", "c"]);

        // Adding through one instance does not drop tasks added by the other
        second.add_tasks(vec![def("d")]).await.unwrap();
        first.add_tasks(vec![def("e")]).await.unwrap();
        assert_eq!(ids(&second.list_tasks().await), vec!["a", "b", "c", "d", "e"]);

        let stats = first.stats().await;
        assert_eq!(stats.total_added, 5);
        assert_eq!(stats.total_assigned, 1);
        assert_eq!(stats.total_completed, 1);
    }
}
