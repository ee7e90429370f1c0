//! Worker health supervisor implementation

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use statestore::{StateStore, StoreLock};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::clock::TimeProvider;
use crate::domain::{WorkerRuntimeState, WorkerStatus};
use crate::events::{EventLog, EventLogEntry, EventType, RetentionPolicy};

use super::config::SupervisorConfig;
use super::error::{SupervisorError, SupervisorResult};
use super::hook::{RestartHook, RestartRequest};
use super::report::{HealthReport, RestartOutcome, StatusSnapshot};

/// Store document holding worker runtime state
pub const STATE_DOCUMENT: &str = "supervisor";

/// Event log file inside the store directory
pub const EVENT_LOG_FILE: &str = "events.jsonl";

#[derive(Debug, Default, Serialize, Deserialize)]
struct SupervisorState {
    workers: BTreeMap<String, WorkerRuntimeState>,
}

/// Internal state protected by mutex
struct SupervisorInner {
    state: SupervisorState,
    events: EventLog,
}

impl SupervisorInner {
    fn worker_mut(&mut self, worker_id: &str) -> SupervisorResult<&mut WorkerRuntimeState> {
        self.state
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| SupervisorError::UnknownWorker(worker_id.to_string()))
    }
}

/// The WorkerSupervisor tracks worker liveness through self-reported
/// heartbeats and drives bounded auto-restart.
///
/// It never respawns a process itself: restart decisions are recorded and
/// handed to the [`RestartHook`].
///
/// With a store, every call reloads the worker table and event log under the
/// store lock before acting, so several processes (the monitor loop and
/// one-shot CLI commands) can share one state directory. A mutation keeps that
/// lock until the worker table is saved and its events are appended.
pub struct WorkerSupervisor {
    config: SupervisorConfig,
    store: Option<StateStore>,
    clock: Arc<dyn TimeProvider>,
    hook: Arc<dyn RestartHook>,
    inner: Mutex<SupervisorInner>,
}

impl WorkerSupervisor {
    /// Create a supervisor that keeps state and events in memory only
    pub fn in_memory(config: SupervisorConfig, clock: Arc<dyn TimeProvider>, hook: Arc<dyn RestartHook>) -> Self {
        debug!(?config, "WorkerSupervisor::in_memory: called");
        let events = EventLog::in_memory(retention(&config));
        Self {
            config,
            store: None,
            clock,
            hook,
            inner: Mutex::new(SupervisorInner {
                state: SupervisorState::default(),
                events,
            }),
        }
    }

    /// Load worker state and the event log from the store directory
    pub fn open(
        config: SupervisorConfig,
        store: StateStore,
        clock: Arc<dyn TimeProvider>,
        hook: Arc<dyn RestartHook>,
    ) -> SupervisorResult<Self> {
        debug!(?config, root = %store.root().display(), "WorkerSupervisor::open: called");

        let (state, events) = {
            let lock = store.lock()?;
            let state = lock.load::<SupervisorState>(STATE_DOCUMENT)?.unwrap_or_default();
            let events = EventLog::open(store.root().join(EVENT_LOG_FILE), retention(&config), clock.now())?;
            (state, events)
        };

        info!(workers = state.workers.len(), events = events.len(), "Supervisor state opened");

        Ok(Self {
            config,
            store: Some(store),
            clock,
            hook,
            inner: Mutex::new(SupervisorInner { state, events }),
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Take the store lock and reload the worker table and event log under it
    ///
    /// Returns `None` for in-memory supervisors. Mutations keep the guard
    /// until [`commit`](Self::commit) has run.
    fn sync(&self, inner: &mut SupervisorInner) -> SupervisorResult<Option<StoreLock<'_>>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let lock = store.lock()?;
        inner.state = lock.load::<SupervisorState>(STATE_DOCUMENT)?.unwrap_or_default();
        inner.events.reload()?;
        debug!(workers = inner.state.workers.len(), events = inner.events.len(), "WorkerSupervisor::sync: reloaded");
        Ok(Some(lock))
    }

    /// Lock the in-memory state, refreshed from the store for reads
    ///
    /// A failed refresh is logged and the last known state is served.
    async fn view(&self) -> MutexGuard<'_, SupervisorInner> {
        let mut inner = self.inner.lock().await;
        if let Err(e) = self.sync(&mut inner) {
            warn!(error = %e, "Failed to refresh supervisor state, serving last known state");
        }
        inner
    }

    /// Persist the worker table, then append the events of this mutation
    fn commit(
        &self,
        lock: Option<&StoreLock<'_>>,
        inner: &mut SupervisorInner,
        events: Vec<EventLogEntry>,
    ) -> SupervisorResult<()> {
        let saved = match lock {
            Some(lock) => lock.save(STATE_DOCUMENT, &inner.state).map_err(|e| {
                error!(error = %e, "Failed to persist supervisor state");
                SupervisorError::from(e)
            }),
            None => Ok(()),
        };

        let mut logged = Ok(());
        for event in events {
            if let Err(e) = inner.events.append(event) {
                error!(error = %e, "Failed to append supervisor event");
                if logged.is_ok() {
                    logged = Err(SupervisorError::from(e));
                }
            }
        }

        saved?;
        logged
    }

    fn is_stale(&self, worker: &WorkerRuntimeState, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(worker.liveness_reference()) >= self.config.heartbeat_timeout()
    }

    /// Record a restart decision on a worker
    ///
    /// Absorbing statuses are left alone. Otherwise restart_count increments and
    /// the worker either moves to restarting or, past max_restarts, terminated.
    fn apply_restart(
        &self,
        worker: &mut WorkerRuntimeState,
        delay: Duration,
        now: DateTime<Utc>,
        events: &mut Vec<EventLogEntry>,
    ) -> (RestartOutcome, Option<RestartRequest>) {
        if worker.status.is_absorbing() {
            debug!(worker_id = %worker.id, status = %worker.status, "WorkerSupervisor::apply_restart: absorbing status, ignored");
            return (RestartOutcome::Ignored { status: worker.status }, None);
        }

        let from = worker.status;
        worker.restart_count = worker.restart_count.saturating_add(1);
        worker.current_task_id = None;
        worker.updated_at = now;

        if worker.restart_count > self.config.max_restarts {
            worker.status = WorkerStatus::Terminated;
            warn!(
                worker_id = %worker.id,
                restart_count = worker.restart_count,
                max_restarts = self.config.max_restarts,
                "Restart limit exceeded, worker terminated"
            );
            events.push(EventLogEntry::new(
                EventType::RestartLimitExceeded,
                &worker.id,
                json!({
                    "from": from,
                    "restart_count": worker.restart_count,
                    "max_restarts": self.config.max_restarts,
                    "last_error": worker.last_error,
                }),
                now,
            ));
            return (
                RestartOutcome::Terminated {
                    restart_count: worker.restart_count,
                },
                None,
            );
        }

        worker.status = WorkerStatus::Restarting;
        worker.last_restart_at = Some(now);
        info!(
            worker_id = %worker.id,
            attempt = worker.restart_count,
            max_restarts = self.config.max_restarts,
            delay_secs = delay.as_secs_f64(),
            "Worker restart scheduled"
        );
        events.push(EventLogEntry::new(
            EventType::RestartScheduled,
            &worker.id,
            json!({
                "from": from,
                "attempt": worker.restart_count,
                "max_restarts": self.config.max_restarts,
                "delay_secs": delay.as_secs_f64(),
                "reason": worker.last_error,
            }),
            now,
        ));

        let request = RestartRequest {
            worker_id: worker.id.clone(),
            attempt: worker.restart_count,
            delay,
        };
        (
            RestartOutcome::Scheduled {
                attempt: request.attempt,
                delay,
            },
            Some(request),
        )
    }

    fn fire_hook(&self, requests: &[RestartRequest]) {
        for request in requests {
            debug!(worker_id = %request.worker_id, attempt = request.attempt, "WorkerSupervisor::fire_hook: invoking restart hook");
            self.hook.restart(request);
        }
    }

    /// Register a worker, or merge metadata into an existing registration
    ///
    /// Re-registration never touches status, heartbeat or restart fields.
    pub async fn register_worker(
        &self,
        worker_id: &str,
        name: &str,
        worker_type: &str,
        metadata: Option<BTreeMap<String, Value>>,
    ) -> SupervisorResult<WorkerRuntimeState> {
        debug!(%worker_id, %name, %worker_type, "WorkerSupervisor::register_worker: called");
        let mut inner = self.inner.lock().await;
        let lock = self.sync(&mut inner)?;
        let now = self.clock.now();
        let mut events = Vec::new();

        let worker = match inner.state.workers.get_mut(worker_id) {
            Some(existing) => {
                debug!(%worker_id, "WorkerSupervisor::register_worker: already registered, merging");
                existing.name = name.to_string();
                existing.worker_type = worker_type.to_string();
                existing.metadata.extend(metadata.unwrap_or_default());
                existing.updated_at = now;
                existing.clone()
            }
            None => {
                let mut worker = WorkerRuntimeState::new(worker_id, name, worker_type, now);
                worker.metadata = metadata.unwrap_or_default();
                info!(%worker_id, %worker_type, "Worker registered with supervisor");
                events.push(EventLogEntry::new(
                    EventType::WorkerRegistered,
                    worker_id,
                    json!({ "name": name, "type": worker_type }),
                    now,
                ));
                inner.state.workers.insert(worker_id.to_string(), worker.clone());
                worker
            }
        };

        self.commit(lock.as_ref(), &mut inner, events)?;
        Ok(worker)
    }

    /// Record a heartbeat from the worker process
    ///
    /// The first heartbeat moves initializing to idle, and a heartbeat while
    /// restarting confirms the restart. A current task means busy, none means
    /// idle. Workers in error stay in error. Returns the resulting status.
    pub async fn update_heartbeat(&self, worker_id: &str, current_task: Option<String>) -> SupervisorResult<WorkerStatus> {
        debug!(%worker_id, ?current_task, "WorkerSupervisor::update_heartbeat: called");
        let mut inner = self.inner.lock().await;
        let lock = self.sync(&mut inner)?;
        let now = self.clock.now();
        let mut events = Vec::new();

        let worker = inner.worker_mut(worker_id)?;
        worker.last_heartbeat = Some(now);
        worker.updated_at = now;

        let from = worker.status;
        if from.is_absorbing() {
            debug!(%worker_id, status = %from, "WorkerSupervisor::update_heartbeat: absorbing status, timestamp only");
        } else {
            let to = match from {
                WorkerStatus::Error => WorkerStatus::Error,
                _ if current_task.is_some() => WorkerStatus::Busy,
                _ => WorkerStatus::Idle,
            };
            worker.current_task_id = current_task;
            worker.status = to;

            if from == WorkerStatus::Restarting {
                info!(%worker_id, restart_count = worker.restart_count, "Worker recovered after restart");
                worker.last_error = None;
                events.push(EventLogEntry::new(
                    EventType::WorkerRecovered,
                    worker_id,
                    json!({ "from": from, "to": to, "restart_count": worker.restart_count }),
                    now,
                ));
            } else if from != to {
                debug!(%worker_id, %from, %to, "WorkerSupervisor::update_heartbeat: status changed");
                events.push(EventLogEntry::new(
                    EventType::StatusChanged,
                    worker_id,
                    json!({ "from": from, "to": to, "reason": "heartbeat" }),
                    now,
                ));
            }
        }
        let status = worker.status;

        self.commit(lock.as_ref(), &mut inner, events)?;
        Ok(status)
    }

    /// Whether the worker's heartbeat is within the timeout
    pub async fn check_heartbeat(&self, worker_id: &str) -> SupervisorResult<bool> {
        debug!(%worker_id, "WorkerSupervisor::check_heartbeat: called");
        let inner = self.view().await;
        let worker = inner
            .state
            .workers
            .get(worker_id)
            .ok_or_else(|| SupervisorError::UnknownWorker(worker_id.to_string()))?;
        Ok(!self.is_stale(worker, self.clock.now()))
    }

    /// Check every non-absorbing worker
    ///
    /// A stale worker moves to error and a heartbeat_timeout event is logged.
    /// With auto-restart enabled, stale and errored workers are restarted.
    pub async fn check_all_workers(&self) -> SupervisorResult<HealthReport> {
        debug!("WorkerSupervisor::check_all_workers: called");
        let mut inner = self.inner.lock().await;
        let lock = self.sync(&mut inner)?;
        let now = self.clock.now();
        let delay = self.config.restart_delay();
        let timeout_secs = self.config.heartbeat_timeout_secs;

        let mut report = HealthReport {
            checked_at: Some(now),
            ..Default::default()
        };
        let mut events = Vec::new();
        let mut requests = Vec::new();

        for worker in inner.state.workers.values_mut() {
            if worker.status.is_absorbing() {
                continue;
            }

            let stale = self.is_stale(worker, now);
            if stale {
                report.stale.push(worker.id.clone());
                if worker.status != WorkerStatus::Error {
                    let elapsed = now.signed_duration_since(worker.liveness_reference()).num_seconds();
                    warn!(worker_id = %worker.id, elapsed_secs = elapsed, timeout_secs, "Worker heartbeat timed out");
                    events.push(EventLogEntry::new(
                        EventType::HeartbeatTimeout,
                        &worker.id,
                        json!({
                            "from": worker.status,
                            "last_heartbeat": worker.last_heartbeat,
                            "elapsed_secs": elapsed,
                            "timeout_secs": timeout_secs,
                        }),
                        now,
                    ));
                    worker.status = WorkerStatus::Error;
                    worker.last_error = Some(format!("heartbeat timeout after {}s", elapsed));
                    worker.updated_at = now;
                }
            } else if worker.status != WorkerStatus::Error {
                report.healthy.push(worker.id.clone());
                continue;
            }

            if !self.config.auto_restart {
                continue;
            }

            let (outcome, request) = self.apply_restart(worker, delay, now, &mut events);
            match outcome {
                RestartOutcome::Scheduled { .. } => report.restarted.push(worker.id.clone()),
                RestartOutcome::Terminated { .. } => report.terminated.push(worker.id.clone()),
                RestartOutcome::Ignored { .. } => {}
            }
            requests.extend(request);
        }

        if !events.is_empty() {
            self.commit(lock.as_ref(), &mut inner, events)?;
        }
        drop(lock);
        drop(inner);

        self.fire_hook(&requests);
        debug!(
            healthy = report.healthy.len(),
            stale = report.stale.len(),
            restarted = report.restarted.len(),
            terminated = report.terminated.len(),
            "WorkerSupervisor::check_all_workers: complete"
        );
        Ok(report)
    }

    /// Push a status from outside, typically to report an error
    ///
    /// Stopped and terminated cannot be left or set through this channel;
    /// use [`stop_worker`](Self::stop_worker) and [`reset_worker`](Self::reset_worker).
    pub async fn update_worker_status(
        &self,
        worker_id: &str,
        status: WorkerStatus,
        error: Option<String>,
    ) -> SupervisorResult<()> {
        debug!(%worker_id, %status, ?error, "WorkerSupervisor::update_worker_status: called");
        let mut inner = self.inner.lock().await;
        let lock = self.sync(&mut inner)?;
        let now = self.clock.now();
        let mut events = Vec::new();

        let worker = inner.worker_mut(worker_id)?;
        let from = worker.status;
        if from.is_absorbing() || status.is_absorbing() {
            return Err(SupervisorError::InvalidTransition {
                worker_id: worker_id.to_string(),
                from,
                to: status,
            });
        }

        worker.status = status;
        worker.updated_at = now;
        if error.is_some() {
            worker.last_error = error.clone();
        }

        if status == WorkerStatus::Error {
            warn!(%worker_id, ?error, "Worker reported error");
            events.push(EventLogEntry::new(
                EventType::WorkerError,
                worker_id,
                json!({ "from": from, "error": error }),
                now,
            ));
        } else if from != status {
            events.push(EventLogEntry::new(
                EventType::StatusChanged,
                worker_id,
                json!({ "from": from, "to": status, "reason": "reported", "error": error }),
                now,
            ));
        }

        self.commit(lock.as_ref(), &mut inner, events)
    }

    /// Record a restart decision and hand it to the restart hook
    ///
    /// Without an explicit delay the configured restart delay is used.
    pub async fn restart_worker(&self, worker_id: &str, delay: Option<Duration>) -> SupervisorResult<RestartOutcome> {
        debug!(%worker_id, ?delay, "WorkerSupervisor::restart_worker: called");
        let mut inner = self.inner.lock().await;
        let lock = self.sync(&mut inner)?;
        let now = self.clock.now();
        let delay = delay.unwrap_or_else(|| self.config.restart_delay());
        let mut events = Vec::new();

        let worker = inner.worker_mut(worker_id)?;
        let (outcome, request) = self.apply_restart(worker, delay, now, &mut events);

        if !events.is_empty() {
            self.commit(lock.as_ref(), &mut inner, events)?;
        }
        drop(lock);
        drop(inner);

        if let Some(request) = request {
            self.fire_hook(std::slice::from_ref(&request));
        }
        Ok(outcome)
    }

    /// Stop a worker; stopped is absorbing until reset
    pub async fn stop_worker(&self, worker_id: &str) -> SupervisorResult<()> {
        debug!(%worker_id, "WorkerSupervisor::stop_worker: called");
        let mut inner = self.inner.lock().await;
        let lock = self.sync(&mut inner)?;
        let now = self.clock.now();

        let worker = inner.worker_mut(worker_id)?;
        let from = worker.status;
        match from {
            WorkerStatus::Stopped => {
                debug!(%worker_id, "WorkerSupervisor::stop_worker: already stopped");
                return Ok(());
            }
            WorkerStatus::Terminated => {
                return Err(SupervisorError::InvalidTransition {
                    worker_id: worker_id.to_string(),
                    from,
                    to: WorkerStatus::Stopped,
                });
            }
            _ => {}
        }

        worker.status = WorkerStatus::Stopped;
        worker.current_task_id = None;
        worker.updated_at = now;
        info!(%worker_id, %from, "Worker stopped");

        let events = vec![EventLogEntry::new(
            EventType::WorkerStopped,
            worker_id,
            json!({ "from": from }),
            now,
        )];
        self.commit(lock.as_ref(), &mut inner, events)
    }

    /// Explicit external reset: clears the restart budget and error
    ///
    /// The only way out of stopped or terminated. The worker starts over in
    /// initializing with a fresh heartbeat window.
    pub async fn reset_worker(&self, worker_id: &str) -> SupervisorResult<WorkerRuntimeState> {
        debug!(%worker_id, "WorkerSupervisor::reset_worker: called");
        let mut inner = self.inner.lock().await;
        let lock = self.sync(&mut inner)?;
        let now = self.clock.now();

        let worker = inner.worker_mut(worker_id)?;
        let from = worker.status;
        let previous_restart_count = worker.restart_count;

        worker.status = WorkerStatus::Initializing;
        worker.restart_count = 0;
        worker.last_error = None;
        worker.current_task_id = None;
        worker.last_restart_at = Some(now);
        worker.updated_at = now;
        let reset = worker.clone();

        info!(%worker_id, %from, previous_restart_count, "Worker reset");
        let events = vec![EventLogEntry::new(
            EventType::WorkerReset,
            worker_id,
            json!({ "from": from, "previous_restart_count": previous_restart_count }),
            now,
        )];
        self.commit(lock.as_ref(), &mut inner, events)?;
        Ok(reset)
    }

    /// Remove a worker record
    pub async fn remove_worker(&self, worker_id: &str) -> SupervisorResult<WorkerRuntimeState> {
        debug!(%worker_id, "WorkerSupervisor::remove_worker: called");
        let mut inner = self.inner.lock().await;
        let lock = self.sync(&mut inner)?;
        let now = self.clock.now();

        let removed = inner
            .state
            .workers
            .remove(worker_id)
            .ok_or_else(|| SupervisorError::UnknownWorker(worker_id.to_string()))?;

        info!(%worker_id, "Worker removed");
        let events = vec![EventLogEntry::new(
            EventType::WorkerRemoved,
            worker_id,
            json!({ "status": removed.status, "restart_count": removed.restart_count }),
            now,
        )];
        self.commit(lock.as_ref(), &mut inner, events)?;
        Ok(removed)
    }

    pub async fn get_worker(&self, worker_id: &str) -> SupervisorResult<WorkerRuntimeState> {
        debug!(%worker_id, "WorkerSupervisor::get_worker: called");
        let inner = self.view().await;
        inner
            .state
            .workers
            .get(worker_id)
            .cloned()
            .ok_or_else(|| SupervisorError::UnknownWorker(worker_id.to_string()))
    }

    /// All workers, by ID
    pub async fn list_workers(&self) -> Vec<WorkerRuntimeState> {
        debug!("WorkerSupervisor::list_workers: called");
        self.view().await.state.workers.values().cloned().collect()
    }

    /// Worker counts per status
    pub async fn status_snapshot(&self) -> StatusSnapshot {
        debug!("WorkerSupervisor::status_snapshot: called");
        let inner = self.view().await;
        StatusSnapshot::new(self.clock.now(), inner.state.workers.values())
    }

    /// Newest events first
    pub async fn recent_events(&self, limit: usize) -> Vec<EventLogEntry> {
        debug!(limit, "WorkerSupervisor::recent_events: called");
        self.view().await.events.recent(limit)
    }

    /// Events about one worker, oldest first
    pub async fn events_for(&self, subject_id: &str) -> Vec<EventLogEntry> {
        debug!(%subject_id, "WorkerSupervisor::events_for: called");
        self.view().await.events.for_subject(subject_id)
    }
}

fn retention(config: &SupervisorConfig) -> RetentionPolicy {
    RetentionPolicy::new(config.log_retention(), config.max_log_entries)
}
