//! Restart hook
//!
//! The supervisor only records restart decisions. Respawning the worker
//! process is delegated to a hook supplied by the caller.

use std::process::Stdio;
use std::time::Duration;

use tracing::{debug, error, info};

/// A recorded restart decision handed to the hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartRequest {
    pub worker_id: String,
    /// 1-based restart attempt
    pub attempt: u32,
    /// Delay the hook should wait before respawning
    pub delay: Duration,
}

/// Performs the actual restart of a worker process
///
/// Called after the decision is persisted and the supervisor lock released.
/// The supervisor does not wait for or inspect the outcome, so implementations
/// must not block.
pub trait RestartHook: Send + Sync {
    fn restart(&self, request: &RestartRequest);
}

impl<F> RestartHook for F
where
    F: Fn(&RestartRequest) + Send + Sync,
{
    fn restart(&self, request: &RestartRequest) {
        self(request)
    }
}

/// Hook that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRestartHook;

impl RestartHook for NoopRestartHook {
    fn restart(&self, _request: &RestartRequest) {}
}

/// Hook that runs a shell command to respawn the worker
///
/// The command runs under `sh -c` with `TG_WORKER_ID`, `TG_RESTART_ATTEMPT`
/// and `TG_RESTART_DELAY_SECS` set. It is spawned and left to run; honouring
/// the delay is up to the command. Must be called inside a tokio runtime.
#[derive(Debug, Clone)]
pub struct CommandRestartHook {
    command: String,
}

impl CommandRestartHook {
    pub fn new(command: impl Into<String>) -> Self {
        Self { command: command.into() }
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

impl RestartHook for CommandRestartHook {
    fn restart(&self, request: &RestartRequest) {
        debug!(worker_id = %request.worker_id, attempt = request.attempt, "CommandRestartHook::restart: called");
        let spawned = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("TG_WORKER_ID", &request.worker_id)
            .env("TG_RESTART_ATTEMPT", request.attempt.to_string())
            .env("TG_RESTART_DELAY_SECS", request.delay.as_secs().to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        match spawned {
            Ok(child) => info!(
                worker_id = %request.worker_id,
                attempt = request.attempt,
                pid = ?child.id(),
                "Restart command spawned"
            ),
            Err(e) => error!(worker_id = %request.worker_id, error = %e, "Failed to spawn restart command"),
        }
    }
}
