//! Monitoring loop
//!
//! A fixed-interval polling driver: detection latency is bounded by the
//! interval, never event-driven.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::core::WorkerSupervisor;
use super::report::{HealthReport, StatusSnapshot};

/// What the monitor saw on one tick
#[derive(Debug, Clone)]
pub struct MonitorTick {
    /// 1-based tick number
    pub tick: u64,
    /// Aggregate status taken before the health check
    pub snapshot: StatusSnapshot,
    pub report: HealthReport,
}

/// Callback invoked after every successful tick
pub type MonitorCallback = Box<dyn FnMut(&MonitorTick) + Send>;

/// Ask a running monitor loop to stop
///
/// Returns false if the loop had already exited and dropped its receiver.
pub async fn stop_monitor(shutdown_tx: &mpsc::Sender<()>) -> bool {
    match shutdown_tx.send(()).await {
        Ok(()) => true,
        Err(e) => {
            debug!(error = %e, "stop_monitor: monitor already stopped");
            false
        }
    }
}

impl WorkerSupervisor {
    /// Poll worker health until shutdown
    ///
    /// Each tick snapshots aggregate status, runs
    /// [`check_all_workers`](Self::check_all_workers) and invokes the callback.
    /// The first tick runs immediately. Exits when a shutdown message arrives or
    /// every sender is dropped. Returns the number of ticks run.
    pub async fn monitor_loop(
        &self,
        interval: Option<Duration>,
        mut callback: Option<MonitorCallback>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) -> u64 {
        let mut period = interval.unwrap_or_else(|| self.config().monitor_interval());
        if period.is_zero() {
            warn!("Monitor interval is zero, using 1s");
            period = Duration::from_secs(1);
        }
        info!(?period, "Worker monitor starting");

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    ticks += 1;
                    self.monitor_tick(ticks, callback.as_mut()).await;
                }

                _ = shutdown_rx.recv() => {
                    debug!("monitor_loop: shutdown signal received");
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        info!(ticks, "Worker monitor stopped");
        ticks
    }

    async fn monitor_tick(&self, tick: u64, callback: Option<&mut MonitorCallback>) {
        debug!(tick, "monitor_tick: called");
        let snapshot = self.status_snapshot().await;

        let report = match self.check_all_workers().await {
            Ok(report) => report,
            Err(e) => {
                error!(tick, error = %e, "Health check failed");
                return;
            }
        };

        if !report.is_all_healthy() {
            info!(
                tick,
                stale = report.stale.len(),
                restarted = report.restarted.len(),
                terminated = report.terminated.len(),
                "Health check found unhealthy workers"
            );
        }

        if let Some(callback) = callback {
            callback(&MonitorTick { tick, snapshot, report });
        }
    }
}
