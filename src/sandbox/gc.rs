/*!
 * Sandbox Garbage Collector Task
 *
 * Background task that periodically reclaims namespaces whose references
 * dropped to zero more than one cleanup period ago.
 *
 * # Shutdown
 *
 * 1. **Preferred:** `shutdown().await` sends a shutdown command and awaits
 *    the task handle.
 * 2. **Fallback:** `Drop` aborts the task if shutdown was never called and
 *    logs a warning.
 */

use super::registry::RegistryInner;
use crate::core::limits::{MIN_SWEEP_INTERVAL, SWEEPS_PER_PERIOD};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Which unreferenced entries a sweep reclaims
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GcStrategy {
    /// Entries unreferenced for at least the cleanup period
    Expired,
    /// Every unreferenced entry, regardless of age
    Unreferenced,
}

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SweepStats {
    pub reclaimed: usize,
    /// Picked as victims but re-acquired before deletion
    pub cancelled: usize,
    /// Deletion failed; retried on the next sweep
    pub failed: usize,
    pub duration_ms: u64,
}

impl SweepStats {
    /// Check if anything was deleted
    pub fn reclaimed_any(&self) -> bool {
        self.reclaimed > 0
    }
}

/// Control messages for the GC task
#[derive(Debug, Clone)]
pub enum GcCommand {
    /// Rebuild the tick for a new cleanup period
    UpdatePeriod(Duration),
    /// Run an expired-entries sweep now
    Trigger,
    /// Stop the task
    Shutdown,
}

/// Tick spacing for a given cleanup period
pub fn sweep_interval(period: Duration) -> Duration {
    (period / SWEEPS_PER_PERIOD).max(MIN_SWEEP_INTERVAL)
}

fn new_interval(period: Duration) -> Interval {
    let every = sweep_interval(period);
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

/// Handle to the background GC task
pub struct GcTask {
    command_tx: mpsc::UnboundedSender<GcCommand>,
    handle: Option<tokio::task::JoinHandle<()>>,
    shutdown_initiated: Arc<AtomicBool>,
}

impl GcTask {
    pub(crate) fn spawn(runtime: &Handle, registry: Arc<RegistryInner>) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let handle = runtime.spawn(run_gc_loop(registry, command_rx));

        info!("Sandbox GC task spawned");
        Self {
            command_tx,
            handle: Some(handle),
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn update_period(&self, period: Duration) {
        let _ = self.command_tx.send(GcCommand::UpdatePeriod(period));
    }

    pub fn trigger(&self) {
        let _ = self.command_tx.send(GcCommand::Trigger);
    }

    /// Stop the task and wait for it to finish
    pub async fn shutdown(mut self) {
        self.shutdown_initiated.store(true, Ordering::SeqCst);
        let _ = self.command_tx.send(GcCommand::Shutdown);

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Sandbox GC task shutdown error");
            } else {
                info!("Sandbox GC task shutdown complete");
            }
        }
    }
}

async fn sweep_expired(registry: &Arc<RegistryInner>) {
    let registry = Arc::clone(registry);
    match tokio::task::spawn_blocking(move || registry.sweep(GcStrategy::Expired)).await {
        Ok(stats) if stats.reclaimed_any() || stats.failed > 0 => {
            info!(
                reclaimed = stats.reclaimed,
                cancelled = stats.cancelled,
                failed = stats.failed,
                duration_ms = stats.duration_ms,
                "Sandbox sweep finished"
            );
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Sandbox sweep panicked"),
    }
}

async fn run_gc_loop(registry: Arc<RegistryInner>, mut command_rx: mpsc::UnboundedReceiver<GcCommand>) {
    let mut period = registry.cleanup_period();
    let mut interval = new_interval(period);
    info!(
        period_ms = period.as_millis() as u64,
        sweep_ms = sweep_interval(period).as_millis() as u64,
        "Sandbox GC loop started"
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                sweep_expired(&registry).await;

                let current = registry.cleanup_period();
                if current != period {
                    period = current;
                    interval = new_interval(period);
                }
            }

            cmd = command_rx.recv() => {
                match cmd {
                    Some(GcCommand::UpdatePeriod(next)) => {
                        debug!(period_ms = next.as_millis() as u64, "Sandbox GC period updated");
                        period = next;
                        interval = new_interval(period);
                    }
                    Some(GcCommand::Trigger) => sweep_expired(&registry).await,
                    Some(GcCommand::Shutdown) | None => {
                        info!("Sandbox GC task shutting down");
                        break;
                    }
                }
            }
        }
    }
}

impl Drop for GcTask {
    fn drop(&mut self) {
        if self.shutdown_initiated.load(Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self.handle.take() {
            warn!(
                "GcTask dropped without calling shutdown() - aborting task immediately. \
                 Use `registry.shutdown().await` for graceful cleanup."
            );
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_interval_is_half_period() {
        assert_eq!(sweep_interval(Duration::from_secs(2)), Duration::from_secs(1));
    }

    #[test]
    fn test_sweep_interval_floor() {
        assert_eq!(sweep_interval(Duration::from_millis(4)), MIN_SWEEP_INTERVAL);
    }
}
