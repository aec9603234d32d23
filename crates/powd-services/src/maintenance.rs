//! Maintenance scheduler: startup recovery sweep and retention cleanup.
//!
//! Two independent timers, each its own task:
//!   - the startup sweep fires once after `startup_delay_secs` and hands
//!     every task left incomplete by a previous run back to the engine;
//!   - cleanup fires after `cleanup_first_delay_secs`, then every
//!     `cleanup_interval_secs`, and deletes tasks older than the retention
//!     window whether complete or not.
//!
//! The scheduler records which tasks are incomplete when it is built, which
//! must happen before the listener starts. Only those are swept; tasks
//! admitted afterwards already have a computation in flight.
//!
//! Store work runs on the blocking pool so request handling is never held
//! up by a long sweep or delete.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};

use powd_core::config::MaintenanceConfig;

use crate::engine::{CompletionSink, ProofOfWorkEngine};
use crate::pow_service::submit;
use crate::task_store::{StoreError, TaskStore};

/// Outcome of one startup sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub submitted: usize,
    pub refused: usize,
    /// Incomplete tasks admitted after startup, left to their own computation.
    pub skipped: usize,
}

pub struct MaintenanceScheduler {
    store: TaskStore,
    engine: Arc<dyn ProofOfWorkEngine>,
    sink: CompletionSink,
    settings: MaintenanceConfig,
    /// Initial hashes incomplete at process start.
    inherited: HashSet<Vec<u8>>,
}

impl MaintenanceScheduler {
    pub fn new(
        store: TaskStore,
        engine: Arc<dyn ProofOfWorkEngine>,
        sink: CompletionSink,
        settings: MaintenanceConfig,
    ) -> Result<Self, StoreError> {
        let inherited: HashSet<Vec<u8>> = store
            .get_incomplete_tasks()?
            .into_iter()
            .map(|task| task.initial_hash)
            .collect();
        tracing::info!(incomplete = inherited.len(), "tasks inherited from previous run");
        Ok(Self {
            store,
            engine,
            sink,
            settings,
            inherited,
        })
    }

    /// Re-submit every inherited task that is still incomplete.
    pub fn sweep(&self) -> Result<SweepSummary, StoreError> {
        let mut summary = SweepSummary::default();
        for task in self.store.get_incomplete_tasks()? {
            if !self.inherited.contains(&task.initial_hash) {
                summary.skipped += 1;
                continue;
            }
            if submit(self.engine.as_ref(), &self.sink, &task.initial_hash, &task.target) {
                summary.submitted += 1;
            } else {
                summary.refused += 1;
            }
        }
        Ok(summary)
    }

    /// Delete tasks older than the retention window. Returns rows removed.
    pub fn cleanup(&self) -> Result<usize, StoreError> {
        self.store.cleanup_tasks(self.settings.retention_secs)
    }

    /// Wait out the startup delay, then sweep once.
    pub async fn run_startup_sweep(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let delay = Duration::from_secs(self.settings.startup_delay_secs);
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("startup sweep cancelled by shutdown");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        let scheduler = self.clone();
        match tokio::task::spawn_blocking(move || scheduler.sweep()).await {
            Ok(Ok(summary)) => tracing::info!(
                submitted = summary.submitted,
                refused = summary.refused,
                skipped = summary.skipped,
                "startup sweep complete"
            ),
            Ok(Err(e)) => tracing::warn!(error = %e, "startup sweep failed"),
            Err(e) => tracing::error!(error = %e, "startup sweep task panicked"),
        }
    }

    /// Run cleanup on its schedule until shutdown.
    pub async fn run_cleanup(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let first = Instant::now() + Duration::from_secs(self.settings.cleanup_first_delay_secs);
        let period = Duration::from_secs(self.settings.cleanup_interval_secs.max(1));
        let mut interval = tokio::time::interval_at(first, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("cleanup loop shutting down");
                    return;
                }

                _ = interval.tick() => {
                    let scheduler = self.clone();
                    match tokio::task::spawn_blocking(move || scheduler.cleanup()).await {
                        Ok(Ok(removed)) => tracing::info!(
                            removed,
                            retention_secs = self.settings.retention_secs,
                            "task cleanup complete"
                        ),
                        Ok(Err(e)) => tracing::warn!(error = %e, "task cleanup failed"),
                        Err(e) => tracing::error!(error = %e, "task cleanup panicked"),
                    }
                }
            }
        }
    }
}
