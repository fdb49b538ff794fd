//! Background maintenance for every registered agent.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::coordinator::{MaintenancePolicy, MaintenanceReport};
use crate::registry::Registry;

/// Run one maintenance pass over every registered agent. Steps for tiers an
/// agent has disabled are skipped by [`crate::MemoryCoordinator::run_maintenance`].
pub async fn run_once(registry: &Registry, policy: &MaintenancePolicy) -> Vec<(String, MaintenanceReport)> {
    let mut reports = Vec::new();

    for agent_id in registry.agents().await {
        let Some(coordinator) = registry.get(&agent_id).await else {
            continue;
        };

        let report = coordinator.run_maintenance(policy).await;
        if report.has_changes() {
            info!(
                agent_id = %agent_id,
                consolidated = report.consolidation.migrated + report.overflow.migrated,
                forgotten = report.forgotten,
                trimmed = report.trimmed,
                errors = report.errors.len(),
                "Maintenance pass finished"
            );
        }
        reports.push((agent_id, report));
    }

    reports
}

/// Periodic maintenance task.
pub struct MaintenanceScheduler;

impl MaintenanceScheduler {
    /// Spawn a task running [`run_once`] every `every`.
    ///
    /// The first pass happens one period after spawning. The task stops when
    /// the returned handle is shut down or dropped.
    pub fn spawn(registry: Arc<Registry>, policy: MaintenancePolicy, every: Duration) -> MaintenanceHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let period = every.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            info!(period_secs = period.as_secs(), "Maintenance scheduler started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        let reports = run_once(&registry, &policy).await;
                        debug!(agents = reports.len(), "Maintenance tick");
                    }
                }
            }
            info!("Maintenance scheduler stopped");
        });

        MaintenanceHandle {
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

/// Handle to a running [`MaintenanceScheduler`].
pub struct MaintenanceHandle {
    shutdown_tx: Option<mpsc::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl MaintenanceHandle {
    /// Stop the scheduler and wait for an in-progress pass to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Maintenance task ended abnormally");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }
}
