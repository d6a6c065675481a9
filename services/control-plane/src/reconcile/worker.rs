//! Reconciler background worker.
//!
//! Runs the allocation reconciliation loop on a periodic interval.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, instrument};

use super::reconciler::AllocationReconciler;

/// Worker that runs the reconciliation loop.
pub struct ReconcilerWorker {
    reconciler: AllocationReconciler,
    interval: Duration,
}

impl ReconcilerWorker {
    pub fn new(reconciler: AllocationReconciler, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
        }
    }

    /// Run the worker until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting allocation reconciler"
        );

        let mut interval = tokio::time::interval(self.interval);
        // Don't immediately tick on startup - wait for first interval
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.reconciler.reconcile_all().await {
                        Ok(stats) if stats.environments_allocated > 0 || stats.environments_moved > 0 => {
                            info!(
                                projects_processed = stats.projects_processed,
                                environments_allocated = stats.environments_allocated,
                                environments_moved = stats.environments_moved,
                                "Allocation reconciliation complete"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Allocation reconciliation failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Allocation reconciler shutting down");
                        break;
                    }
                }
            }
        }
    }
}
