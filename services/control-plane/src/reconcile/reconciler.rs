//! Allocation reconciler.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use xpr_names::EnvironmentName;

use crate::env::EnvAllocator;
use crate::error::CoreResult;
use crate::store::{ProjectRecord, ProjectRegistry};

/// Statistics from a reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileStats {
    pub projects_processed: usize,
    pub projects_failed: usize,
    pub environments_allocated: usize,
    /// Recorded environments that are no longer configured.
    pub environments_skipped: usize,
    /// Inactive clusters whose leftover allocations were moved.
    pub clusters_repaired: usize,
    pub environments_moved: usize,
}

/// Re-allocates environments that lost their cluster binding.
pub struct AllocationReconciler {
    allocator: Arc<EnvAllocator>,
    projects: Arc<dyn ProjectRegistry>,
}

impl AllocationReconciler {
    pub fn new(allocator: Arc<EnvAllocator>, projects: Arc<dyn ProjectRegistry>) -> Self {
        Self {
            allocator,
            projects,
        }
    }

    /// Run a single reconciliation pass.
    ///
    /// First moves rows still bound to inactive clusters, then allocates
    /// recorded environments of active projects that have no row. A failing
    /// project is logged and counted; the pass continues.
    #[instrument(skip(self))]
    pub async fn reconcile_all(&self) -> CoreResult<ReconcileStats> {
        let mut stats = ReconcileStats::default();

        match self.allocator.repair_inactive_clusters().await {
            Ok(reports) => {
                stats.clusters_repaired = reports.len();
                stats.environments_moved =
                    reports.iter().map(|r| r.reallocated_count()).sum();
            }
            Err(e) => warn!(error = %e, "Failed to repair inactive clusters"),
        }

        let projects = self.projects.list_projects().await?;
        debug!(project_count = projects.len(), "Found projects to reconcile");

        for project in projects.iter().filter(|p| p.active) {
            match self.reconcile_project(project, &mut stats).await {
                Ok(allocated) => {
                    stats.projects_processed += 1;
                    stats.environments_allocated += allocated;
                }
                Err(e) => {
                    warn!(
                        project = %project.name,
                        error = %e,
                        "Failed to reconcile project"
                    );
                    stats.projects_failed += 1;
                }
            }
        }

        info!(
            projects_processed = stats.projects_processed,
            projects_failed = stats.projects_failed,
            environments_allocated = stats.environments_allocated,
            environments_moved = stats.environments_moved,
            "Reconciliation pass complete"
        );

        Ok(stats)
    }

    async fn reconcile_project(
        &self,
        project: &ProjectRecord,
        stats: &mut ReconcileStats,
    ) -> CoreResult<usize> {
        let order = self.allocator.order();
        let (wanted, unknown): (Vec<EnvironmentName>, Vec<EnvironmentName>) = project
            .environments
            .iter()
            .cloned()
            .partition(|env| order.contains(env.as_str()));

        for env in &unknown {
            warn!(
                project = %project.name,
                environment = %env,
                "Recorded environment is not configured"
            );
        }
        stats.environments_skipped += unknown.len();

        if wanted.is_empty() {
            return Ok(0);
        }

        let created = self.allocator.allocate(&project.name, &wanted).await?;
        for allocation in &created {
            info!(
                project = %allocation.project,
                environment = %allocation.environment,
                cluster = %allocation.cluster,
                "Restored missing allocation"
            );
        }
        Ok(created.len())
    }
}
