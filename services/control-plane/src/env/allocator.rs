//! Least-loaded environment allocator.
//!
//! The allocator is responsible for:
//! - Binding each requested (project, environment) pair to an active cluster
//! - Balancing bindings so the cluster with the fewest environments gets
//!   the next one
//! - Removing bindings on project teardown
//! - Moving bindings off a cluster that has been deactivated
//!
//! It is the only writer of allocation rows. Allocation, deallocation and
//! repair all run behind one async mutex because the load count is
//! read-then-write. Allocation and repair passes additionally hold the
//! store's [`AllocationLease`], which serializes them across processes.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use xpr_names::{ClusterName, EnvironmentName, ProjectName};

use super::order::EnvironmentOrder;
use crate::error::{CoreError, CoreResult, ErrorKind};
use crate::store::{
    AllocationFilter, AllocationLease, AllocationStore, ClusterRegistry, EnvironmentAllocation,
};

/// Assigns project environments to clusters.
pub struct EnvAllocator {
    clusters: Arc<dyn ClusterRegistry>,
    allocations: Arc<dyn AllocationStore>,
    order: EnvironmentOrder,
    lock: Mutex<()>,
}

impl EnvAllocator {
    /// Create a new allocator over the given stores.
    pub fn new(
        clusters: Arc<dyn ClusterRegistry>,
        allocations: Arc<dyn AllocationStore>,
        order: EnvironmentOrder,
    ) -> Self {
        Self {
            clusters,
            allocations,
            order,
            lock: Mutex::new(()),
        }
    }

    /// The configured environment order.
    pub fn order(&self) -> &EnvironmentOrder {
        &self.order
    }

    /// Allocate clusters to the requested environments of a project.
    ///
    /// Environments the project already holds are skipped, so repeating a
    /// call is a no-op. Returns the allocations created by this call.
    ///
    /// # Errors
    ///
    /// - [`CoreError::UnknownEnvironment`] if any requested environment is
    ///   not configured. Nothing is written.
    /// - [`CoreError::NoClustersAvailable`] if there is at least one new
    ///   environment and no active cluster. Nothing is written.
    #[instrument(skip(self, project, requested), fields(project = %project))]
    pub async fn allocate(
        &self,
        project: &ProjectName,
        requested: &[EnvironmentName],
    ) -> CoreResult<Vec<EnvironmentAllocation>> {
        self.check_configured(requested)?;

        let _guard = self.lock.lock().await;
        let lease = self.allocations.lease().await?;
        let result = self.allocate_locked(project, requested, None).await;
        release(lease).await;
        result
    }

    /// Remove one allocation of a project, or all of them when
    /// `environment` is `None`. Missing rows are not an error.
    #[instrument(skip(self, project), fields(project = %project))]
    pub async fn deallocate(
        &self,
        project: &ProjectName,
        environment: Option<&EnvironmentName>,
    ) -> CoreResult<u64> {
        let mut filter = AllocationFilter::project(project);
        if let Some(environment) = environment {
            filter = filter.with_environment(environment);
        }

        let _guard = self.lock.lock().await;
        let removed = self.allocations.delete(&filter).await?;
        info!(
            project = %project,
            environment = environment.map(|e| e.as_str()).unwrap_or("*"),
            removed,
            "Removed environment allocations"
        );
        Ok(removed)
    }

    /// Cluster currently hosting `environment` of `project`, if any.
    pub async fn assigned_cluster(
        &self,
        project: &ProjectName,
        environment: &EnvironmentName,
    ) -> CoreResult<Option<ClusterName>> {
        let rows = self
            .allocations
            .find(&AllocationFilter::project(project).with_environment(environment))
            .await?;
        Ok(rows.into_iter().next().map(|row| row.cluster))
    }

    /// All allocations of a project.
    pub async fn allocations_for(
        &self,
        project: &ProjectName,
    ) -> CoreResult<Vec<EnvironmentAllocation>> {
        Ok(self
            .allocations
            .find(&AllocationFilter::project(project))
            .await?)
    }

    /// Move every allocation off a deactivated cluster.
    ///
    /// Each displaced (project, environment) pair is re-run through the
    /// least-loaded assignment on its own. A pair that cannot be placed is
    /// recorded in the report and the remaining pairs are still attempted.
    ///
    /// # Errors
    ///
    /// Only store failures while reading or deleting the displaced rows are
    /// returned as `Err`; per-pair failures land in the report.
    #[instrument(skip(self, cluster), fields(cluster = %cluster))]
    pub async fn reallocate_on_cluster_deactivation(
        &self,
        cluster: &ClusterName,
    ) -> CoreResult<RepairReport> {
        let _guard = self.lock.lock().await;
        let lease = self.allocations.lease().await?;
        let result = self.repair_locked(cluster).await;
        release(lease).await;
        result
    }

    /// Re-run the repair for every inactive cluster that still holds rows,
    /// e.g. after a deactivation whose repair failed part way.
    pub async fn repair_inactive_clusters(&self) -> CoreResult<Vec<RepairReport>> {
        let mut reports = Vec::new();
        for cluster in self.clusters.list_clusters().await? {
            if cluster.active || !self.holds_allocations(&cluster.name).await? {
                continue;
            }
            warn!(cluster = %cluster.name, "Inactive cluster still holds allocations");
            reports.push(self.reallocate_on_cluster_deactivation(&cluster.name).await?);
        }
        Ok(reports)
    }

    /// True if any allocation row points at `cluster`.
    pub async fn holds_allocations(&self, cluster: &ClusterName) -> CoreResult<bool> {
        Ok(!self
            .allocations
            .find(&AllocationFilter::cluster(cluster))
            .await?
            .is_empty())
    }

    /// Repair body. Caller must hold `self.lock`.
    async fn repair_locked(&self, cluster: &ClusterName) -> CoreResult<RepairReport> {
        let filter = AllocationFilter::cluster(cluster);
        let displaced = self.allocations.find(&filter).await?;
        let removed = self.allocations.delete(&filter).await?;
        info!(
            displaced = displaced.len(),
            removed, "Reallocating environments of deactivated cluster"
        );

        let mut report = RepairReport::new(cluster.clone());
        for row in displaced {
            let result = match self
                .allocate_locked(
                    &row.project,
                    std::slice::from_ref(&row.environment),
                    Some(cluster),
                )
                .await
            {
                Ok(created) => match created.into_iter().next() {
                    Some(allocation) => RepairResult::Reallocated {
                        cluster: allocation.cluster,
                    },
                    None => match self.assigned_cluster(&row.project, &row.environment).await {
                        Ok(Some(cluster)) => RepairResult::Reallocated { cluster },
                        Ok(None) => RepairResult::failed(&CoreError::NoClustersAvailable),
                        Err(e) => RepairResult::failed(&e),
                    },
                },
                Err(e) => {
                    warn!(
                        project = %row.project,
                        environment = %row.environment,
                        error = %e,
                        "Failed to reallocate environment"
                    );
                    RepairResult::failed(&e)
                }
            };
            report.outcomes.push(RepairOutcome {
                project: row.project,
                environment: row.environment,
                result,
            });
        }

        info!(
            reallocated = report.reallocated_count(),
            failed = report.failures().count(),
            "Cluster repair complete"
        );
        Ok(report)
    }

    fn check_configured(&self, requested: &[EnvironmentName]) -> CoreResult<()> {
        match requested.iter().find(|env| !self.order.contains(env.as_str())) {
            Some(env) => Err(CoreError::UnknownEnvironment {
                environment: env.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Allocation body. Caller must hold `self.lock`.
    async fn allocate_locked(
        &self,
        project: &ProjectName,
        requested: &[EnvironmentName],
        exclude: Option<&ClusterName>,
    ) -> CoreResult<Vec<EnvironmentAllocation>> {
        let existing = self
            .allocations
            .find(&AllocationFilter::project(project))
            .await?;
        let new_envs = pending_environments(requested, &existing);
        if new_envs.is_empty() {
            debug!(project = %project, "All requested environments already allocated");
            return Ok(Vec::new());
        }
        debug!(project = %project, new_envs = ?new_envs, "New environments required");

        let candidates: Vec<ClusterName> = self
            .clusters
            .find_active_clusters()
            .await?
            .into_iter()
            .filter(|c| c.active && Some(&c.name) != exclude)
            .map(|c| c.name)
            .collect();
        if candidates.is_empty() {
            return Err(CoreError::NoClustersAvailable);
        }

        let rows = self.allocations.find(&AllocationFilter::all()).await?;
        let mut queue = LoadQueue::new(candidates, &rows);
        debug!(loads = ?queue.loads(), "Current cluster loads");

        let mut created = Vec::with_capacity(new_envs.len());
        for environment in new_envs {
            let Some(cluster) = queue.pop() else {
                return Err(CoreError::NoClustersAvailable);
            };
            let allocation =
                EnvironmentAllocation::new(project.clone(), environment.clone(), cluster.clone());

            match self.allocations.insert(&allocation).await {
                Ok(()) => {
                    info!(
                        project = %project,
                        environment = %environment,
                        cluster = %cluster,
                        "Allocated environment"
                    );
                    queue.push_assigned(cluster);
                    created.push(allocation);
                }
                Err(e) if e.is_conflict() => {
                    // Another writer bound this pair first.
                    debug!(project = %project, environment = %environment, "Allocation already present");
                    queue.push_unchanged(cluster);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(created)
    }
}

async fn release(lease: Option<Box<dyn AllocationLease>>) {
    if let Some(lease) = lease {
        if let Err(e) = lease.release().await {
            warn!(error = %e, "Failed to release allocation lease");
        }
    }
}

/// Requested environments with no allocation row yet, in request order,
/// without duplicates.
fn pending_environments<'a>(
    requested: &'a [EnvironmentName],
    existing: &[EnvironmentAllocation],
) -> Vec<&'a EnvironmentName> {
    let allocated: BTreeSet<&EnvironmentName> = existing.iter().map(|a| &a.environment).collect();
    let mut seen = BTreeSet::new();
    requested
        .iter()
        .filter(|env| !allocated.contains(env) && seen.insert(*env))
        .collect()
}

/// Min-heap of candidate clusters keyed by `(load, turn)`.
///
/// `turn` starts as the cluster's rank by name and moves past every other
/// cluster each time the cluster receives an environment, so equally loaded
/// clusters take turns.
#[derive(Debug)]
struct LoadQueue {
    heap: BinaryHeap<Reverse<(usize, usize, ClusterName)>>,
    popped: Option<(usize, usize)>,
    next_turn: usize,
}

impl LoadQueue {
    fn new(mut candidates: Vec<ClusterName>, rows: &[EnvironmentAllocation]) -> Self {
        candidates.sort();
        candidates.dedup();

        let mut loads: BTreeMap<&ClusterName, usize> =
            candidates.iter().map(|c| (c, 0)).collect();
        for row in rows {
            if let Some(load) = loads.get_mut(&row.cluster) {
                *load += 1;
            }
        }

        let heap = candidates
            .iter()
            .enumerate()
            .map(|(turn, c)| Reverse((loads[c], turn, c.clone())))
            .collect();

        Self {
            heap,
            popped: None,
            next_turn: candidates.len(),
        }
    }

    /// Take the least loaded cluster. Must be followed by `push_assigned`
    /// or `push_unchanged` with the same cluster.
    fn pop(&mut self) -> Option<ClusterName> {
        let Reverse((load, turn, cluster)) = self.heap.pop()?;
        self.popped = Some((load, turn));
        Some(cluster)
    }

    fn push_assigned(&mut self, cluster: ClusterName) {
        if let Some((load, _)) = self.popped.take() {
            let turn = self.next_turn;
            self.next_turn += 1;
            self.heap.push(Reverse((load + 1, turn, cluster)));
        }
    }

    fn push_unchanged(&mut self, cluster: ClusterName) {
        if let Some((load, turn)) = self.popped.take() {
            self.heap.push(Reverse((load, turn, cluster)));
        }
    }

    fn loads(&self) -> BTreeMap<&str, usize> {
        self.heap
            .iter()
            .map(|Reverse((load, _, c))| (c.as_str(), *load))
            .collect()
    }
}

/// Outcome of moving one (project, environment) pair off a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RepairResult {
    Reallocated { cluster: ClusterName },
    Failed { kind: ErrorKind, message: String },
}

impl RepairResult {
    fn failed(err: &CoreError) -> Self {
        RepairResult::Failed {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, RepairResult::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairOutcome {
    pub project: ProjectName,
    pub environment: EnvironmentName,
    pub result: RepairResult,
}

/// Per-pair results of a cluster deactivation repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub cluster: ClusterName,
    pub outcomes: Vec<RepairOutcome>,
}

impl RepairReport {
    fn new(cluster: ClusterName) -> Self {
        Self {
            cluster,
            outcomes: Vec::new(),
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &RepairOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_failure())
    }

    pub fn reallocated_count(&self) -> usize {
        self.outcomes.len() - self.failures().count()
    }

    /// True if every displaced pair found a new cluster.
    pub fn is_complete(&self) -> bool {
        self.failures().next().is_none()
    }
}
