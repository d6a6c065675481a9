//! In-process store backend.
//!
//! Keeps clusters, allocations and projects in ordered maps behind
//! `RwLock`s. Allocations are keyed by (project, environment), so the
//! uniqueness rule holds by construction.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use xpr_names::{ClusterName, EnvironmentName, ProjectName};

use super::{
    AllocationFilter, AllocationStore, Cluster, ClusterRegistry, EnvironmentAllocation,
    ProjectPatch, ProjectRecord, ProjectRegistry, StoreError, StoreResult,
};

type AllocationKey = (ProjectName, EnvironmentName);

/// Cluster registry, allocation table and project registry in one value.
#[derive(Debug, Default)]
pub struct MemoryStore {
    clusters: RwLock<BTreeMap<ClusterName, Cluster>>,
    allocations: RwLock<BTreeMap<AllocationKey, EnvironmentAllocation>>,
    projects: RwLock<BTreeMap<ProjectName, ProjectRecord>>,
}

// Every mutation below is a single map operation, so a poisoned lock still
// guards consistent data.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of allocation rows, across all projects.
    pub fn allocation_count(&self) -> usize {
        read(&self.allocations).len()
    }
}

#[async_trait]
impl ClusterRegistry for MemoryStore {
    async fn find_active_clusters(&self) -> StoreResult<Vec<Cluster>> {
        Ok(read(&self.clusters)
            .values()
            .filter(|c| c.active)
            .cloned()
            .collect())
    }

    async fn find_cluster(&self, name: &ClusterName) -> StoreResult<Option<Cluster>> {
        Ok(read(&self.clusters).get(name).cloned())
    }

    async fn list_clusters(&self) -> StoreResult<Vec<Cluster>> {
        Ok(read(&self.clusters).values().cloned().collect())
    }

    async fn insert_cluster(&self, cluster: &Cluster) -> StoreResult<()> {
        let mut clusters = write(&self.clusters);
        if clusters.contains_key(&cluster.name) {
            return Err(StoreError::Conflict {
                kind: "cluster",
                key: cluster.name.to_string(),
            });
        }
        clusters.insert(cluster.name.clone(), cluster.clone());
        Ok(())
    }

    async fn set_cluster_active(&self, name: &ClusterName, active: bool) -> StoreResult<bool> {
        match write(&self.clusters).get_mut(name) {
            Some(cluster) => {
                cluster.active = active;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl AllocationStore for MemoryStore {
    async fn insert(&self, allocation: &EnvironmentAllocation) -> StoreResult<()> {
        let key = (allocation.project.clone(), allocation.environment.clone());
        let mut allocations = write(&self.allocations);
        if allocations.contains_key(&key) {
            return Err(StoreError::Conflict {
                kind: "allocation",
                key: format!("{}/{}", allocation.project, allocation.environment),
            });
        }
        allocations.insert(key, allocation.clone());
        Ok(())
    }

    async fn find(&self, filter: &AllocationFilter) -> StoreResult<Vec<EnvironmentAllocation>> {
        Ok(read(&self.allocations)
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect())
    }

    async fn delete(&self, filter: &AllocationFilter) -> StoreResult<u64> {
        let mut allocations = write(&self.allocations);
        let before = allocations.len();
        allocations.retain(|_, a| !filter.matches(a));
        Ok((before - allocations.len()) as u64)
    }
}

#[async_trait]
impl ProjectRegistry for MemoryStore {
    async fn find_project(&self, name: &ProjectName) -> StoreResult<Option<ProjectRecord>> {
        Ok(read(&self.projects).get(name).cloned())
    }

    async fn list_projects(&self) -> StoreResult<Vec<ProjectRecord>> {
        Ok(read(&self.projects).values().cloned().collect())
    }

    async fn insert_project(&self, project: &ProjectRecord) -> StoreResult<()> {
        let mut projects = write(&self.projects);
        if projects.contains_key(&project.name) {
            return Err(StoreError::Conflict {
                kind: "project",
                key: project.name.to_string(),
            });
        }
        projects.insert(project.name.clone(), project.clone());
        Ok(())
    }

    async fn update_project(&self, name: &ProjectName, patch: &ProjectPatch) -> StoreResult<()> {
        match write(&self.projects).get_mut(name) {
            Some(record) => {
                patch.apply(record);
                Ok(())
            }
            None => Err(StoreError::NotFound {
                kind: "project",
                key: name.to_string(),
            }),
        }
    }
}
