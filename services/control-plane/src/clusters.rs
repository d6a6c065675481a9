//! Cluster registration and deactivation.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use xpr_names::ClusterName;

use crate::env::{EnvAllocator, RepairReport};
use crate::error::{CoreError, CoreResult};
use crate::store::{Cluster, ClusterRegistry};

/// Cluster registration input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub name: ClusterName,
    #[serde(default)]
    pub master_node_address: Option<String>,
    #[serde(default)]
    pub worker_node_addresses: BTreeSet<String>,
}

impl ClusterSpec {
    pub fn new(name: ClusterName) -> Self {
        Self {
            name,
            master_node_address: None,
            worker_node_addresses: BTreeSet::new(),
        }
    }
}

/// What [`ClusterManager::register`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Created,
    /// A previously deactivated cluster of the same name was switched back on.
    Reactivated,
}

pub struct ClusterManager {
    clusters: Arc<dyn ClusterRegistry>,
    allocator: Arc<EnvAllocator>,
}

impl ClusterManager {
    pub fn new(clusters: Arc<dyn ClusterRegistry>, allocator: Arc<EnvAllocator>) -> Self {
        Self {
            clusters,
            allocator,
        }
    }

    /// Register a cluster, or reactivate it if it exists but is inactive.
    ///
    /// Reactivation keeps the stored node addresses.
    ///
    /// # Errors
    ///
    /// [`CoreError::ClusterAlreadyExists`] if an active cluster has this name.
    #[instrument(skip(self, spec), fields(cluster = %spec.name))]
    pub async fn register(&self, spec: ClusterSpec) -> CoreResult<Registration> {
        match self.clusters.find_cluster(&spec.name).await? {
            Some(existing) if existing.active => Err(CoreError::ClusterAlreadyExists {
                cluster: spec.name,
            }),
            Some(_) => {
                self.clusters.set_cluster_active(&spec.name, true).await?;
                info!("Reactivated cluster");
                Ok(Registration::Reactivated)
            }
            None => {
                let cluster = Cluster {
                    name: spec.name,
                    active: true,
                    master_node_address: spec.master_node_address,
                    worker_node_addresses: spec.worker_node_addresses,
                };
                match self.clusters.insert_cluster(&cluster).await {
                    Ok(()) => {
                        info!("Registered cluster");
                        Ok(Registration::Created)
                    }
                    Err(e) if e.is_conflict() => Err(CoreError::ClusterAlreadyExists {
                        cluster: cluster.name,
                    }),
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    /// Deactivate a cluster and move its environments to other clusters.
    ///
    /// # Errors
    ///
    /// [`CoreError::ClusterNotFound`] if the cluster does not exist, or is
    /// already inactive and holds no allocations. Environments that could not
    /// be moved are reported in the returned [`RepairReport`], not as an
    /// error.
    #[instrument(skip(self, name), fields(cluster = %name))]
    pub async fn deactivate(&self, name: &ClusterName) -> CoreResult<RepairReport> {
        let Some(cluster) = self.clusters.find_cluster(name).await? else {
            return Err(CoreError::ClusterNotFound {
                cluster: name.clone(),
            });
        };

        if cluster.active {
            self.clusters.set_cluster_active(name, false).await?;
            info!("Deactivated cluster");
        } else if self.allocator.holds_allocations(name).await? {
            // An earlier repair did not finish.
            info!("Resuming repair of inactive cluster");
        } else {
            return Err(CoreError::ClusterNotFound {
                cluster: name.clone(),
            });
        }

        let report = self.allocator.reallocate_on_cluster_deactivation(name).await?;
        if !report.is_complete() {
            warn!(
                failed = report.failures().count(),
                "Some environments could not be reallocated"
            );
        }
        Ok(report)
    }

    pub async fn get(&self, name: &ClusterName) -> CoreResult<Option<Cluster>> {
        Ok(self.clusters.find_cluster(name).await?)
    }

    pub async fn list(&self) -> CoreResult<Vec<Cluster>> {
        Ok(self.clusters.list_clusters().await?)
    }
}
