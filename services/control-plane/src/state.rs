//! Wiring of the allocation core over a set of store backends.

use std::sync::Arc;

use crate::clusters::ClusterManager;
use crate::db::Database;
use crate::deploy::{Deployer, DeploymentOrchestrator};
use crate::env::{EnvAllocator, EnvironmentOrder, OrderValidator, OrderingPolicy, ProjectEnvironments};
use crate::reconcile::AllocationReconciler;
use crate::store::{AllocationStore, ClusterRegistry, MemoryStore, ProjectRegistry};

/// The three store handles the core depends on.
#[derive(Clone)]
pub struct Stores {
    pub clusters: Arc<dyn ClusterRegistry>,
    pub allocations: Arc<dyn AllocationStore>,
    pub projects: Arc<dyn ProjectRegistry>,
}

impl Stores {
    /// All three handles backed by one in-memory store.
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            clusters: store.clone(),
            allocations: store.clone(),
            projects: store,
        }
    }

    pub fn postgres(db: &Database) -> Self {
        Self {
            clusters: Arc::new(db.cluster_registry()),
            allocations: Arc::new(db.allocation_store()),
            projects: Arc::new(db.project_registry()),
        }
    }
}

/// Shared handle to the control-plane services.
///
/// Every service shares a single [`EnvAllocator`], so allocation, removal and
/// repair are serialized across all of them.
#[derive(Clone)]
pub struct ControlPlane {
    inner: Arc<ControlPlaneInner>,
}

struct ControlPlaneInner {
    stores: Stores,
    allocator: Arc<EnvAllocator>,
    orchestrator: DeploymentOrchestrator,
    clusters: ClusterManager,
    environments: ProjectEnvironments,
}

impl ControlPlane {
    pub fn new(
        stores: Stores,
        order: EnvironmentOrder,
        policy: OrderingPolicy,
        deployer: Arc<dyn Deployer>,
    ) -> Self {
        let allocator = Arc::new(EnvAllocator::new(
            stores.clusters.clone(),
            stores.allocations.clone(),
            order.clone(),
        ));
        let orchestrator = DeploymentOrchestrator::new(
            allocator.clone(),
            OrderValidator::new(order, policy),
            stores.clusters.clone(),
            stores.projects.clone(),
            deployer,
        );
        let clusters = ClusterManager::new(stores.clusters.clone(), allocator.clone());
        let environments = ProjectEnvironments::new(allocator.clone(), stores.projects.clone());

        Self {
            inner: Arc::new(ControlPlaneInner {
                stores,
                allocator,
                orchestrator,
                clusters,
                environments,
            }),
        }
    }

    pub fn stores(&self) -> &Stores {
        &self.inner.stores
    }

    pub fn allocator(&self) -> &Arc<EnvAllocator> {
        &self.inner.allocator
    }

    pub fn orchestrator(&self) -> &DeploymentOrchestrator {
        &self.inner.orchestrator
    }

    pub fn clusters(&self) -> &ClusterManager {
        &self.inner.clusters
    }

    pub fn environments(&self) -> &ProjectEnvironments {
        &self.inner.environments
    }

    /// A reconciler sharing this control plane's allocator.
    pub fn reconciler(&self) -> AllocationReconciler {
        AllocationReconciler::new(
            self.inner.allocator.clone(),
            self.inner.stores.projects.clone(),
        )
    }
}
