#![allow(dead_code)]

use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use xpr_control_plane::deploy::MockDeployer;
use xpr_control_plane::env::{EnvironmentOrder, OrderingPolicy};
use xpr_control_plane::state::{ControlPlane, Stores};
use xpr_control_plane::store::{
    AllocationFilter, AllocationLease, AllocationStore, Cluster, ClusterRegistry,
    EnvironmentAllocation, MemoryStore, ProjectRecord, ProjectRegistry, StoreError, StoreResult,
};
use xpr_names::{ClusterName, EnvironmentName, ProjectName};

pub fn name<T>(s: &str) -> T
where
    T: FromStr,
    T::Err: std::fmt::Debug,
{
    s.parse().unwrap()
}

pub fn env(s: &str) -> EnvironmentName {
    name(s)
}

pub fn envs(list: &[&str]) -> Vec<EnvironmentName> {
    list.iter().map(|s| env(s)).collect()
}

pub fn project(s: &str) -> ProjectName {
    name(s)
}

pub fn cluster(s: &str) -> ClusterName {
    name(s)
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub deployer: Arc<MockDeployer>,
    pub plane: ControlPlane,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(OrderingPolicy::default())
    }

    pub fn with_policy(policy: OrderingPolicy) -> Self {
        Self::with_stores(Arc::new(MemoryStore::new()), policy, |_| {})
    }

    /// Build over `store`, letting `customize` swap individual handles.
    pub fn with_stores(
        store: Arc<MemoryStore>,
        policy: OrderingPolicy,
        customize: impl FnOnce(&mut Stores),
    ) -> Self {
        let mut stores = Stores::memory(store.clone());
        customize(&mut stores);
        let deployer = Arc::new(MockDeployer::new());
        let plane = ControlPlane::new(
            stores,
            EnvironmentOrder::default(),
            policy,
            deployer.clone(),
        );
        Self {
            store,
            deployer,
            plane,
        }
    }

    pub async fn add_cluster(&self, name: &str) {
        self.store
            .insert_cluster(&Cluster::new(cluster(name)).with_master(format!("{name}-master")))
            .await
            .unwrap();
    }

    /// Seed `count` allocations on `cluster` owned by filler projects.
    pub async fn seed_load(&self, name: &str, count: usize) {
        for i in 0..count {
            self.store
                .insert(&EnvironmentAllocation::new(
                    project(&format!("filler-{name}-{i}")),
                    env("DEV"),
                    cluster(name),
                ))
                .await
                .unwrap();
        }
    }

    pub async fn add_project(&self, name: &str, environments: &[&str]) {
        self.store
            .insert_project(&ProjectRecord::new(project(name)))
            .await
            .unwrap();
        if !environments.is_empty() {
            self.plane
                .environments()
                .assign_environments(&project(name), &envs(environments))
                .await
                .unwrap();
        }
    }

    pub async fn project(&self, name: &str) -> ProjectRecord {
        self.store
            .find_project(&project(name))
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn assigned(&self, project_name: &str, environment: &str) -> Option<ClusterName> {
        self.plane
            .allocator()
            .assigned_cluster(&project(project_name), &env(environment))
            .await
            .unwrap()
    }
}

/// Allocation table over a [`MemoryStore`] that can fail deletes and counts
/// lease use.
#[derive(Debug)]
pub struct FaultyAllocations {
    pub inner: Arc<MemoryStore>,
    pub failing_deletes: AtomicUsize,
    pub leases_taken: Arc<AtomicUsize>,
    pub leases_released: Arc<AtomicUsize>,
}

impl FaultyAllocations {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            failing_deletes: AtomicUsize::new(0),
            leases_taken: Arc::new(AtomicUsize::new(0)),
            leases_released: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn fail_next_deletes(&self, count: usize) {
        self.failing_deletes.store(count, Ordering::SeqCst);
    }
}

struct CountingLease {
    released: Arc<AtomicUsize>,
}

#[async_trait]
impl AllocationLease for CountingLease {
    async fn release(self: Box<Self>) -> StoreResult<()> {
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl AllocationStore for FaultyAllocations {
    async fn lease(&self) -> StoreResult<Option<Box<dyn AllocationLease>>> {
        self.leases_taken.fetch_add(1, Ordering::SeqCst);
        Ok(Some(Box::new(CountingLease {
            released: self.leases_released.clone(),
        })))
    }

    async fn insert(&self, allocation: &EnvironmentAllocation) -> StoreResult<()> {
        self.inner.insert(allocation).await
    }

    async fn find(&self, filter: &AllocationFilter) -> StoreResult<Vec<EnvironmentAllocation>> {
        self.inner.find(filter).await
    }

    async fn delete(&self, filter: &AllocationFilter) -> StoreResult<u64> {
        let fail = self
            .failing_deletes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        self.inner.delete(filter).await
    }
}
