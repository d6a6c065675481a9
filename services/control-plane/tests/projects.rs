mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::{env, envs, project, Harness};
use xpr_control_plane::env::OrderingPolicy;
use xpr_control_plane::store::{
    MemoryStore, ProjectPatch, ProjectRecord, ProjectRegistry, StoreResult,
};
use xpr_names::ProjectName;

/// Project registry that hands control back to the scheduler after every
/// read, widening the window between reading and writing a record.
struct YieldingProjects {
    inner: Arc<MemoryStore>,
}

#[async_trait]
impl ProjectRegistry for YieldingProjects {
    async fn find_project(&self, name: &ProjectName) -> StoreResult<Option<ProjectRecord>> {
        let record = self.inner.find_project(name).await;
        tokio::task::yield_now().await;
        record
    }

    async fn list_projects(&self) -> StoreResult<Vec<ProjectRecord>> {
        self.inner.list_projects().await
    }

    async fn insert_project(&self, project: &ProjectRecord) -> StoreResult<()> {
        self.inner.insert_project(project).await
    }

    async fn update_project(&self, name: &ProjectName, patch: &ProjectPatch) -> StoreResult<()> {
        tokio::task::yield_now().await;
        self.inner.update_project(name, patch).await
    }
}

#[tokio::test]
async fn concurrent_assignments_keep_every_environment() {
    let store = Arc::new(MemoryStore::new());
    let projects: Arc<dyn ProjectRegistry> = Arc::new(YieldingProjects {
        inner: store.clone(),
    });
    let h = Harness::with_stores(store, OrderingPolicy::default(), |stores| {
        stores.projects = projects;
    });
    h.add_cluster("A").await;
    h.add_project("acme", &[]).await;

    let p = project("acme");
    let dev = envs(&["DEV"]);
    let qa = envs(&["QA"]);
    let environments = h.plane.environments();
    let (first, second) = tokio::join!(
        environments.assign_environments(&p, &dev),
        environments.assign_environments(&p, &qa),
    );
    first.unwrap();
    second.unwrap();

    let record = h.project("acme").await;
    assert_eq!(record.environments.len(), 2);
    assert!(record.environments.contains(&env("DEV")));
    assert!(record.environments.contains(&env("QA")));
    assert_eq!(h.store.allocation_count(), 2);
}

#[tokio::test]
async fn concurrent_assign_and_remove_leave_record_matching_rows() {
    let store = Arc::new(MemoryStore::new());
    let projects: Arc<dyn ProjectRegistry> = Arc::new(YieldingProjects {
        inner: store.clone(),
    });
    let h = Harness::with_stores(store, OrderingPolicy::default(), |stores| {
        stores.projects = projects;
    });
    h.add_cluster("A").await;
    h.add_project("acme", &["DEV", "QA"]).await;

    let p = project("acme");
    let prod = envs(&["PROD"]);
    let qa = env("QA");
    let environments = h.plane.environments();
    let (assigned, removed) = tokio::join!(
        environments.assign_environments(&p, &prod),
        environments.remove_environment(&p, &qa),
    );
    assigned.unwrap();
    removed.unwrap();

    let record = h.project("acme").await;
    let rows = h.plane.allocator().allocations_for(&p).await.unwrap();
    let allocated: std::collections::BTreeSet<_> =
        rows.into_iter().map(|row| row.environment).collect();
    assert_eq!(record.environments, allocated);
    assert_eq!(record.environments.len(), 2);
}
