mod common;

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{cluster, env, envs, project, FaultyAllocations, Harness};
use proptest::prelude::*;
use xpr_control_plane::env::{EnvAllocator, EnvironmentOrder, OrderingPolicy};
use xpr_control_plane::store::{
    AllocationFilter, AllocationStore, Cluster, ClusterRegistry, MemoryStore,
};
use xpr_control_plane::{CoreError, ErrorKind};

#[tokio::test]
async fn allocate_is_idempotent() {
    let h = Harness::new();
    h.add_cluster("A").await;
    let allocator = h.plane.allocator();
    let p = project("acme");

    let first = allocator.allocate(&p, &envs(&["DEV", "QA"])).await.unwrap();
    assert_eq!(first.len(), 2);

    let second = allocator.allocate(&p, &envs(&["DEV", "QA"])).await.unwrap();
    assert!(second.is_empty());
    assert_eq!(allocator.allocations_for(&p).await.unwrap().len(), 2);
}

#[tokio::test]
async fn allocate_picks_least_loaded_and_spreads_within_a_call() {
    let h = Harness::new();
    h.add_cluster("A").await;
    h.add_cluster("B").await;
    h.add_cluster("C").await;
    h.seed_load("B", 2).await;
    h.seed_load("C", 1).await;

    h.plane
        .allocator()
        .allocate(&project("acme"), &envs(&["DEV", "QA"]))
        .await
        .unwrap();

    assert_eq!(h.assigned("acme", "DEV").await, Some(cluster("A")));
    assert_eq!(h.assigned("acme", "QA").await, Some(cluster("C")));
}

#[tokio::test]
async fn allocate_without_clusters_writes_nothing() {
    let h = Harness::new();

    let err = h
        .plane
        .allocator()
        .allocate(&project("acme"), &envs(&["DEV"]))
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::NoClustersAvailable));
    assert_eq!(err.kind(), ErrorKind::NoClustersAvailable);
    assert_eq!(h.store.allocation_count(), 0);
}

#[tokio::test]
async fn allocate_rejects_unknown_environment_before_writing() {
    let h = Harness::new();
    h.add_cluster("A").await;

    let err = h
        .plane
        .allocator()
        .allocate(&project("acme"), &envs(&["DEV", "UAT"]))
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::UnknownEnvironment { ref environment } if environment.as_str() == "UAT"));
    assert_eq!(err.code(), 251);
    assert_eq!(h.store.allocation_count(), 0);
}

#[tokio::test]
async fn inactive_clusters_are_never_chosen() {
    let h = Harness::new();
    h.store
        .insert_cluster(&Cluster::new(cluster("A")).inactive())
        .await
        .unwrap();
    h.add_cluster("B").await;
    h.seed_load("B", 5).await;

    h.plane
        .allocator()
        .allocate(&project("acme"), &envs(&["DEV"]))
        .await
        .unwrap();

    assert_eq!(h.assigned("acme", "DEV").await, Some(cluster("B")));
}

#[tokio::test]
async fn deallocate_removes_one_or_all() {
    let h = Harness::new();
    h.add_cluster("A").await;
    let allocator = h.plane.allocator();
    let p = project("acme");
    allocator
        .allocate(&p, &envs(&["DEV", "QA", "PROD"]))
        .await
        .unwrap();

    assert_eq!(allocator.deallocate(&p, Some(&env("QA"))).await.unwrap(), 1);
    assert_eq!(h.assigned("acme", "QA").await, None);
    assert_eq!(h.assigned("acme", "DEV").await, Some(cluster("A")));

    // Missing rows are not an error.
    assert_eq!(allocator.deallocate(&p, Some(&env("QA"))).await.unwrap(), 0);

    assert_eq!(allocator.deallocate(&p, None).await.unwrap(), 2);
    assert!(allocator.allocations_for(&p).await.unwrap().is_empty());
}

#[tokio::test]
async fn lookup_for_unallocated_pair_is_none() {
    let h = Harness::new();
    assert_eq!(h.assigned("nobody", "DEV").await, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_projects_share_load_evenly() {
    let store = Arc::new(MemoryStore::new());
    for name in ["A", "B", "C", "D"] {
        store.insert_cluster(&Cluster::new(cluster(name))).await.unwrap();
    }
    let allocator = Arc::new(EnvAllocator::new(
        store.clone(),
        store.clone(),
        EnvironmentOrder::default(),
    ));

    let handles: Vec<_> = (0..21)
        .map(|i| {
            let allocator = allocator.clone();
            tokio::spawn(async move {
                allocator
                    .allocate(&project(&format!("p{i}")), &envs(&["DEV", "QA"]))
                    .await
                    .unwrap()
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap().len(), 2);
    }

    let rows = store.find(&AllocationFilter::all()).await.unwrap();
    assert_eq!(rows.len(), 42);
    assert_eq!(store.allocation_count(), 42);

    let mut loads: BTreeMap<String, usize> =
        ["A", "B", "C", "D"].iter().map(|c| (c.to_string(), 0)).collect();
    for row in &rows {
        *loads.entry(row.cluster.to_string()).or_default() += 1;
    }
    let max = loads.values().max().copied().unwrap();
    let min = loads.values().min().copied().unwrap();
    assert!(max - min <= 1, "unbalanced loads: {loads:?}");
}

#[tokio::test]
async fn allocation_passes_hold_the_store_lease() {
    let store = Arc::new(MemoryStore::new());
    let allocations = Arc::new(FaultyAllocations::new(store.clone()));
    let handle: Arc<dyn AllocationStore> = allocations.clone();
    let h = Harness::with_stores(store, OrderingPolicy::default(), |stores| {
        stores.allocations = handle;
    });
    let p = project("acme");
    let allocator = h.plane.allocator();

    // Released even when the pass fails.
    assert!(allocator.allocate(&p, &envs(&["DEV"])).await.is_err());
    assert_eq!(allocations.leases_taken.load(Ordering::SeqCst), 1);
    assert_eq!(allocations.leases_released.load(Ordering::SeqCst), 1);

    h.add_cluster("A").await;
    h.add_cluster("B").await;
    allocator.allocate(&p, &envs(&["DEV"])).await.unwrap();
    h.plane.clusters().deactivate(&cluster("A")).await.unwrap();
    assert_eq!(allocations.leases_taken.load(Ordering::SeqCst), 3);
    assert_eq!(allocations.leases_released.load(Ordering::SeqCst), 3);

    // Unknown environments are rejected before any lease is taken.
    assert!(allocator.allocate(&p, &envs(&["UAT"])).await.is_err());
    assert_eq!(allocations.leases_taken.load(Ordering::SeqCst), 3);
}

fn run_concurrent_allocations(clusters: usize, callers: usize, environments: Vec<&'static str>) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async move {
        let store = Arc::new(MemoryStore::new());
        for i in 0..clusters {
            store
                .insert_cluster(&Cluster::new(cluster(&format!("c{i}"))))
                .await
                .unwrap();
        }
        let allocator = Arc::new(EnvAllocator::new(
            store.clone(),
            store.clone(),
            EnvironmentOrder::default(),
        ));

        let requested = envs(&environments);
        let handles: Vec<_> = (0..callers)
            .map(|_| {
                let allocator = allocator.clone();
                let requested = requested.clone();
                tokio::spawn(async move {
                    allocator
                        .allocate(&project("acme"), &requested)
                        .await
                        .unwrap()
                        .len()
                })
            })
            .collect();

        let mut created = 0;
        for handle in handles {
            created += handle.await.unwrap();
        }

        let mut distinct = requested.clone();
        distinct.sort();
        distinct.dedup();

        let rows = store
            .find(&AllocationFilter::project(&project("acme")))
            .await
            .unwrap();
        assert_eq!(created, distinct.len());
        assert_eq!(rows.len(), distinct.len());
    });
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn concurrent_allocations_never_duplicate_a_pair(
        clusters in 1usize..4,
        callers in 2usize..8,
        environments in proptest::sample::subsequence(vec!["DEV", "QA", "STAGING", "PROD"], 1..=4),
    ) {
        run_concurrent_allocations(clusters, callers, environments);
    }
}
