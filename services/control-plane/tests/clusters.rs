mod common;

use common::{cluster, env, envs, project, Harness};
use xpr_control_plane::clusters::{ClusterSpec, Registration};
use xpr_control_plane::deploy::DeployRequest;
use xpr_control_plane::env::RepairResult;
use xpr_control_plane::{CoreError, ErrorKind};

#[tokio::test]
async fn register_then_reject_duplicate() {
    let h = Harness::new();
    let manager = h.plane.clusters();

    let spec = ClusterSpec::new(cluster("A"));
    assert_eq!(manager.register(spec.clone()).await.unwrap(), Registration::Created);

    let err = manager.register(spec).await.unwrap_err();
    assert!(matches!(err, CoreError::ClusterAlreadyExists { .. }));
    assert_eq!(err.code(), 122);
    assert_eq!(manager.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn deactivation_moves_environments_to_least_loaded_cluster() {
    let h = Harness::new();
    h.add_cluster("B").await;
    h.add_project("acme", &["DEV"]).await;
    assert_eq!(h.assigned("acme", "DEV").await, Some(cluster("B")));

    h.add_cluster("A").await;
    h.add_cluster("C").await;
    h.seed_load("A", 2).await;

    let report = h.plane.clusters().deactivate(&cluster("B")).await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.reallocated_count(), 1);
    assert_eq!(report.outcomes[0].project, project("acme"));
    assert_eq!(
        report.outcomes[0].result,
        RepairResult::Reallocated {
            cluster: cluster("C")
        }
    );
    assert_eq!(h.assigned("acme", "DEV").await, Some(cluster("C")));

    let b = h.plane.clusters().get(&cluster("B")).await.unwrap().unwrap();
    assert!(!b.active);
}

#[tokio::test]
async fn deactivating_last_cluster_reports_failures() {
    let h = Harness::new();
    h.add_cluster("A").await;
    h.add_project("acme", &["DEV", "QA"]).await;

    let report = h.plane.clusters().deactivate(&cluster("A")).await.unwrap();

    assert!(!report.is_complete());
    assert_eq!(report.failures().count(), 2);
    for outcome in &report.outcomes {
        match &outcome.result {
            RepairResult::Failed { kind, .. } => assert_eq!(*kind, ErrorKind::NoClustersAvailable),
            other => panic!("unexpected result: {other:?}"),
        }
    }
    assert_eq!(h.store.allocation_count(), 0);

    // The project still records its environments.
    assert_eq!(h.project("acme").await.environments.len(), 2);
}

#[tokio::test]
async fn deactivate_unknown_or_inactive_cluster_fails() {
    let h = Harness::new();
    h.add_cluster("A").await;
    let manager = h.plane.clusters();

    let err = manager.deactivate(&cluster("Z")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ClusterNotFound);
    assert_eq!(err.code(), 121);

    manager.deactivate(&cluster("A")).await.unwrap();
    let err = manager.deactivate(&cluster("A")).await.unwrap_err();
    assert!(matches!(err, CoreError::ClusterNotFound { .. }));
}

#[tokio::test]
async fn register_reactivates_inactive_cluster() {
    let h = Harness::new();
    let manager = h.plane.clusters();
    manager
        .register(ClusterSpec::new(cluster("A")))
        .await
        .unwrap();
    manager.deactivate(&cluster("A")).await.unwrap();

    let registration = manager
        .register(ClusterSpec::new(cluster("A")))
        .await
        .unwrap();
    assert_eq!(registration, Registration::Reactivated);
    assert!(manager.get(&cluster("A")).await.unwrap().unwrap().active);
}

#[tokio::test]
async fn reconciler_heals_environment_left_without_cluster() {
    let h = Harness::new();
    h.add_cluster("A").await;
    h.add_project("acme", &["DEV"]).await;
    h.plane.clusters().deactivate(&cluster("A")).await.unwrap();
    assert_eq!(h.assigned("acme", "DEV").await, None);

    let reconciler = h.plane.reconciler();

    // No active cluster yet: the project fails but the pass completes.
    let stats = reconciler.reconcile_all().await.unwrap();
    assert_eq!(stats.projects_failed, 1);
    assert_eq!(stats.environments_allocated, 0);

    h.add_cluster("B").await;
    let stats = reconciler.reconcile_all().await.unwrap();
    assert_eq!(stats.projects_processed, 1);
    assert_eq!(stats.environments_allocated, 1);
    assert_eq!(h.assigned("acme", "DEV").await, Some(cluster("B")));

    // A second pass has nothing to do.
    let stats = reconciler.reconcile_all().await.unwrap();
    assert_eq!(stats.environments_allocated, 0);
}

#[tokio::test]
async fn deploy_after_deactivation_uses_new_cluster() {
    let h = Harness::new();
    h.add_cluster("A").await;
    h.add_cluster("B").await;
    h.add_project("acme", &["DEV"]).await;
    let before = h.assigned("acme", "DEV").await.unwrap();

    h.plane.clusters().deactivate(&before).await.unwrap();
    let outcome = h
        .plane
        .orchestrator()
        .deploy(DeployRequest::new(project("acme"), env("DEV")))
        .await
        .unwrap();
    assert_ne!(outcome.cluster, before);
}

#[tokio::test]
async fn project_environments_track_allocations() {
    let h = Harness::new();
    h.add_cluster("A").await;
    h.add_project("acme", &["DEV"]).await;
    let environments = h.plane.environments();
    let p = project("acme");

    let created = environments
        .assign_environments(&p, &envs(&["DEV", "QA"]))
        .await
        .unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(h.project("acme").await.environments.len(), 2);

    environments.remove_environment(&p, &env("QA")).await.unwrap();
    assert_eq!(h.assigned("acme", "QA").await, None);
    assert!(!h.project("acme").await.environments.contains(&env("QA")));

    h.plane
        .orchestrator()
        .deploy(DeployRequest::new(p.clone(), env("DEV")))
        .await
        .unwrap();
    let err = environments.remove_environment(&p, &env("DEV")).await.unwrap_err();
    assert_eq!(err.code(), 177);
    let err = environments.release_project(&p).await.unwrap_err();
    assert!(matches!(err, CoreError::ProjectCurrentlyDeployed { .. }));

    h.plane
        .orchestrator()
        .commit_undeployed(&p, &env("DEV"))
        .await
        .unwrap();
    assert_eq!(environments.release_project(&p).await.unwrap(), 1);

    let record = h.project("acme").await;
    assert!(!record.active);
    assert!(record.environments.is_empty());
    assert_eq!(h.store.allocation_count(), 0);
}

#[tokio::test]
async fn assigning_to_missing_project_fails() {
    let h = Harness::new();
    h.add_cluster("A").await;

    let err = h
        .plane
        .environments()
        .assign_environments(&project("ghost"), &envs(&["DEV"]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProjectNotFound);
    assert_eq!(h.store.allocation_count(), 0);
}
