//! In-process deployer that records calls instead of touching a cluster.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use xpr_names::{ClusterName, EnvironmentName, ProjectName};

use super::deployer::{
    DeployTarget, Deployer, DeployerError, DeploymentOutput, ServiceEndpoint,
};

/// A recorded deployer call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployerCall {
    Deploy {
        project: ProjectName,
        environment: EnvironmentName,
        cluster: ClusterName,
    },
    Undeploy {
        project: ProjectName,
        environment: EnvironmentName,
        cluster: ClusterName,
    },
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<DeployerCall>,
    fail_next: Option<DeployerError>,
}

/// Deployer used by tests and local runs.
///
/// Each deployed component gets an endpoint on the cluster's master node.
#[derive(Debug, Default)]
pub struct MockDeployer {
    state: Mutex<MockState>,
}

impl MockDeployer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next deploy or undeploy call fail with `err`.
    pub fn fail_next(&self, err: DeployerError) {
        self.lock().fail_next = Some(err);
    }

    pub fn calls(&self) -> Vec<DeployerCall> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Deployer for MockDeployer {
    async fn deploy(&self, target: &DeployTarget) -> Result<DeploymentOutput, DeployerError> {
        let mut state = self.lock();
        if let Some(err) = state.fail_next.take() {
            return Err(err);
        }
        state.calls.push(DeployerCall::Deploy {
            project: target.project.clone(),
            environment: target.environment.clone(),
            cluster: target.cluster.name.clone(),
        });

        let host = target
            .cluster
            .master_node_address
            .clone()
            .unwrap_or_else(|| target.cluster.name.to_string());
        let endpoints = target
            .components
            .keys()
            .map(|component| ServiceEndpoint {
                component: component.clone(),
                address: format!("{host}/{}/{component}", target.project),
            })
            .collect();
        Ok(DeploymentOutput { endpoints })
    }

    async fn undeploy(&self, target: &DeployTarget) -> Result<(), DeployerError> {
        let mut state = self.lock();
        if let Some(err) = state.fail_next.take() {
            return Err(err);
        }
        state.calls.push(DeployerCall::Undeploy {
            project: target.project.clone(),
            environment: target.environment.clone(),
            cluster: target.cluster.name.clone(),
        });
        Ok(())
    }
}
