//! Deploy/undeploy sequencing.
//!
//! A deploy runs in two phases:
//! 1. Validate the target against the ordering rule, resolve the cluster
//!    that hosts it, and hand the work to the [`Deployer`]
//! 2. Record the environment as deployed on the project
//!
//! If phase 2 fails after phase 1 succeeded the caller gets
//! [`CoreError::StateSyncFailed`] and can retry [`DeploymentOrchestrator::commit_deployed`]
//! alone. Undeploy mirrors this with [`DeploymentOrchestrator::commit_undeployed`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info, instrument};
use xpr_names::{ClusterName, EnvironmentName, ProjectName};

use super::deployer::{ClusterRef, DeployTarget, Deployer, DeploymentOutput};
use crate::env::{EnvAllocator, OrderValidator};
use crate::error::{CoreError, CoreResult, SyncAction};
use crate::store::{ClusterRegistry, ProjectPatch, ProjectRecord, ProjectRegistry, StoreResult};

/// A request to deploy a project to one environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployRequest {
    #[serde(rename = "name")]
    pub project: ProjectName,
    #[serde(default)]
    pub target_environment: Option<EnvironmentName>,
    #[serde(default)]
    pub components: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub pipelines: BTreeMap<String, serde_json::Value>,
}

impl DeployRequest {
    pub fn new(project: ProjectName, target_environment: EnvironmentName) -> Self {
        Self {
            project,
            target_environment: Some(target_environment),
            components: BTreeMap::new(),
            pipelines: BTreeMap::new(),
        }
    }

    pub fn with_component(mut self, name: impl Into<String>, settings: serde_json::Value) -> Self {
        self.components.insert(name.into(), settings);
        self
    }
}

/// A request to undeploy a project from one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndeployRequest {
    #[serde(rename = "name")]
    pub project: ProjectName,
    #[serde(default)]
    pub target_environment: Option<EnvironmentName>,
}

impl UndeployRequest {
    pub fn new(project: ProjectName, target_environment: EnvironmentName) -> Self {
        Self {
            project,
            target_environment: Some(target_environment),
        }
    }
}

/// Result of a successful deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployOutcome {
    pub project: ProjectName,
    pub environment: EnvironmentName,
    pub cluster: ClusterName,
    pub output: DeploymentOutput,
}

/// Turns deploy/undeploy requests into cluster targets and deployment state.
pub struct DeploymentOrchestrator {
    allocator: Arc<EnvAllocator>,
    validator: OrderValidator,
    clusters: Arc<dyn ClusterRegistry>,
    projects: Arc<dyn ProjectRegistry>,
    deployer: Arc<dyn Deployer>,
    // Serializes read-modify-write of a project's deployed environments.
    commit_lock: Mutex<()>,
}

impl DeploymentOrchestrator {
    pub fn new(
        allocator: Arc<EnvAllocator>,
        validator: OrderValidator,
        clusters: Arc<dyn ClusterRegistry>,
        projects: Arc<dyn ProjectRegistry>,
        deployer: Arc<dyn Deployer>,
    ) -> Self {
        Self {
            allocator,
            validator,
            clusters,
            projects,
            deployer,
            commit_lock: Mutex::new(()),
        }
    }

    /// Validate a deploy target and return the cluster that hosts it.
    ///
    /// # Errors
    ///
    /// Ordering errors from [`OrderValidator::validate_deploy_target`], or a
    /// `cluster_not_found` error if the environment has no allocation or its
    /// cluster is missing or inactive.
    pub async fn resolve_cluster_for_deploy(
        &self,
        project: &ProjectName,
        target: Option<&EnvironmentName>,
    ) -> CoreResult<ClusterRef> {
        let record = self.load_project(project).await?;
        let target = self.validate_deploy(&record, target)?;
        self.cluster_for(project, target).await
    }

    /// Deploy a project to its target environment.
    #[instrument(skip(self, request), fields(project = %request.project))]
    pub async fn deploy(&self, request: DeployRequest) -> CoreResult<DeployOutcome> {
        let project = &request.project;
        let record = self.load_project(project).await?;
        let environment = self
            .validate_deploy(&record, request.target_environment.as_ref())?
            .clone();
        let cluster = self.cluster_for(project, &environment).await?;
        info!(environment = %environment, cluster = %cluster.name, "Deploying project");

        let target = DeployTarget {
            project: project.clone(),
            environment: environment.clone(),
            cluster,
            components: request.components,
            pipelines: request.pipelines,
        };
        let output = self
            .deployer
            .deploy(&target)
            .await
            .map_err(|source| CoreError::DeploymentFailed {
                project: project.clone(),
                environment: environment.clone(),
                source,
            })?;

        self.commit_deployed(project, &environment).await?;

        info!(
            environment = %environment,
            endpoints = output.endpoints.len(),
            "Deployment finished"
        );
        Ok(DeployOutcome {
            project: target.project,
            environment,
            cluster: target.cluster.name,
            output,
        })
    }

    /// Undeploy a project from its target environment.
    #[instrument(skip(self, request), fields(project = %request.project))]
    pub async fn undeploy(&self, request: UndeployRequest) -> CoreResult<()> {
        let project = &request.project;
        let record = self.load_project(project).await?;
        self.validator.validate_undeploy_target(
            project,
            request.target_environment.as_ref(),
            &record.deployed_environments,
        )?;
        let environment = request
            .target_environment
            .clone()
            .ok_or(CoreError::TargetEnvironmentNotSpecified)?;
        let cluster = self.cluster_for(project, &environment).await?;
        info!(environment = %environment, cluster = %cluster.name, "Undeploying project");

        let target = DeployTarget {
            project: project.clone(),
            environment: environment.clone(),
            cluster,
            components: BTreeMap::new(),
            pipelines: BTreeMap::new(),
        };
        self.deployer
            .undeploy(&target)
            .await
            .map_err(|source| CoreError::UndeploymentFailed {
                project: project.clone(),
                environment: environment.clone(),
                source,
            })?;

        self.commit_undeployed(project, &environment).await?;
        info!(environment = %environment, "Undeployment finished");
        Ok(())
    }

    /// Record `environment` as deployed. Idempotent.
    pub async fn commit_deployed(
        &self,
        project: &ProjectName,
        environment: &EnvironmentName,
    ) -> CoreResult<()> {
        let _guard = self.commit_lock.lock().await;
        self.write_deployed_state(project, |deployed| {
            deployed.insert(environment.clone());
        })
        .await
        .map_err(|source| {
            error!(
                project = %project,
                environment = %environment,
                error = %source,
                "Deployed to cluster but failed to record deployment state"
            );
            CoreError::StateSyncFailed {
                project: project.clone(),
                environment: environment.clone(),
                action: SyncAction::Deployed,
                source,
            }
        })
    }

    /// Record `environment` as no longer deployed. Idempotent.
    pub async fn commit_undeployed(
        &self,
        project: &ProjectName,
        environment: &EnvironmentName,
    ) -> CoreResult<()> {
        let _guard = self.commit_lock.lock().await;
        self.write_deployed_state(project, |deployed| {
            deployed.remove(environment);
        })
        .await
        .map_err(|source| {
            error!(
                project = %project,
                environment = %environment,
                error = %source,
                "Undeployed from cluster but failed to record deployment state"
            );
            CoreError::StateSyncFailed {
                project: project.clone(),
                environment: environment.clone(),
                action: SyncAction::Undeployed,
                source,
            }
        })
    }

    async fn write_deployed_state<F>(&self, project: &ProjectName, change: F) -> StoreResult<()>
    where
        F: FnOnce(&mut std::collections::BTreeSet<EnvironmentName>),
    {
        let record = self.projects.find_project(project).await?.ok_or_else(|| {
            crate::store::StoreError::NotFound {
                kind: "project",
                key: project.to_string(),
            }
        })?;

        let mut deployed = record.deployed_environments.clone();
        change(&mut deployed);
        let currently_deployed = !deployed.is_empty();
        if deployed == record.deployed_environments
            && currently_deployed == record.currently_deployed
        {
            return Ok(());
        }

        let patch = ProjectPatch {
            deployed_environments: Some(deployed),
            currently_deployed: Some(currently_deployed),
            ..ProjectPatch::default()
        };
        self.projects.update_project(project, &patch).await
    }

    fn validate_deploy<'a>(
        &self,
        record: &ProjectRecord,
        target: Option<&'a EnvironmentName>,
    ) -> CoreResult<&'a EnvironmentName> {
        self.validator.validate_deploy_target(
            &record.name,
            target,
            &record.environments,
            &record.deployed_environments,
        )?;
        target.ok_or(CoreError::TargetEnvironmentNotSpecified)
    }

    async fn cluster_for(
        &self,
        project: &ProjectName,
        environment: &EnvironmentName,
    ) -> CoreResult<ClusterRef> {
        let Some(name) = self.allocator.assigned_cluster(project, environment).await? else {
            return Err(CoreError::NoClusterAssigned {
                project: project.clone(),
                environment: environment.clone(),
            });
        };

        match self.clusters.find_cluster(&name).await? {
            Some(cluster) if cluster.active => Ok(cluster.into()),
            _ => {
                error!(cluster = %name, "Required cluster for deployment not found");
                Err(CoreError::ClusterNotFound { cluster: name })
            }
        }
    }

    async fn load_project(&self, project: &ProjectName) -> CoreResult<ProjectRecord> {
        self.projects
            .find_project(project)
            .await?
            .ok_or_else(|| CoreError::ProjectNotFound {
                project: project.clone(),
            })
    }
}
