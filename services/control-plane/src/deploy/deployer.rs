//! Infrastructure collaborator interface.
//!
//! The orchestrator decides *where* and *whether* to deploy; a [`Deployer`]
//! does the actual Kubernetes/Kubeflow work on the chosen cluster.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use xpr_names::{ClusterName, EnvironmentName, ProjectName};

use crate::store::Cluster;

/// The cluster a deployment is sent to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRef {
    pub name: ClusterName,
    pub master_node_address: Option<String>,
}

impl From<Cluster> for ClusterRef {
    fn from(cluster: Cluster) -> Self {
        Self {
            name: cluster.name,
            master_node_address: cluster.master_node_address,
        }
    }
}

/// Everything a deployer needs for one deploy or undeploy call.
#[derive(Debug, Clone, PartialEq)]
pub struct DeployTarget {
    pub project: ProjectName,
    pub environment: EnvironmentName,
    pub cluster: ClusterRef,
    /// Per-component deployment settings, passed through untouched.
    pub components: BTreeMap<String, serde_json::Value>,
    /// Per-pipeline deployment settings, passed through untouched.
    pub pipelines: BTreeMap<String, serde_json::Value>,
}

/// An address exposed by a deployed component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub component: String,
    pub address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentOutput {
    pub endpoints: Vec<ServiceEndpoint>,
}

/// Errors reported by the infrastructure collaborator.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DeployerError {
    #[error("cluster '{0}' has no master node address")]
    NoMasterNode(ClusterName),

    #[error("infrastructure rejected the request: {0}")]
    Rejected(String),

    #[error("infrastructure unreachable: {0}")]
    Unreachable(String),
}

/// Performs deployments on a cluster.
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(&self, target: &DeployTarget) -> Result<DeploymentOutput, DeployerError>;

    async fn undeploy(&self, target: &DeployTarget) -> Result<(), DeployerError>;
}
