//! Error taxonomy surfaced to callers of the allocation core.
//!
//! Every [`CoreError`] maps to a stable [`ErrorKind`] and a numeric code from
//! the controller's error code table. Network-facing callers render errors
//! as an [`ErrorEnvelope`]:
//!
//! ```json
//! { "outcome": "failure", "error_code": 253, "results": { "message": "..." } }
//! ```

use serde::{Deserialize, Serialize};
use xpr_names::{ClusterName, EnvironmentName, NameError, ProjectName};

use crate::deploy::DeployerError;
use crate::store::StoreError;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Stable, machine-readable error identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidEnvironment,
    NoClustersAvailable,
    ClusterNotFound,
    ClusterAlreadyExists,
    TargetEnvironmentNotSpecified,
    LowerEnvironmentNotDeployed,
    HigherEnvironmentStillDeployed,
    NotCurrentlyDeployed,
    ProjectNotFound,
    ProjectCurrentlyDeployed,
    DeploymentFailed,
    UndeploymentFailed,
    StateSyncFailed,
    InvalidName,
    Store,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidEnvironment => "invalid_environment",
            ErrorKind::NoClustersAvailable => "no_clusters_available",
            ErrorKind::ClusterNotFound => "cluster_not_found",
            ErrorKind::ClusterAlreadyExists => "cluster_already_exists",
            ErrorKind::TargetEnvironmentNotSpecified => "target_environment_not_specified",
            ErrorKind::LowerEnvironmentNotDeployed => "lower_environment_not_deployed",
            ErrorKind::HigherEnvironmentStillDeployed => "higher_environment_still_deployed",
            ErrorKind::NotCurrentlyDeployed => "not_currently_deployed",
            ErrorKind::ProjectNotFound => "project_not_found",
            ErrorKind::ProjectCurrentlyDeployed => "project_currently_deployed",
            ErrorKind::DeploymentFailed => "deployment_failed",
            ErrorKind::UndeploymentFailed => "undeployment_failed",
            ErrorKind::StateSyncFailed => "state_sync_failed",
            ErrorKind::InvalidName => "invalid_name",
            ErrorKind::Store => "store",
        }
    }

    /// Numeric code used in the response envelope.
    pub fn code(&self) -> u16 {
        match self {
            ErrorKind::ClusterNotFound => 121,
            ErrorKind::ClusterAlreadyExists => 122,
            ErrorKind::ProjectNotFound => 152,
            ErrorKind::DeploymentFailed => 155,
            ErrorKind::UndeploymentFailed => 156,
            ErrorKind::NotCurrentlyDeployed => 162,
            ErrorKind::ProjectCurrentlyDeployed => 177,
            ErrorKind::InvalidName => 203,
            ErrorKind::StateSyncFailed | ErrorKind::Store => 222,
            ErrorKind::InvalidEnvironment | ErrorKind::TargetEnvironmentNotSpecified => 251,
            ErrorKind::NoClustersAvailable => 252,
            ErrorKind::LowerEnvironmentNotDeployed
            | ErrorKind::HigherEnvironmentStillDeployed => 253,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which half of a deploy/undeploy the state sync was recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Deployed,
    Undeployed,
}

impl std::fmt::Display for SyncAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncAction::Deployed => f.write_str("deployed to"),
            SyncAction::Undeployed => f.write_str("undeployed from"),
        }
    }
}

/// Errors raised by the allocator, the ordering validator and the
/// deployment orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("environment '{environment}' is not a configured environment")]
    UnknownEnvironment { environment: EnvironmentName },

    #[error("environment '{environment}' is not allocated to project '{project}'")]
    EnvironmentNotAllocated {
        project: ProjectName,
        environment: EnvironmentName,
    },

    #[error("no active clusters are available for allocation")]
    NoClustersAvailable,

    #[error("cluster '{cluster}' does not exist or is inactive")]
    ClusterNotFound { cluster: ClusterName },

    #[error("no cluster is assigned to environment '{environment}' of project '{project}'")]
    NoClusterAssigned {
        project: ProjectName,
        environment: EnvironmentName,
    },

    #[error("cluster '{cluster}' already exists")]
    ClusterAlreadyExists { cluster: ClusterName },

    #[error("target environment not specified")]
    TargetEnvironmentNotSpecified,

    #[error("project '{project}' must be deployed to '{missing}' before '{target}'")]
    LowerEnvironmentNotDeployed {
        project: ProjectName,
        target: EnvironmentName,
        missing: EnvironmentName,
    },

    #[error("project '{project}' is still deployed to '{higher}'; undeploy it before '{target}'")]
    HigherEnvironmentStillDeployed {
        project: ProjectName,
        target: EnvironmentName,
        higher: EnvironmentName,
    },

    #[error("project '{project}' is not currently deployed to '{environment}'")]
    NotCurrentlyDeployed {
        project: ProjectName,
        environment: EnvironmentName,
    },

    #[error("project '{project}' not found")]
    ProjectNotFound { project: ProjectName },

    #[error("project '{project}' is currently deployed; undeploy it first")]
    ProjectCurrentlyDeployed { project: ProjectName },

    #[error("deployment of project '{project}' to '{environment}' failed")]
    DeploymentFailed {
        project: ProjectName,
        environment: EnvironmentName,
        #[source]
        source: DeployerError,
    },

    #[error("undeployment of project '{project}' from '{environment}' failed")]
    UndeploymentFailed {
        project: ProjectName,
        environment: EnvironmentName,
        #[source]
        source: DeployerError,
    },

    /// The infrastructure change succeeded but recording it did not. The
    /// state commit can be retried on its own.
    #[error("project '{project}' was {action} '{environment}' but the deployment state could not be saved")]
    StateSyncFailed {
        project: ProjectName,
        environment: EnvironmentName,
        action: SyncAction,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    InvalidName(#[from] NameError),

    #[error("persistence operation failed")]
    Store(#[from] StoreError),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::UnknownEnvironment { .. } | CoreError::EnvironmentNotAllocated { .. } => {
                ErrorKind::InvalidEnvironment
            }
            CoreError::NoClustersAvailable => ErrorKind::NoClustersAvailable,
            CoreError::ClusterNotFound { .. } | CoreError::NoClusterAssigned { .. } => {
                ErrorKind::ClusterNotFound
            }
            CoreError::ClusterAlreadyExists { .. } => ErrorKind::ClusterAlreadyExists,
            CoreError::TargetEnvironmentNotSpecified => ErrorKind::TargetEnvironmentNotSpecified,
            CoreError::LowerEnvironmentNotDeployed { .. } => {
                ErrorKind::LowerEnvironmentNotDeployed
            }
            CoreError::HigherEnvironmentStillDeployed { .. } => {
                ErrorKind::HigherEnvironmentStillDeployed
            }
            CoreError::NotCurrentlyDeployed { .. } => ErrorKind::NotCurrentlyDeployed,
            CoreError::ProjectNotFound { .. } => ErrorKind::ProjectNotFound,
            CoreError::ProjectCurrentlyDeployed { .. } => ErrorKind::ProjectCurrentlyDeployed,
            CoreError::DeploymentFailed { .. } => ErrorKind::DeploymentFailed,
            CoreError::UndeploymentFailed { .. } => ErrorKind::UndeploymentFailed,
            CoreError::StateSyncFailed { .. } => ErrorKind::StateSyncFailed,
            CoreError::InvalidName(_) => ErrorKind::InvalidName,
            CoreError::Store(_) => ErrorKind::Store,
        }
    }

    pub fn code(&self) -> u16 {
        self.kind().code()
    }

    /// Convert into the response envelope.
    pub fn to_envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope::failure(self.code(), self.to_string())
    }
}

/// Response envelope used by the controller's HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub outcome: String,
    pub error_code: u16,
    pub results: EnvelopeResults,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeResults {
    pub message: String,
}

impl ErrorEnvelope {
    pub fn failure(error_code: u16, message: impl Into<String>) -> Self {
        Self {
            outcome: "failure".to_string(),
            error_code,
            results: EnvelopeResults {
                message: message.into(),
            },
        }
    }
}

impl From<&CoreError> for ErrorEnvelope {
    fn from(err: &CoreError) -> Self {
        err.to_envelope()
    }
}
