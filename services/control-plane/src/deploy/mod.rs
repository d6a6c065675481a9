//! Deployment orchestration.
//!
//! The orchestrator consumes the allocator and the ordering validator to
//! decide which cluster a deploy targets and whether it is allowed, then
//! delegates the infrastructure work to a [`Deployer`].

mod deployer;
pub mod mock;
mod orchestrator;

pub use deployer::{
    ClusterRef, DeployTarget, Deployer, DeployerError, DeploymentOutput, ServiceEndpoint,
};
pub use mock::{DeployerCall, MockDeployer};
pub use orchestrator::{DeployOutcome, DeployRequest, DeploymentOrchestrator, UndeployRequest};
