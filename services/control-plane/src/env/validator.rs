//! Deployment ordering rule.
//!
//! A project may be deployed to an environment only after it has been
//! deployed to every lower environment it holds. Undeploy only requires the
//! target to be deployed, unless [`OrderingPolicy::enforce_undeploy_order`]
//! is set.

use std::collections::BTreeSet;

use tracing::debug;
use xpr_names::{EnvironmentName, ProjectName};

use super::order::{EnvironmentOrder, OrderingPolicy};
use crate::error::{CoreError, CoreResult};

/// Checks deploy and undeploy targets against the environment order.
#[derive(Debug, Clone)]
pub struct OrderValidator {
    order: EnvironmentOrder,
    policy: OrderingPolicy,
}

impl OrderValidator {
    pub fn new(order: EnvironmentOrder, policy: OrderingPolicy) -> Self {
        Self { order, policy }
    }

    pub fn order(&self) -> &EnvironmentOrder {
        &self.order
    }

    pub fn policy(&self) -> OrderingPolicy {
        self.policy
    }

    /// Check that `project` may be deployed to `target`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::TargetEnvironmentNotSpecified`] if `target` is `None`
    /// - [`CoreError::EnvironmentNotAllocated`] if `target` is not in `allocated`
    /// - [`CoreError::LowerEnvironmentNotDeployed`] naming the first lower
    ///   allocated environment missing from `deployed`
    pub fn validate_deploy_target(
        &self,
        project: &ProjectName,
        target: Option<&EnvironmentName>,
        allocated: &BTreeSet<EnvironmentName>,
        deployed: &BTreeSet<EnvironmentName>,
    ) -> CoreResult<()> {
        let target = target.ok_or(CoreError::TargetEnvironmentNotSpecified)?;

        if !allocated.contains(target) {
            return Err(CoreError::EnvironmentNotAllocated {
                project: project.clone(),
                environment: target.clone(),
            });
        }

        for env in self.order.lower_than(target.as_str()) {
            if allocated.contains(env) && !deployed.contains(env) {
                return Err(CoreError::LowerEnvironmentNotDeployed {
                    project: project.clone(),
                    target: target.clone(),
                    missing: env.clone(),
                });
            }
        }

        debug!(project = %project, target = %target, "Deploy target validated");
        Ok(())
    }

    /// Check that `project` may be undeployed from `target`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::TargetEnvironmentNotSpecified`] if `target` is `None`
    /// - [`CoreError::NotCurrentlyDeployed`] if `target` is not in `deployed`
    /// - [`CoreError::HigherEnvironmentStillDeployed`] when undeploy ordering
    ///   is enforced and a higher environment is still deployed
    pub fn validate_undeploy_target(
        &self,
        project: &ProjectName,
        target: Option<&EnvironmentName>,
        deployed: &BTreeSet<EnvironmentName>,
    ) -> CoreResult<()> {
        let target = target.ok_or(CoreError::TargetEnvironmentNotSpecified)?;

        if !deployed.contains(target) {
            return Err(CoreError::NotCurrentlyDeployed {
                project: project.clone(),
                environment: target.clone(),
            });
        }

        if self.policy.enforce_undeploy_order {
            if let Some(higher) = self
                .order
                .higher_than(target.as_str())
                .iter()
                .find(|env| deployed.contains(*env))
            {
                return Err(CoreError::HigherEnvironmentStillDeployed {
                    project: project.clone(),
                    target: target.clone(),
                    higher: higher.clone(),
                });
            }
        }

        debug!(project = %project, target = %target, "Undeploy target validated");
        Ok(())
    }
}
