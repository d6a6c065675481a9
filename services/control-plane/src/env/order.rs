//! The configured total order of deployment environments.

use std::fmt;

use xpr_names::{EnvironmentName, NameError};

/// Errors building an [`EnvironmentOrder`].
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum OrderError {
    #[error("at least one environment must be configured")]
    Empty,

    #[error("environment '{0}' appears more than once")]
    Duplicate(EnvironmentName),

    #[error(transparent)]
    InvalidName(#[from] NameError),
}

/// Ordered list of valid environment names, lowest tier first.
///
/// The position of an environment in this list is what the deployment
/// ordering rule compares: a project may only be deployed to an environment
/// once every lower allocated environment has been deployed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentOrder {
    environments: Vec<EnvironmentName>,
}

impl EnvironmentOrder {
    /// Build an order from names, lowest first.
    pub fn new(environments: Vec<EnvironmentName>) -> Result<Self, OrderError> {
        if environments.is_empty() {
            return Err(OrderError::Empty);
        }
        for (i, env) in environments.iter().enumerate() {
            if environments[..i].contains(env) {
                return Err(OrderError::Duplicate(env.clone()));
            }
        }
        Ok(Self { environments })
    }

    /// Parse a comma-separated list such as `DEV,QA,STAGING,PROD`.
    ///
    /// Surrounding whitespace and empty segments are ignored.
    pub fn parse_list(s: &str) -> Result<Self, OrderError> {
        let environments = s
            .split(',')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(EnvironmentName::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(environments)
    }

    /// Returns true if `env` is one of the configured environments.
    pub fn contains(&self, env: &str) -> bool {
        self.environments.iter().any(|e| e.as_str() == env)
    }

    /// Zero-based rank of `env`, lowest tier first.
    pub fn position(&self, env: &str) -> Option<usize> {
        self.environments.iter().position(|e| e.as_str() == env)
    }

    /// Environments strictly below `env` in the order, lowest first.
    ///
    /// Returns an empty slice when `env` is not configured.
    pub fn lower_than(&self, env: &str) -> &[EnvironmentName] {
        match self.position(env) {
            Some(i) => &self.environments[..i],
            None => &[],
        }
    }

    /// Environments strictly above `env` in the order, lowest first.
    pub fn higher_than(&self, env: &str) -> &[EnvironmentName] {
        match self.position(env) {
            Some(i) => &self.environments[i + 1..],
            None => &[],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &EnvironmentName> {
        self.environments.iter()
    }

    pub fn len(&self) -> usize {
        self.environments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.environments.is_empty()
    }
}

impl Default for EnvironmentOrder {
    fn default() -> Self {
        let environments = ["DEV", "QA", "STAGING", "PROD"]
            .into_iter()
            .filter_map(|s| EnvironmentName::parse(s).ok())
            .collect();
        Self { environments }
    }
}

impl fmt::Display for EnvironmentOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, env) in self.environments.iter().enumerate() {
            if i > 0 {
                f.write_str(" -> ")?;
            }
            f.write_str(env.as_str())?;
        }
        Ok(())
    }
}

/// Policy knobs for the deployment ordering rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderingPolicy {
    /// Refuse to undeploy an environment while a higher one is still
    /// deployed. Off by default.
    pub enforce_undeploy_order: bool,
}
