//! Records held by the cluster registry, allocation table and project
//! registry.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use xpr_names::{ClusterName, EnvironmentName, ProjectName};

/// A Kubernetes-capable compute pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub name: ClusterName,
    /// Only active clusters receive new environment allocations.
    pub active: bool,
    pub master_node_address: Option<String>,
    #[serde(default)]
    pub worker_node_addresses: BTreeSet<String>,
}

impl Cluster {
    /// A new active cluster with no nodes assigned.
    pub fn new(name: ClusterName) -> Self {
        Self {
            name,
            active: true,
            master_node_address: None,
            worker_node_addresses: BTreeSet::new(),
        }
    }

    pub fn with_master(mut self, address: impl Into<String>) -> Self {
        self.master_node_address = Some(address.into());
        self
    }

    pub fn with_worker(mut self, address: impl Into<String>) -> Self {
        self.worker_node_addresses.insert(address.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// Binding of one project's environment to a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EnvironmentAllocation {
    pub project: ProjectName,
    pub environment: EnvironmentName,
    pub cluster: ClusterName,
}

impl EnvironmentAllocation {
    pub fn new(project: ProjectName, environment: EnvironmentName, cluster: ClusterName) -> Self {
        Self {
            project,
            environment,
            cluster,
        }
    }
}

/// Deployment-related state of a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub name: ProjectName,
    /// Environments allocated to the project.
    #[serde(default)]
    pub environments: BTreeSet<EnvironmentName>,
    /// Environments the project is deployed to; a subset of `environments`.
    #[serde(default)]
    pub deployed_environments: BTreeSet<EnvironmentName>,
    /// True iff `deployed_environments` is non-empty.
    #[serde(default)]
    pub currently_deployed: bool,
    pub active: bool,
}

impl ProjectRecord {
    /// A new active project with no environments.
    pub fn new(name: ProjectName) -> Self {
        Self {
            name,
            environments: BTreeSet::new(),
            deployed_environments: BTreeSet::new(),
            currently_deployed: false,
            active: true,
        }
    }

    pub fn with_environments<I>(mut self, environments: I) -> Self
    where
        I: IntoIterator<Item = EnvironmentName>,
    {
        self.environments.extend(environments);
        self
    }

    pub fn with_deployed<I>(mut self, environments: I) -> Self
    where
        I: IntoIterator<Item = EnvironmentName>,
    {
        self.deployed_environments.extend(environments);
        self.currently_deployed = !self.deployed_environments.is_empty();
        self
    }
}

/// Partial update of a [`ProjectRecord`]. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectPatch {
    pub environments: Option<BTreeSet<EnvironmentName>>,
    pub deployed_environments: Option<BTreeSet<EnvironmentName>>,
    pub currently_deployed: Option<bool>,
    pub active: Option<bool>,
}

impl ProjectPatch {
    pub fn is_empty(&self) -> bool {
        self.environments.is_none()
            && self.deployed_environments.is_none()
            && self.currently_deployed.is_none()
            && self.active.is_none()
    }

    /// Apply the patch to a record in place.
    pub fn apply(&self, record: &mut ProjectRecord) {
        if let Some(environments) = &self.environments {
            record.environments = environments.clone();
        }
        if let Some(deployed) = &self.deployed_environments {
            record.deployed_environments = deployed.clone();
        }
        if let Some(currently_deployed) = self.currently_deployed {
            record.currently_deployed = currently_deployed;
        }
        if let Some(active) = self.active {
            record.active = active;
        }
    }
}

/// Row selector for the allocation table. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocationFilter {
    pub project: Option<ProjectName>,
    pub environment: Option<EnvironmentName>,
    pub cluster: Option<ClusterName>,
}

impl AllocationFilter {
    /// Matches every row.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn project(project: &ProjectName) -> Self {
        Self {
            project: Some(project.clone()),
            ..Self::default()
        }
    }

    pub fn cluster(cluster: &ClusterName) -> Self {
        Self {
            cluster: Some(cluster.clone()),
            ..Self::default()
        }
    }

    pub fn with_environment(mut self, environment: &EnvironmentName) -> Self {
        self.environment = Some(environment.clone());
        self
    }

    pub fn matches(&self, allocation: &EnvironmentAllocation) -> bool {
        self.project.as_ref().is_none_or(|p| *p == allocation.project)
            && self
                .environment
                .as_ref()
                .is_none_or(|e| *e == allocation.environment)
            && self.cluster.as_ref().is_none_or(|c| *c == allocation.cluster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alloc(project: &str, env: &str, cluster: &str) -> EnvironmentAllocation {
        EnvironmentAllocation::new(
            project.parse().unwrap(),
            env.parse().unwrap(),
            cluster.parse().unwrap(),
        )
    }

    #[test]
    fn test_filter_matches() {
        let row = alloc("p1", "DEV", "a");
        assert!(AllocationFilter::all().matches(&row));
        assert!(AllocationFilter::project(&"p1".parse().unwrap()).matches(&row));
        assert!(!AllocationFilter::project(&"p2".parse().unwrap()).matches(&row));
        assert!(AllocationFilter::project(&"p1".parse().unwrap())
            .with_environment(&"DEV".parse().unwrap())
            .matches(&row));
        assert!(!AllocationFilter::project(&"p1".parse().unwrap())
            .with_environment(&"QA".parse().unwrap())
            .matches(&row));
        assert!(!AllocationFilter::cluster(&"b".parse().unwrap()).matches(&row));
    }

    #[test]
    fn test_patch_apply() {
        let mut record = ProjectRecord::new("p1".parse().unwrap());
        let patch = ProjectPatch {
            deployed_environments: Some(["DEV".parse().unwrap()].into()),
            currently_deployed: Some(true),
            ..ProjectPatch::default()
        };
        assert!(!patch.is_empty());
        patch.apply(&mut record);
        assert!(record.currently_deployed);
        assert!(record.deployed_environments.contains("DEV"));
        assert!(record.environments.is_empty());
        assert!(record.active);
    }

    #[test]
    fn test_project_record_json_defaults() {
        let record: ProjectRecord =
            serde_json::from_str(r#"{"name":"p1","active":true}"#).unwrap();
        assert!(record.environments.is_empty());
        assert!(!record.currently_deployed);
    }
}
