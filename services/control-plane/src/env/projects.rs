//! Project-level environment management.
//!
//! Keeps a project's recorded `environments` in step with its allocation
//! rows when environments are added, removed, or the project is torn down.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, instrument};
use xpr_names::{EnvironmentName, ProjectName};

use super::allocator::EnvAllocator;
use crate::error::{CoreError, CoreResult};
use crate::store::{EnvironmentAllocation, ProjectPatch, ProjectRecord, ProjectRegistry};

pub struct ProjectEnvironments {
    allocator: Arc<EnvAllocator>,
    projects: Arc<dyn ProjectRegistry>,
    // Serializes read-modify-write of a project's recorded environments.
    record_lock: Mutex<()>,
}

impl ProjectEnvironments {
    pub fn new(allocator: Arc<EnvAllocator>, projects: Arc<dyn ProjectRegistry>) -> Self {
        Self {
            allocator,
            projects,
            record_lock: Mutex::new(()),
        }
    }

    /// Allocate `environments` to an existing project and record them on the
    /// project. Returns the allocations created.
    #[instrument(skip(self, project, environments), fields(project = %project))]
    pub async fn assign_environments(
        &self,
        project: &ProjectName,
        environments: &[EnvironmentName],
    ) -> CoreResult<Vec<EnvironmentAllocation>> {
        let _guard = self.record_lock.lock().await;
        let record = self.load(project).await?;
        let created = self.allocator.allocate(project, environments).await?;

        let mut recorded = record.environments.clone();
        recorded.extend(environments.iter().cloned());
        if recorded != record.environments {
            let patch = ProjectPatch {
                environments: Some(recorded),
                ..ProjectPatch::default()
            };
            self.projects.update_project(project, &patch).await?;
        }

        info!(created = created.len(), "Assigned project environments");
        Ok(created)
    }

    /// Drop one environment from a project.
    ///
    /// # Errors
    ///
    /// [`CoreError::ProjectCurrentlyDeployed`] if the project is still
    /// deployed to that environment.
    #[instrument(skip(self, project), fields(project = %project))]
    pub async fn remove_environment(
        &self,
        project: &ProjectName,
        environment: &EnvironmentName,
    ) -> CoreResult<()> {
        let _guard = self.record_lock.lock().await;
        let record = self.load(project).await?;
        if record.deployed_environments.contains(environment) {
            return Err(CoreError::ProjectCurrentlyDeployed {
                project: project.clone(),
            });
        }

        self.allocator.deallocate(project, Some(environment)).await?;

        if record.environments.contains(environment) {
            let mut recorded = record.environments;
            recorded.remove(environment);
            let patch = ProjectPatch {
                environments: Some(recorded),
                ..ProjectPatch::default()
            };
            self.projects.update_project(project, &patch).await?;
        }
        Ok(())
    }

    /// Tear down a project: remove every allocation, clear its environments
    /// and mark it inactive. Returns the number of allocations removed.
    ///
    /// # Errors
    ///
    /// [`CoreError::ProjectCurrentlyDeployed`] if the project is deployed
    /// anywhere.
    #[instrument(skip(self, project), fields(project = %project))]
    pub async fn release_project(&self, project: &ProjectName) -> CoreResult<u64> {
        let _guard = self.record_lock.lock().await;
        let record = self.load(project).await?;
        if record.currently_deployed || !record.deployed_environments.is_empty() {
            return Err(CoreError::ProjectCurrentlyDeployed {
                project: project.clone(),
            });
        }

        let removed = self.allocator.deallocate(project, None).await?;
        let patch = ProjectPatch {
            environments: Some(Default::default()),
            active: Some(false),
            ..ProjectPatch::default()
        };
        self.projects.update_project(project, &patch).await?;

        info!(removed, "Released project environments");
        Ok(removed)
    }

    async fn load(&self, project: &ProjectName) -> CoreResult<ProjectRecord> {
        self.projects
            .find_project(project)
            .await?
            .ok_or_else(|| CoreError::ProjectNotFound {
                project: project.clone(),
            })
    }
}
