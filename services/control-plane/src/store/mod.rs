//! Persistence seams for the allocation core.
//!
//! The allocator, validator and orchestrator only talk to storage through
//! the traits in this module:
//! - [`ClusterRegistry`]: which clusters exist and whether they are active
//! - [`AllocationStore`]: the (project, environment, cluster) table
//! - [`ProjectRegistry`]: per-project deployment state
//!
//! Two backends ship with the crate: [`memory::MemoryStore`] for tests and
//! embedding, and the Postgres stores in [`crate::db`].

pub mod memory;
mod types;

use async_trait::async_trait;
use xpr_names::{ClusterName, ProjectName};

use crate::db::DbError;

pub use memory::MemoryStore;
pub use types::{
    AllocationFilter, Cluster, EnvironmentAllocation, ProjectPatch, ProjectRecord,
};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by store backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("{kind} '{key}' already exists")]
    Conflict { kind: &'static str, key: String },

    /// The record to update does not exist.
    #[error("{kind} '{key}' not found")]
    NotFound { kind: &'static str, key: String },

    /// A stored row could not be decoded.
    #[error("invalid stored record: {0}")]
    InvalidRecord(String),

    /// The backend is unavailable or refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Db(#[from] DbError),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Registry of clusters.
#[async_trait]
pub trait ClusterRegistry: Send + Sync {
    /// All clusters currently accepting allocations.
    async fn find_active_clusters(&self) -> StoreResult<Vec<Cluster>>;

    async fn find_cluster(&self, name: &ClusterName) -> StoreResult<Option<Cluster>>;

    async fn list_clusters(&self) -> StoreResult<Vec<Cluster>>;

    /// Insert a new cluster. Fails with [`StoreError::Conflict`] if the name
    /// is taken.
    async fn insert_cluster(&self, cluster: &Cluster) -> StoreResult<()>;

    /// Flip the activation flag. Returns false if no such cluster exists.
    async fn set_cluster_active(&self, name: &ClusterName, active: bool) -> StoreResult<bool>;
}

/// A held cross-process lock on the allocation table.
///
/// Dropping a lease without calling [`AllocationLease::release`] still frees
/// the lock, but later.
#[async_trait]
pub trait AllocationLease: Send {
    async fn release(self: Box<Self>) -> StoreResult<()>;
}

/// The environment allocation table.
///
/// Implementations must reject a second row for the same
/// (project, environment) pair with [`StoreError::Conflict`].
#[async_trait]
pub trait AllocationStore: Send + Sync {
    /// Serialize read-count-then-insert passes across processes sharing this
    /// table. Backends used by a single process return `None`.
    async fn lease(&self) -> StoreResult<Option<Box<dyn AllocationLease>>> {
        Ok(None)
    }

    async fn insert(&self, allocation: &EnvironmentAllocation) -> StoreResult<()>;

    async fn find(&self, filter: &AllocationFilter) -> StoreResult<Vec<EnvironmentAllocation>>;

    /// Delete matching rows and return how many were removed.
    async fn delete(&self, filter: &AllocationFilter) -> StoreResult<u64>;
}

/// Registry of projects and their deployment state.
#[async_trait]
pub trait ProjectRegistry: Send + Sync {
    async fn find_project(&self, name: &ProjectName) -> StoreResult<Option<ProjectRecord>>;

    async fn list_projects(&self) -> StoreResult<Vec<ProjectRecord>>;

    async fn insert_project(&self, project: &ProjectRecord) -> StoreResult<()>;

    /// Apply a patch. Fails with [`StoreError::NotFound`] if the project does
    /// not exist.
    async fn update_project(&self, name: &ProjectName, patch: &ProjectPatch) -> StoreResult<()>;
}
