//! Environment allocation and deployment ordering.
//!
//! - [`EnvAllocator`] binds (project, environment) pairs to the least loaded
//!   active cluster and repairs bindings when a cluster is deactivated
//! - [`OrderValidator`] enforces that environments are deployed in the
//!   configured order
//! - [`ProjectEnvironments`] keeps a project's recorded environments in step
//!   with its allocations

mod allocator;
mod order;
mod projects;
mod validator;

pub use allocator::{EnvAllocator, RepairOutcome, RepairReport, RepairResult};
pub use order::{EnvironmentOrder, OrderError, OrderingPolicy};
pub use projects::ProjectEnvironments;
pub use validator::OrderValidator;
