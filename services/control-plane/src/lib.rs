//! xpresso control plane library.
//!
//! This crate ships a `control-plane` binary that keeps environment
//! allocations healed, and exposes the allocation core for embedding:
//! - [`env::EnvAllocator`] assigns (project, environment) pairs to clusters
//! - [`deploy::DeploymentOrchestrator`] enforces deployment ordering and
//!   records deployed state
//! - [`clusters::ClusterManager`] registers and deactivates clusters
//!
//! Persistence goes through the traits in [`store`], with in-memory and
//! Postgres backends.

pub mod clusters;
pub mod config;
pub mod db;
pub mod deploy;
pub mod env;
pub mod error;
pub mod reconcile;
pub mod state;
pub mod store;

pub use error::{CoreError, CoreResult, ErrorKind};
