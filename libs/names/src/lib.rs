//! # xpr-names
//!
//! Validated resource names for the Xpresso control plane.
//!
//! ## Design Principles
//!
//! - Names are user-controlled labels and the primary key of every resource
//!   (projects, clusters, deployment environments)
//! - Every name has a single canonical string form with strict parsing
//! - Names are typed so a cluster name can never be passed where an
//!   environment is expected
//!
//! ## Name Format
//!
//! A name is 1 to 63 ASCII characters drawn from `[A-Za-z0-9._-]`, starting
//! with an alphanumeric character. Names are case-sensitive: `DEV` and `dev`
//! are different environments.
//!
//! Examples:
//! - `ProjectName`: `fraud-detection`
//! - `ClusterName`: `k8s-east-1`
//! - `EnvironmentName`: `DEV`, `QA`, `PROD`

mod error;
mod macros;
mod types;

pub use error::NameError;
pub use macros::validate_name;
pub use types::*;

/// Maximum length of any resource name.
pub const MAX_NAME_LEN: usize = 63;
