//! Allocation reconciliation.
//!
//! The reconciler is responsible for:
//! - Finding environments recorded on active projects that have no
//!   allocation row (for example after a cluster repair found no active
//!   cluster)
//! - Allocating them once clusters are available again
//! - Moving rows still bound to an inactive cluster whose repair did not
//!   finish

mod reconciler;
mod worker;

pub use reconciler::{AllocationReconciler, ReconcileStats};
pub use worker::ReconcilerWorker;
