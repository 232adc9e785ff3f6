//! The workload reconciler: drives one replicated workload and derives the
//! four operator conditions (Available, Progressing, Degraded,
//! WorkloadDegraded) from live observations.

mod conditions;
mod pods;
mod reconcile;

pub use conditions::*;
pub use pods::*;
pub use reconcile::*;
