//! The static-pod rollout engine: per-node revision state, the
//! one-at-a-time rollout plan, installer pod construction and retained
//! revision accounting.

mod controller;
mod installer_pod;
mod nodes;
mod prune;
mod rollout;

pub use controller::*;
pub use installer_pod::*;
pub use nodes::*;
pub use prune::*;
pub use rollout::*;
