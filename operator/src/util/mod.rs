use std::time::Duration;

#[cfg(feature = "metrics")]
pub mod metrics;

pub(crate) mod colors;

mod error;

pub use error::*;

/// The default interval between full resyncs of a controller.
pub(crate) const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(600);

/// Name of the kubernetes resource manager.
pub(crate) const MANAGER_NAME: &str = "girder-operator";
