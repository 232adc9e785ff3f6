//! On-node revision materialization: fetches the revision's configmaps and
//! secrets, lays them out under the static-pod resource directory and
//! atomically publishes the pod manifest for the kubelet.

mod fsio;
mod run;

pub use fsio::*;
pub use run::*;

/// A configmap or secret the revision references. The distinction between
/// required and optional is semantic: a missing required source aborts the
/// installation, a missing optional one is silently skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSource {
    pub name: String,
    pub optional: bool,
}

impl ResourceSource {
    pub fn required(name: &str) -> Self {
        ResourceSource {
            name: name.to_string(),
            optional: false,
        }
    }

    pub fn optional(name: &str) -> Self {
        ResourceSource {
            name: name.to_string(),
            optional: true,
        }
    }
}
