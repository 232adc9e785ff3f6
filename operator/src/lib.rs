//! Girder operator core: a controller factory, a workload reconciler, the
//! static-pod rollout engine with its on-node installer and startup-monitor
//! fallback, a test-guarded JSON-patch layer, a master-node tracker and a
//! stale-condition cleaner.
//!
//! Everything talks to the cluster through the injected clients in
//! [`clients`] and [`status`]; controllers hold no mutable state of their own
//! between reconciles.

pub mod clients;
pub mod factory;
pub mod installer;
pub mod nodes;
pub mod patch;
pub mod stale_conditions;
pub mod startup_monitor;
pub mod staticpod;
pub mod status;
pub mod util;
pub mod workload;
