use lazy_static::lazy_static;
use prometheus::{
    HistogramVec, IntCounterVec, register_histogram_vec, register_int_counter_vec,
};

lazy_static! {
    static ref RECONCILE_TOTAL: IntCounterVec = register_int_counter_vec!(
        "girder_reconcile_total",
        "Number of reconcile invocations per controller.",
        &["controller"]
    )
    .expect("register girder_reconcile_total");
    static ref RECONCILE_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "girder_reconcile_errors_total",
        "Number of reconcile invocations that returned an error.",
        &["controller"]
    )
    .expect("register girder_reconcile_errors_total");
    static ref SYNC_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "girder_sync_duration_seconds",
        "Wall-clock duration of a single sync call.",
        &["controller"]
    )
    .expect("register girder_sync_duration_seconds");
}

/// Per-controller handle into the process-wide registry. Cheap to clone; the
/// underlying collectors are registered once.
#[derive(Clone)]
pub struct ControllerMetrics {
    controller: String,
}

impl ControllerMetrics {
    pub fn new(controller: &str) -> Self {
        ControllerMetrics {
            controller: controller.to_string(),
        }
    }

    pub fn observe_sync(&self, duration: std::time::Duration, failed: bool) {
        RECONCILE_TOTAL
            .with_label_values(&[&self.controller])
            .inc();
        if failed {
            RECONCILE_ERRORS_TOTAL
                .with_label_values(&[&self.controller])
                .inc();
        }
        SYNC_DURATION_SECONDS
            .with_label_values(&[&self.controller])
            .observe(duration.as_secs_f64());
    }
}
