pub mod shutdown;

/// Well-known annotation keys shared between the controllers and the on-node
/// agent.
pub mod annotations {
    /// Revision label stamped into every materialized static-pod manifest.
    pub const REVISION: &str = "girder.io/revision";

    /// Present on a master node while it reboots into a new revision; the node
    /// tracker suppresses degraded reporting for annotated nodes during the
    /// inertia window.
    pub const REBOOTING: &str = "girder.io/rebooting";

    /// Stamped on a fallback manifest by the startup monitor.
    pub const FALLBACK_FOR_REVISION: &str = "girder.io/fallback-for-revision";
    pub const FALLBACK_REASON: &str = "girder.io/fallback-reason";
    pub const FALLBACK_MESSAGE: &str = "girder.io/fallback-message";
}

pub fn init() {
    let disable_colors = ["1", "true"].contains(
        &std::env::var("DISABLE_COLORS")
            .unwrap_or_else(|_| String::new())
            .to_lowercase()
            .as_str(),
    );
    owo_colors::set_override(!disable_colors);
}
