use clap::{Parser, Subcommand};
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Materialize one revision on this node
    Installer(InstallerArgs),
    /// Watch the freshly installed revision and fall back if it won't start
    StartupMonitor(MonitorArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct InstallerArgs {
    /// Revision to materialize
    #[arg(long, env = "REVISION")]
    pub revision: i64,

    /// Namespace holding the revision's configmaps and secrets
    #[arg(long, env = "NAMESPACE")]
    pub namespace: String,

    /// Base name of the managed static pod
    #[arg(long, env = "POD_MANIFEST_NAME")]
    pub pod: String,

    #[arg(
        long,
        env = "RESOURCE_DIR",
        default_value = "/etc/kubernetes/static-pod-resources"
    )]
    pub resource_dir: String,

    #[arg(
        long,
        env = "POD_MANIFEST_DIR",
        default_value = "/etc/kubernetes/manifests"
    )]
    pub pod_manifest_dir: String,

    /// Required configmaps; the first one carries the pod manifest
    #[arg(long = "configmap")]
    pub configmaps: Vec<String>,

    #[arg(long = "optional-configmap")]
    pub optional_configmaps: Vec<String>,

    #[arg(long = "secret")]
    pub secrets: Vec<String>,

    #[arg(long = "optional-secret")]
    pub optional_secrets: Vec<String>,

    /// Outer deadline for all resource fetches (e.g. "120s")
    #[arg(long, env = "FETCH_TIMEOUT", default_value = "120s", value_parser = parse_duration_arg)]
    pub fetch_timeout: Duration,
}

#[derive(Parser, Debug, Clone)]
pub struct MonitorArgs {
    /// Base name of the managed static pod
    #[arg(long, env = "POD_MANIFEST_NAME")]
    pub pod: String,

    #[arg(
        long,
        env = "RESOURCE_DIR",
        default_value = "/etc/kubernetes/static-pod-resources"
    )]
    pub resource_dir: String,

    #[arg(
        long,
        env = "POD_MANIFEST_DIR",
        default_value = "/etc/kubernetes/manifests"
    )]
    pub pod_manifest_dir: String,

    /// How long the revision gets to become healthy before falling back
    #[arg(long, env = "REVISION_DEADLINE", default_value = "5m", value_parser = parse_duration_arg)]
    pub revision_deadline: Duration,

    #[arg(long, env = "PROBE_INTERVAL", default_value = "5s", value_parser = parse_duration_arg)]
    pub probe_interval: Duration,

    /// TCP endpoint that accepts connections once the control plane is up
    #[arg(long, env = "HEALTH_ENDPOINT", default_value = "127.0.0.1:6443")]
    pub health_endpoint: String,

    /// Consecutive successful probes required for a healthy verdict
    #[arg(long, env = "HEALTHY_THRESHOLD", default_value_t = 3)]
    pub healthy_threshold: u32,
}

fn parse_duration_arg(value: &str) -> Result<Duration, String> {
    parse_duration::parse(value).map_err(|e| e.to_string())
}
