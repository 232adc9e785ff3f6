use anyhow::Result;
use clap::Parser;
use owo_colors::OwoColorize;
use std::sync::Arc;

mod args;
mod probe;

use args::{Cli, Commands, InstallerArgs, MonitorArgs};
use girder_operator::clients::KubeResourceGetter;
use girder_operator::installer::{Installer, InstallerOptions, ResourceSource};
use girder_operator::startup_monitor::{StartupMonitor, StartupMonitorOptions, Verdict};
use probe::TcpProbe;

#[tokio::main]
async fn main() -> Result<()> {
    girder_common::init();

    let cli = Cli::parse();

    tokio::select! {
        _ = girder_common::shutdown::shutdown_signal() => {
            anyhow::bail!("interrupted before finishing")
        }
        result = async {
            match cli.command {
                Commands::Installer(args) => run_installer(args).await,
                Commands::StartupMonitor(args) => run_startup_monitor(args).await,
            }
        } => result,
    }
}

async fn run_installer(args: InstallerArgs) -> Result<()> {
    let client = kube::Client::try_default().await?;
    let getter = Arc::new(KubeResourceGetter::new(client));

    let mut options = InstallerOptions::new(args.revision, &args.namespace, &args.pod);
    options.resource_dir = args.resource_dir.into();
    options.pod_manifest_dir = args.pod_manifest_dir.into();
    options.fetch_timeout = args.fetch_timeout;
    options.configmaps = args
        .configmaps
        .iter()
        .map(|name| ResourceSource::required(name))
        .chain(
            args.optional_configmaps
                .iter()
                .map(|name| ResourceSource::optional(name)),
        )
        .collect();
    options.secrets = args
        .secrets
        .iter()
        .map(|name| ResourceSource::required(name))
        .chain(
            args.optional_secrets
                .iter()
                .map(|name| ResourceSource::optional(name)),
        )
        .collect();

    Installer::new(options, getter).run().await?;
    Ok(())
}

async fn run_startup_monitor(args: MonitorArgs) -> Result<()> {
    let probe = Arc::new(TcpProbe::new(args.health_endpoint, args.healthy_threshold));

    let mut options = StartupMonitorOptions::new(&args.pod);
    options.resource_dir = args.resource_dir.into();
    options.pod_manifest_dir = args.pod_manifest_dir.into();
    options.revision_deadline = args.revision_deadline;
    options.probe_interval = args.probe_interval;

    match StartupMonitor::new(options, probe).run().await? {
        Verdict::Healthy { revision } => {
            println!(
                "{}{}",
                "🌱 Revision is healthy: ".green(),
                revision.to_string().green().dimmed()
            );
            Ok(())
        }
        Verdict::FellBack { from, to } => {
            anyhow::bail!("revision {from} failed to start; fell back to revision {to}")
        }
    }
}
