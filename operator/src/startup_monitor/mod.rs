//! On-node watchdog that runs after an installer lands a new revision. A
//! healthy verdict marks the revision last-known-good; anything else rolls
//! the live manifest back to the newest revision below the current one.

use crate::installer::{MODE_DEFAULT, atomic_symlink, atomic_write};
use crate::util::Error;
use async_trait::async_trait;
use girder_common::annotations;
use k8s_openapi::api::core::v1::Pod;
use owo_colors::OwoColorize;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// The health contract is the embedder's business; the monitor only
/// consumes verdicts. `Err` carries a human-readable cause for the
/// fallback annotations.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self) -> Result<(), String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The revision came up; last-known-good now points at it.
    Healthy { revision: i64 },
    /// The revision did not come up; the live manifest was replaced.
    FellBack { from: i64, to: i64 },
}

pub struct StartupMonitorOptions {
    pub pod_manifest_name: String,
    pub resource_dir: PathBuf,
    pub pod_manifest_dir: PathBuf,
    /// How long the revision gets to become healthy before falling back.
    pub revision_deadline: Duration,
    pub probe_interval: Duration,
}

impl StartupMonitorOptions {
    pub fn new(pod_manifest_name: &str) -> Self {
        StartupMonitorOptions {
            pod_manifest_name: pod_manifest_name.to_string(),
            resource_dir: PathBuf::from("/etc/kubernetes/static-pod-resources"),
            pod_manifest_dir: PathBuf::from("/etc/kubernetes/manifests"),
            revision_deadline: Duration::from_secs(300),
            probe_interval: Duration::from_secs(5),
        }
    }
}

pub struct StartupMonitor {
    options: StartupMonitorOptions,
    probe: Arc<dyn HealthProbe>,
}

impl StartupMonitor {
    pub fn new(options: StartupMonitorOptions, probe: Arc<dyn HealthProbe>) -> Self {
        StartupMonitor { options, probe }
    }

    fn live_manifest_path(&self) -> PathBuf {
        self.options
            .pod_manifest_dir
            .join(format!("{}.yaml", self.options.pod_manifest_name))
    }

    fn last_known_good_path(&self) -> PathBuf {
        self.options
            .resource_dir
            .join(format!("{}-last-known-good", self.options.pod_manifest_name))
    }

    fn revision_manifest_path(&self, revision: i64) -> PathBuf {
        self.options
            .resource_dir
            .join(format!("{}-pod-{}", self.options.pod_manifest_name, revision))
            .join(format!("{}-pod.yaml", self.options.pod_manifest_name))
    }

    pub async fn run(&self) -> Result<Verdict, Error> {
        let manifest = fs::read_to_string(self.live_manifest_path())?;
        let revision = revision_of_manifest(&manifest)?;
        println!(
            "👀 {}{}",
            "Watching startup of revision ".green(),
            revision.to_string().green().dimmed()
        );

        let deadline = Instant::now() + self.options.revision_deadline;
        let mut last_cause = "health checks never returned a verdict".to_string();
        loop {
            match self.probe.check().await {
                Ok(()) => {
                    atomic_symlink(
                        &self.revision_manifest_path(revision),
                        &self.last_known_good_path(),
                    )?;
                    println!(
                        "✅ {}{}",
                        "Revision healthy, marked last-known-good: ".green(),
                        revision.to_string().green().dimmed()
                    );
                    return Ok(Verdict::Healthy { revision });
                }
                Err(cause) => last_cause = cause,
            }
            if Instant::now() + self.options.probe_interval >= deadline {
                break;
            }
            tokio::time::sleep(self.options.probe_interval).await;
        }

        eprintln!(
            "{}",
            format!("Revision {revision} failed to start: {last_cause}").red()
        );
        self.fall_back(revision, "StartupFailed", &last_cause)
    }

    /// Rewrites the live manifest from the last-known-good revision. A valid
    /// existing symlink is used directly; otherwise the newest sibling
    /// revision strictly below the current one becomes last-known-good.
    /// Revision 0 is never crossed.
    fn fall_back(&self, revision: i64, reason: &str, message: &str) -> Result<Verdict, Error> {
        let link = self.last_known_good_path();
        let target = match fs::read_link(&link) {
            Ok(target) if target.exists() => target,
            _ => {
                let Some(previous) = self.previous_revision(revision)? else {
                    return Err(Error::NodeState(format!(
                        "no revision below {revision} is available to fall back to"
                    )));
                };
                let target = self.revision_manifest_path(previous);
                atomic_symlink(&target, &link)?;
                target
            }
        };

        let fallback_manifest = fs::read_to_string(&target)?;
        let to = revision_of_manifest(&fallback_manifest)?;
        let mut pod: Pod = serde_yaml::from_str(&fallback_manifest)?;
        let pod_annotations = pod.metadata.annotations.get_or_insert_with(Default::default);
        pod_annotations.insert(
            annotations::FALLBACK_FOR_REVISION.to_string(),
            revision.to_string(),
        );
        pod_annotations.insert(annotations::FALLBACK_REASON.to_string(), reason.to_string());
        pod_annotations.insert(
            annotations::FALLBACK_MESSAGE.to_string(),
            message.to_string(),
        );
        atomic_write(
            &self.live_manifest_path(),
            serde_yaml::to_string(&pod)?.as_bytes(),
            MODE_DEFAULT,
        )?;
        eprintln!(
            "{}",
            format!("Fell back from revision {revision} to revision {to}").red()
        );
        Ok(Verdict::FellBack { from: revision, to })
    }

    /// Newest revision strictly below `current`, found by listing the
    /// sibling `<manifest>-pod-<N>` directories.
    fn previous_revision(&self, current: i64) -> Result<Option<i64>, Error> {
        let prefix = format!("{}-pod-", self.options.pod_manifest_name);
        let mut best: Option<i64> = None;
        for entry in fs::read_dir(&self.options.resource_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(revision) = name.strip_prefix(&prefix).and_then(|s| s.parse::<i64>().ok())
            else {
                continue;
            };
            if revision >= 1 && revision < current && best.is_none_or(|b| revision > b) {
                best = Some(revision);
            }
        }
        Ok(best)
    }
}

fn revision_of_manifest(manifest: &str) -> Result<i64, Error> {
    let pod: Pod = serde_yaml::from_str(manifest)?;
    pod.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(annotations::REVISION))
        .and_then(|value| value.parse().ok())
        .ok_or_else(|| {
            Error::UserInput(format!(
                "static pod manifest carries no '{}' label",
                annotations::REVISION
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex;

    struct ScriptedProbe {
        verdicts: Mutex<Vec<Result<(), String>>>,
    }

    impl ScriptedProbe {
        fn healthy() -> Arc<Self> {
            Arc::new(ScriptedProbe {
                verdicts: Mutex::new(vec![Ok(())]),
            })
        }

        fn failing(cause: &str) -> Arc<Self> {
            Arc::new(ScriptedProbe {
                verdicts: Mutex::new(vec![Err(cause.to_string())]),
            })
        }
    }

    #[async_trait]
    impl HealthProbe for ScriptedProbe {
        async fn check(&self) -> Result<(), String> {
            let mut verdicts = self.verdicts.lock().unwrap();
            if verdicts.len() > 1 {
                verdicts.remove(0)
            } else {
                verdicts[0].clone()
            }
        }
    }

    fn manifest(revision: i64) -> String {
        format!(
            concat!(
                "apiVersion: v1\n",
                "kind: Pod\n",
                "metadata:\n",
                "  name: girder-control\n",
                "  labels:\n",
                "    girder.io/revision: \"{}\"\n",
            ),
            revision
        )
    }

    fn setup(dir: &Path, live_revision: i64, on_disk: &[i64]) -> StartupMonitorOptions {
        let mut options = StartupMonitorOptions::new("girder-control");
        options.resource_dir = dir.join("static-pod-resources");
        options.pod_manifest_dir = dir.join("manifests");
        options.revision_deadline = Duration::from_millis(40);
        options.probe_interval = Duration::from_millis(10);

        for revision in on_disk {
            let rev_dir = options
                .resource_dir
                .join(format!("girder-control-pod-{revision}"));
            fs::create_dir_all(&rev_dir).unwrap();
            fs::write(
                rev_dir.join("girder-control-pod.yaml"),
                manifest(*revision),
            )
            .unwrap();
        }
        fs::create_dir_all(&options.pod_manifest_dir).unwrap();
        fs::write(
            options.pod_manifest_dir.join("girder-control.yaml"),
            manifest(live_revision),
        )
        .unwrap();
        options
    }

    #[tokio::test]
    async fn healthy_revision_becomes_last_known_good() {
        let dir = tempfile::tempdir().unwrap();
        let options = setup(dir.path(), 3, &[2, 3]);
        let lkg = options
            .resource_dir
            .join("girder-control-last-known-good");
        let monitor = StartupMonitor::new(options, ScriptedProbe::healthy());

        let verdict = monitor.run().await.expect("monitor succeeds");
        assert_eq!(verdict, Verdict::Healthy { revision: 3 });
        let target = fs::read_link(&lkg).expect("symlink exists");
        assert!(target.ends_with("girder-control-pod-3/girder-control-pod.yaml"));
    }

    #[tokio::test]
    async fn failing_revision_falls_back_to_the_previous_one() {
        let dir = tempfile::tempdir().unwrap();
        let options = setup(dir.path(), 3, &[1, 2, 3]);
        let live = options.pod_manifest_dir.join("girder-control.yaml");
        let monitor = StartupMonitor::new(options, ScriptedProbe::failing("apiserver dead"));

        let verdict = monitor.run().await.expect("fallback succeeds");
        assert_eq!(verdict, Verdict::FellBack { from: 3, to: 2 });

        let live_pod: Pod = serde_yaml::from_str(&fs::read_to_string(&live).unwrap()).unwrap();
        let labels = live_pod.metadata.labels.unwrap();
        assert_eq!(labels.get("girder.io/revision").map(String::as_str), Some("2"));
        let pod_annotations = live_pod.metadata.annotations.unwrap();
        assert_eq!(
            pod_annotations
                .get("girder.io/fallback-for-revision")
                .map(String::as_str),
            Some("3")
        );
        assert_eq!(
            pod_annotations
                .get("girder.io/fallback-reason")
                .map(String::as_str),
            Some("StartupFailed")
        );
        assert_eq!(
            pod_annotations
                .get("girder.io/fallback-message")
                .map(String::as_str),
            Some("apiserver dead")
        );
    }

    #[tokio::test]
    async fn existing_last_known_good_wins_over_sibling_scan() {
        let dir = tempfile::tempdir().unwrap();
        let options = setup(dir.path(), 3, &[1, 2, 3]);
        // Pin last-known-good at revision 1 even though 2 is newer.
        let lkg = options
            .resource_dir
            .join("girder-control-last-known-good");
        std::os::unix::fs::symlink(
            options
                .resource_dir
                .join("girder-control-pod-1/girder-control-pod.yaml"),
            &lkg,
        )
        .unwrap();
        let monitor = StartupMonitor::new(options, ScriptedProbe::failing("boom"));

        let verdict = monitor.run().await.expect("fallback succeeds");
        assert_eq!(verdict, Verdict::FellBack { from: 3, to: 1 });
    }

    #[tokio::test]
    async fn no_previous_revision_is_a_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        let options = setup(dir.path(), 1, &[1]);
        let live = options.pod_manifest_dir.join("girder-control.yaml");
        let monitor = StartupMonitor::new(options, ScriptedProbe::failing("boom"));

        let err = monitor.run().await.expect_err("no fallback available");
        assert!(matches!(err, Error::NodeState(_)));
        // The live manifest was not touched.
        let pod: Pod = serde_yaml::from_str(&fs::read_to_string(&live).unwrap()).unwrap();
        assert!(pod.metadata.annotations.is_none());
    }

    #[tokio::test]
    async fn dangling_last_known_good_is_replaced_by_sibling_scan() {
        let dir = tempfile::tempdir().unwrap();
        let options = setup(dir.path(), 3, &[2, 3]);
        let lkg = options
            .resource_dir
            .join("girder-control-last-known-good");
        std::os::unix::fs::symlink(
            options.resource_dir.join("girder-control-pod-9/gone.yaml"),
            &lkg,
        )
        .unwrap();
        let monitor = StartupMonitor::new(options, ScriptedProbe::failing("boom"));

        let verdict = monitor.run().await.expect("fallback succeeds");
        assert_eq!(verdict, Verdict::FellBack { from: 3, to: 2 });
        let target = fs::read_link(&lkg).unwrap();
        assert!(target.ends_with("girder-control-pod-2/girder-control-pod.yaml"));
    }
}
