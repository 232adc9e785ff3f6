use super::{
    InstallerOutcome, InstallerPodParams, apply_installer_outcome, installer_pod_name,
    outcome_from_pod, plan_rollout, render_installer_pod, revisions_to_keep, sort_nodes,
};
use crate::clients::PodClient;
use crate::factory::{ReconcileSync, SyncContext};
use crate::installer::ResourceSource;
use crate::status::StatusClient;
use crate::util::{Error, aggregate};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::jiff::Timestamp;
use kube::{
    Api, Client, ResourceExt,
    api::{DeleteParams, ListParams},
};
use std::sync::Arc;

/// Deletes materialized revisions that fell out of the retention window.
/// Revisions are snapshots owned by the revision controller; the rollout
/// engine only prunes them.
#[async_trait]
pub trait RevisionPruner: Send + Sync {
    async fn list_revisions(&self) -> Result<Vec<i64>, Error>;
    async fn delete_revision(&self, revision: i64) -> Result<(), Error>;
}

/// Pruner over the `<manifest>-pod-<N>` configmaps holding revision
/// snapshots.
pub struct KubeRevisionPruner {
    client: Client,
    namespace: String,
    pod_manifest_name: String,
}

impl KubeRevisionPruner {
    pub fn new(client: Client, namespace: &str, pod_manifest_name: &str) -> Self {
        KubeRevisionPruner {
            client,
            namespace: namespace.to_string(),
            pod_manifest_name: pod_manifest_name.to_string(),
        }
    }

    fn api(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn revision_name(&self, revision: i64) -> String {
        format!("{}-pod-{}", self.pod_manifest_name, revision)
    }
}

#[async_trait]
impl RevisionPruner for KubeRevisionPruner {
    async fn list_revisions(&self) -> Result<Vec<i64>, Error> {
        let prefix = format!("{}-pod-", self.pod_manifest_name);
        let list = self.api().list(&ListParams::default()).await?;
        Ok(list
            .items
            .iter()
            .filter_map(|cm| cm.name_any().strip_prefix(&prefix)?.parse().ok())
            .collect())
    }

    async fn delete_revision(&self, revision: i64) -> Result<(), Error> {
        match self
            .api()
            .delete(&self.revision_name(revision), &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

pub struct StaticPodControllerConfig {
    /// Name of the operator instance whose status this controller owns.
    pub instance: String,
    /// Namespace installer pods and revision snapshots live in.
    pub namespace: String,
    /// Base name of the managed static pod, e.g. `girder-control`.
    pub pod_manifest_name: String,
    pub installer_image: String,
    pub pull_policy: String,
    pub resource_dir: String,
    pub pod_manifest_dir: String,
    /// Revision payload; the first configmap carries the pod manifest.
    pub configmaps: Vec<ResourceSource>,
    pub secrets: Vec<ResourceSource>,
}

impl StaticPodControllerConfig {
    pub fn new(
        instance: &str,
        namespace: &str,
        pod_manifest_name: &str,
        installer_image: &str,
    ) -> Self {
        StaticPodControllerConfig {
            instance: instance.to_string(),
            namespace: namespace.to_string(),
            pod_manifest_name: pod_manifest_name.to_string(),
            installer_image: installer_image.to_string(),
            pull_policy: "IfNotPresent".to_string(),
            resource_dir: "/etc/kubernetes/static-pod-resources".to_string(),
            pod_manifest_dir: "/etc/kubernetes/manifests".to_string(),
            configmaps: Vec::new(),
            secrets: Vec::new(),
        }
    }
}

/// Drives every master node to `latestAvailableRevision`, one installer pod
/// at a time, and prunes revisions outside the retention window.
pub struct StaticPodController {
    config: StaticPodControllerConfig,
    status: Arc<dyn StatusClient>,
    pods: Arc<dyn PodClient>,
    pruner: Arc<dyn RevisionPruner>,
}

impl StaticPodController {
    pub fn new(
        config: StaticPodControllerConfig,
        status: Arc<dyn StatusClient>,
        pods: Arc<dyn PodClient>,
        pruner: Arc<dyn RevisionPruner>,
    ) -> Self {
        StaticPodController {
            config,
            status,
            pods,
            pruner,
        }
    }

    /// Observes the in-flight installer pod of every installing node and
    /// folds its terminal phase into the node bookkeeping.
    async fn observe_installers(
        &self,
        nodes: &mut [girder_types::NodeStatus],
        ctx: &SyncContext,
    ) -> Result<bool, Error> {
        let mut changed = false;
        for node in nodes.iter_mut() {
            if node.target_revision == 0 || node.target_revision == node.current_revision {
                continue;
            }
            let target = node.target_revision;
            let prior = node.current_revision;
            let pod_name = installer_pod_name(target, &node.node_name);
            let pod = self.pods.get_pod(&self.config.namespace, &pod_name).await?;
            let outcome = outcome_from_pod(pod.as_ref());
            if apply_installer_outcome(node, &outcome, Timestamp::now()) {
                changed = true;
                match outcome {
                    InstallerOutcome::Succeeded => ctx.recorder.eventf(
                        "NodeCurrentRevisionChanged",
                        format!(
                            "Updated node \"{}\" from revision {} to {}",
                            node.node_name, prior, target
                        ),
                    ),
                    InstallerOutcome::Failed { .. } | InstallerOutcome::NotFound => {
                        ctx.recorder.warningf(
                            "InstallerPodFailed",
                            format!(
                                "Installer pod for revision {} on node \"{}\" failed: {}",
                                target,
                                node.node_name,
                                node.errors.join("; ")
                            ),
                        )
                    }
                    InstallerOutcome::Pending => {}
                }
            }
        }
        Ok(changed)
    }

    async fn launch_installer(
        &self,
        node_name: &str,
        revision: i64,
        ctx: &SyncContext,
    ) -> Result<(), Error> {
        let pod_name = installer_pod_name(revision, node_name);
        // An already-running installer (e.g. from an interrupted sync) wins;
        // the next pass observes it instead of launching a duplicate.
        if self
            .pods
            .get_pod(&self.config.namespace, &pod_name)
            .await?
            .is_none()
        {
            let pod = render_installer_pod(&InstallerPodParams {
                revision,
                namespace: &self.config.namespace,
                node_name,
                image: &self.config.installer_image,
                pull_policy: &self.config.pull_policy,
                pod_manifest_name: &self.config.pod_manifest_name,
                resource_dir: &self.config.resource_dir,
                pod_manifest_dir: &self.config.pod_manifest_dir,
                configmaps: &self.config.configmaps,
                secrets: &self.config.secrets,
            })?;
            self.pods.create_pod(&self.config.namespace, &pod).await?;
        }
        ctx.recorder.eventf(
            "NodeTargetRevisionChanged",
            format!("Triggering installer pod for revision {revision} on node \"{node_name}\""),
        );
        Ok(())
    }

    async fn prune_revisions(&self, status: &girder_types::OperatorStatus) -> Vec<Error> {
        let spec = match self.status.get_spec(&self.config.instance).await {
            Ok(spec) => spec,
            Err(e) => return vec![e],
        };
        let Some(keep) = revisions_to_keep(
            status,
            spec.failed_revision_limit,
            spec.succeeded_revision_limit,
        ) else {
            return Vec::new();
        };

        let mut errors = Vec::new();
        match self.pruner.list_revisions().await {
            Ok(revisions) => {
                for revision in revisions {
                    if revision < status.latest_available_revision && !keep.contains(&revision) {
                        if let Err(e) = self.pruner.delete_revision(revision).await {
                            errors.push(e);
                        }
                    }
                }
            }
            Err(e) => errors.push(e),
        }
        errors
    }
}

#[async_trait]
impl ReconcileSync for StaticPodController {
    async fn sync(&self, ctx: &SyncContext) -> Result<(), Error> {
        let mut status = self.status.get_status(&self.config.instance).await?;
        sort_nodes(&mut status.node_statuses);

        let mut changed = self.observe_installers(&mut status.node_statuses, ctx).await?;

        if let Some((index, revision)) = plan_rollout(
            &status.node_statuses,
            status.latest_available_revision,
        ) {
            let node_name = status.node_statuses[index].node_name.clone();
            self.launch_installer(&node_name, revision, ctx).await?;
            status.node_statuses[index].target_revision = revision;
            changed = true;
        }

        if changed {
            self.status
                .apply_status(&self.config.instance, status.clone())
                .await?;
        }

        let errors = self.prune_revisions(&status).await;
        match aggregate(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
