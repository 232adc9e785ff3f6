use super::{ConditionInputs, DEFAULT_PROGRESS_DEADLINE, WorkloadSummary, derive_conditions};
use crate::clients::{PodClient, VersionRecorder};
use crate::factory::{ReconcileSync, SyncContext};
use crate::patch::{JsonPatch, remove_conditions, remove_generation};
use crate::status::StatusClient;
use crate::util::{Error, aggregate};
use async_trait::async_trait;
use girder_types::{
    GenerationStatus, OperatorStatus, condition_types, set_condition, set_generation,
};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::jiff::Timestamp;
use std::sync::Arc;
use std::time::Duration;

/// What the delegate observed about the managed workload this sync.
pub struct DelegateOutcome {
    pub workload: Option<Deployment>,

    /// False while the operator configuration the workload was rendered from
    /// lags behind its latest generation. Delegates with no notion of
    /// generation report true.
    pub operator_config_at_highest_generation: bool,

    /// When set, the workload is gone and its conditions and generations
    /// entry must be retracted; `removed_name`/`removed_namespace` name it.
    pub remove_workload: bool,
    pub removed_name: String,
    pub removed_namespace: String,

    pub errors: Vec<Error>,
}

impl Default for DelegateOutcome {
    fn default() -> Self {
        DelegateOutcome {
            workload: None,
            operator_config_at_highest_generation: true,
            remove_workload: false,
            removed_name: String::new(),
            removed_namespace: String::new(),
            errors: Vec::new(),
        }
    }
}

impl DelegateOutcome {
    pub fn for_workload(workload: Deployment) -> Self {
        DelegateOutcome {
            workload: Some(workload),
            ..Default::default()
        }
    }

    pub fn removal(name: &str, namespace: &str) -> Self {
        DelegateOutcome {
            remove_workload: true,
            removed_name: name.to_string(),
            removed_namespace: namespace.to_string(),
            ..Default::default()
        }
    }
}

/// The thing that knows how to render and apply the workload itself. The
/// reconciler only consumes its observations.
#[async_trait]
pub trait WorkloadDelegate: Send + Sync {
    async fn sync_workload(&self, ctx: &SyncContext) -> DelegateOutcome;

    /// Gate checked before any status is derived. Defaults to fulfilled for
    /// delegates that have no preconditions.
    async fn preconditions_fulfilled(&self) -> Result<bool, Error> {
        Ok(true)
    }
}

pub struct WorkloadControllerConfig {
    /// Name of the operator instance whose status this controller owns.
    pub instance: String,
    pub condition_prefix: String,
    pub target_namespace: String,
    /// Prepended to the workload name when recording operand versions.
    pub operand_name_prefix: String,
    /// Version recorded once the workload has fully converged.
    pub target_version: String,
    pub progress_deadline: Duration,
}

impl WorkloadControllerConfig {
    pub fn new(instance: &str, condition_prefix: &str, target_namespace: &str) -> Self {
        WorkloadControllerConfig {
            instance: instance.to_string(),
            condition_prefix: condition_prefix.to_string(),
            target_namespace: target_namespace.to_string(),
            operand_name_prefix: String::new(),
            target_version: String::new(),
            progress_deadline: DEFAULT_PROGRESS_DEADLINE,
        }
    }
}

pub struct WorkloadController {
    config: WorkloadControllerConfig,
    delegate: Arc<dyn WorkloadDelegate>,
    status: Arc<dyn StatusClient>,
    pods: Arc<dyn PodClient>,
    versions: Arc<dyn VersionRecorder>,
}

impl WorkloadController {
    pub fn new(
        config: WorkloadControllerConfig,
        delegate: Arc<dyn WorkloadDelegate>,
        status: Arc<dyn StatusClient>,
        pods: Arc<dyn PodClient>,
        versions: Arc<dyn VersionRecorder>,
    ) -> Self {
        WorkloadController {
            config,
            delegate,
            status,
            pods,
            versions,
        }
    }

    fn operand_name(&self, workload_name: &str) -> String {
        format!("{}{}", self.config.operand_name_prefix, workload_name)
    }

    fn condition_type_names(&self) -> Vec<String> {
        [
            condition_types::DEPLOYMENT_AVAILABLE,
            condition_types::DEPLOYMENT_PROGRESSING,
            condition_types::DEPLOYMENT_DEGRADED,
            condition_types::WORKLOAD_DEGRADED,
        ]
        .iter()
        .map(|suffix| format!("{}{}", self.config.condition_prefix, suffix))
        .collect()
    }

    /// Retracts the four conditions and the generations entry in a single
    /// guarded patch, then resets the recorded operand version.
    async fn remove_workload(
        &self,
        outcome: &DelegateOutcome,
        mut errors: Vec<Error>,
    ) -> Result<(), Error> {
        if outcome.removed_name.is_empty() || outcome.removed_namespace.is_empty() {
            errors.push(Error::UserInput(
                "delegate signalled workload removal without naming the workload".to_string(),
            ));
            return match aggregate(errors) {
                Some(e) => Err(e),
                None => Ok(()),
            };
        }

        match self.status.get_status(&self.config.instance).await {
            Ok(previous) => {
                let type_names = self.condition_type_names();
                let type_refs: Vec<&str> = type_names.iter().map(String::as_str).collect();
                let patch = remove_conditions(JsonPatch::new(), &previous.conditions, &type_refs);
                let patch = remove_generation(
                    patch,
                    &previous.generations,
                    "apps",
                    "deployments",
                    &outcome.removed_namespace,
                    &outcome.removed_name,
                );
                if let Err(e) = self.status.patch_status(&self.config.instance, &patch).await {
                    errors.push(e);
                }
            }
            Err(e) => errors.push(e),
        }

        self.versions
            .set_version(&self.operand_name(&outcome.removed_name), "");

        match aggregate(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ReconcileSync for WorkloadController {
    async fn sync(&self, ctx: &SyncContext) -> Result<(), Error> {
        let mut errors: Vec<Error> = Vec::new();

        let preconditions_fulfilled = match self.delegate.preconditions_fulfilled().await {
            Ok(fulfilled) => fulfilled,
            Err(e) => {
                errors.push(e);
                false
            }
        };

        let mut outcome = self.delegate.sync_workload(ctx).await;
        errors.extend(std::mem::take(&mut outcome.errors));

        if outcome.remove_workload {
            return self.remove_workload(&outcome, errors).await;
        }

        let previous = match self.status.get_status(&self.config.instance).await {
            Ok(status) => status,
            Err(e) => {
                errors.push(e);
                OperatorStatus::default()
            }
        };

        let summary = outcome.workload.as_ref().map(WorkloadSummary::from_deployment);

        let pods = match &summary {
            Some(s) if !s.selector.is_empty() => {
                match self.pods.list_pods(&s.namespace, &s.selector).await {
                    Ok(pods) => pods,
                    Err(e) => {
                        errors.push(e);
                        Vec::new()
                    }
                }
            }
            _ => Vec::new(),
        };

        let error_messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        let conditions = derive_conditions(&ConditionInputs {
            condition_prefix: &self.config.condition_prefix,
            target_namespace: &self.config.target_namespace,
            workload: summary.as_ref(),
            previous_conditions: &previous.conditions,
            pods: &pods,
            preconditions_fulfilled,
            sync_error_messages: &error_messages,
            progress_deadline: self.config.progress_deadline,
            now: Timestamp::now(),
        });

        let mut next = previous.clone();
        for condition in conditions {
            set_condition(&mut next.conditions, condition);
        }
        if let Some(s) = &summary {
            set_generation(
                &mut next.generations,
                GenerationStatus {
                    group: "apps".to_string(),
                    resource: "deployments".to_string(),
                    namespace: s.namespace.clone(),
                    name: s.name.clone(),
                    last_generation: s.generation,
                },
            );
        }
        if let Err(e) = self.status.apply_status(&self.config.instance, next).await {
            errors.push(e);
        }

        if errors.is_empty()
            && let Some(s) = &summary
            && s.at_highest_generation()
            && s.available_replicas >= s.desired_replicas
            && s.updated_replicas == s.desired_replicas
            && outcome.operator_config_at_highest_generation
        {
            self.versions
                .set_version(&self.operand_name(&s.name), &self.config.target_version);
        }

        match aggregate(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
