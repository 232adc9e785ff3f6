use super::pod_status_phrases;
use girder_types::{
    ConditionStatus, OperatorCondition, condition_types, find_condition, reasons,
};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::jiff::Timestamp;
use std::time::Duration;

/// How long an in-flight rollout may keep pods unavailable before the
/// workload is reported Degraded. Matches the Deployment progress-deadline
/// convention.
pub const DEFAULT_PROGRESS_DEADLINE: Duration = Duration::from_secs(300);

/// Digest of the live workload, extracted once per reconcile so the
/// condition derivation stays a pure function.
#[derive(Debug, Clone, Default)]
pub struct WorkloadSummary {
    pub name: String,
    pub namespace: String,
    pub desired_replicas: i32,
    pub available_replicas: i32,
    pub updated_replicas: i32,
    pub generation: i64,
    pub observed_generation: i64,
    /// True when the deployment reports `Progressing=True` with reason
    /// `NewReplicaSetAvailable`, i.e. the rollout has fully progressed.
    pub rollout_complete: bool,
    /// Label selector in `k=v,k=v` form, for listing the workload's pods.
    pub selector: String,
}

impl WorkloadSummary {
    pub fn from_deployment(deployment: &Deployment) -> Self {
        let status = deployment.status.as_ref();
        let rollout_complete = status
            .and_then(|s| s.conditions.as_ref())
            .and_then(|cs| cs.iter().find(|c| c.type_ == "Progressing"))
            .is_some_and(|c| {
                c.status == "True" && c.reason.as_deref() == Some("NewReplicaSetAvailable")
            });
        let selector = deployment
            .spec
            .as_ref()
            .and_then(|s| s.selector.match_labels.as_ref())
            .map(|labels| {
                labels
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .unwrap_or_default();
        WorkloadSummary {
            name: deployment.metadata.name.clone().unwrap_or_default(),
            namespace: deployment.metadata.namespace.clone().unwrap_or_default(),
            desired_replicas: deployment
                .spec
                .as_ref()
                .and_then(|s| s.replicas)
                .unwrap_or(1),
            available_replicas: status.and_then(|s| s.available_replicas).unwrap_or(0),
            updated_replicas: status.and_then(|s| s.updated_replicas).unwrap_or(0),
            generation: deployment.metadata.generation.unwrap_or(0),
            observed_generation: status.and_then(|s| s.observed_generation).unwrap_or(0),
            rollout_complete,
            selector,
        }
    }

    pub fn at_highest_generation(&self) -> bool {
        self.observed_generation == self.generation
    }
}

pub struct ConditionInputs<'a> {
    pub condition_prefix: &'a str,
    pub target_namespace: &'a str,
    pub workload: Option<&'a WorkloadSummary>,
    /// Conditions from the previous status; consulted for the age of the
    /// Progressing transition.
    pub previous_conditions: &'a [OperatorCondition],
    pub pods: &'a [Pod],
    pub preconditions_fulfilled: bool,
    pub sync_error_messages: &'a [String],
    pub progress_deadline: Duration,
    pub now: Timestamp,
}

/// Derives exactly the four conditions of the workload contract, in a fixed
/// order, each with a defined reason.
pub fn derive_conditions(inputs: &ConditionInputs<'_>) -> Vec<OperatorCondition> {
    let available_type = format!(
        "{}{}",
        inputs.condition_prefix,
        condition_types::DEPLOYMENT_AVAILABLE
    );
    let progressing_type = format!(
        "{}{}",
        inputs.condition_prefix,
        condition_types::DEPLOYMENT_PROGRESSING
    );
    let degraded_type = format!(
        "{}{}",
        inputs.condition_prefix,
        condition_types::DEPLOYMENT_DEGRADED
    );
    let workload_degraded_type = format!(
        "{}{}",
        inputs.condition_prefix,
        condition_types::WORKLOAD_DEGRADED
    );

    let available = available_condition(inputs, &available_type);
    let progressing = progressing_condition(inputs, &progressing_type);
    let degraded = degraded_condition(inputs, &degraded_type, &progressing_type, &progressing);
    let workload_degraded = workload_degraded_condition(inputs, &workload_degraded_type);

    vec![available, progressing, degraded, workload_degraded]
}

fn missing_message(namespace: &str) -> String {
    format!("deployment/{namespace}: could not be retrieved")
}

fn available_condition(inputs: &ConditionInputs<'_>, type_: &str) -> OperatorCondition {
    if !inputs.preconditions_fulfilled {
        return OperatorCondition::new(
            type_,
            ConditionStatus::False,
            reasons::PRECONDITION_NOT_FULFILLED,
        )
        .with_message("the operator preconditions are not fulfilled");
    }
    match inputs.workload {
        None => OperatorCondition::new(type_, ConditionStatus::False, reasons::NO_DEPLOYMENT)
            .with_message(missing_message(inputs.target_namespace)),
        Some(w) if w.available_replicas == 0 => {
            OperatorCondition::new(type_, ConditionStatus::False, reasons::NO_POD).with_message(
                format!("deployment/{}.{}: no pods are available", w.name, w.namespace),
            )
        }
        Some(_) => OperatorCondition::new(type_, ConditionStatus::True, reasons::AS_EXPECTED),
    }
}

fn progressing_condition(inputs: &ConditionInputs<'_>, type_: &str) -> OperatorCondition {
    if !inputs.preconditions_fulfilled {
        return OperatorCondition::new(
            type_,
            ConditionStatus::False,
            reasons::PRECONDITION_NOT_FULFILLED,
        )
        .with_message("the operator preconditions are not fulfilled");
    }
    let Some(w) = inputs.workload else {
        return OperatorCondition::new(type_, ConditionStatus::True, reasons::NO_DEPLOYMENT)
            .with_message(missing_message(inputs.target_namespace));
    };
    if w.observed_generation < w.generation {
        return OperatorCondition::new(type_, ConditionStatus::True, reasons::NEW_GENERATION)
            .with_message(format!(
                "deployment/{}.{}: observed generation is {}, desired generation is {}",
                w.name, w.namespace, w.observed_generation, w.generation
            ));
    }
    let replicas_lagging =
        w.updated_replicas < w.desired_replicas || w.available_replicas < w.desired_replicas;
    if !w.rollout_complete && replicas_lagging {
        return OperatorCondition::new(type_, ConditionStatus::True, reasons::PODS_UPDATING)
            .with_message(format!(
                "deployment/{}.{}: {}/{} pods have been updated to the latest generation and {}/{} pods are available",
                w.name,
                w.namespace,
                w.updated_replicas,
                w.desired_replicas,
                w.available_replicas,
                w.desired_replicas
            ));
    }
    OperatorCondition::new(type_, ConditionStatus::False, reasons::AS_EXPECTED)
}

fn degraded_condition(
    inputs: &ConditionInputs<'_>,
    type_: &str,
    progressing_type: &str,
    progressing: &OperatorCondition,
) -> OperatorCondition {
    if !inputs.preconditions_fulfilled {
        return OperatorCondition::new(
            type_,
            ConditionStatus::True,
            reasons::PRECONDITION_NOT_FULFILLED,
        )
        .with_message("the operator preconditions are not fulfilled");
    }
    let Some(w) = inputs.workload else {
        return OperatorCondition::new(type_, ConditionStatus::True, reasons::NO_DEPLOYMENT)
            .with_message(missing_message(inputs.target_namespace));
    };
    if w.available_replicas >= w.desired_replicas {
        return OperatorCondition::new(type_, ConditionStatus::False, reasons::AS_EXPECTED);
    }

    // A rollout that started recently gets a grace period; one that has been
    // "progressing" past the deadline does not.
    let mid_roll = progressing.status.is_true();
    let too_long = progressing_too_long(
        inputs.previous_conditions,
        progressing_type,
        inputs.now,
        inputs.progress_deadline,
    );
    if mid_roll && !too_long {
        return OperatorCondition::new(type_, ConditionStatus::False, reasons::AS_EXPECTED);
    }

    let mut message = format!(
        "deployment/{}.{}: {}/{} pods are available",
        w.name, w.namespace, w.available_replicas, w.desired_replicas
    );
    let phrases = pod_status_phrases(inputs.pods);
    if !phrases.is_empty() {
        message = format!("{message}: {}", phrases.join(", "));
    }
    OperatorCondition::new(type_, ConditionStatus::True, reasons::UNAVAILABLE_POD)
        .with_message(message)
}

fn workload_degraded_condition(inputs: &ConditionInputs<'_>, type_: &str) -> OperatorCondition {
    if !inputs.preconditions_fulfilled {
        return OperatorCondition::new(
            type_,
            ConditionStatus::True,
            reasons::PRECONDITION_NOT_FULFILLED,
        )
        .with_message("the operator preconditions are not fulfilled");
    }
    if !inputs.sync_error_messages.is_empty() {
        return OperatorCondition::new(type_, ConditionStatus::True, reasons::SYNC_ERROR)
            .with_message(inputs.sync_error_messages.join("\n"));
    }
    match inputs.workload {
        None => OperatorCondition::new(type_, ConditionStatus::True, reasons::NO_DEPLOYMENT)
            .with_message(missing_message(inputs.target_namespace)),
        Some(_) => OperatorCondition::new(type_, ConditionStatus::False, reasons::AS_EXPECTED),
    }
}

fn progressing_too_long(
    previous: &[OperatorCondition],
    progressing_type: &str,
    now: Timestamp,
    deadline: Duration,
) -> bool {
    find_condition(previous, progressing_type)
        .filter(|c| c.status.is_true())
        .and_then(|c| c.last_transition_time.as_ref())
        .is_some_and(|t| now.duration_since(t.0).as_secs() >= deadline.as_secs() as i64)
}
