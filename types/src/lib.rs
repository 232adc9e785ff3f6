use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::jiff::Timestamp;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Condition type suffixes written by the core controllers. The operator
/// instance supplies the prefix, e.g. `MyDriverDeploymentAvailable`.
pub mod condition_types {
    pub const DEPLOYMENT_AVAILABLE: &str = "DeploymentAvailable";
    pub const DEPLOYMENT_PROGRESSING: &str = "DeploymentProgressing";
    pub const DEPLOYMENT_DEGRADED: &str = "DeploymentDegraded";
    pub const WORKLOAD_DEGRADED: &str = "WorkloadDegraded";

    /// Unprefixed; owned by the node tracker.
    pub const NODE_CONTROLLER_DEGRADED: &str = "NodeControllerDegraded";
}

/// Reason strings are part of the API contract; tests depend on them.
pub mod reasons {
    pub const AS_EXPECTED: &str = "AsExpected";
    pub const NO_DEPLOYMENT: &str = "NoDeployment";
    pub const NO_POD: &str = "NoPod";
    pub const NEW_GENERATION: &str = "NewGeneration";
    pub const PODS_UPDATING: &str = "PodsUpdating";
    pub const UNAVAILABLE_POD: &str = "UnavailablePod";
    pub const SYNC_ERROR: &str = "SyncError";
    pub const PRECONDITION_NOT_FULFILLED: &str = "PreconditionNotFulfilled";
    pub const MASTER_NODES_READY: &str = "MasterNodesReady";
    pub const MASTER_NODE_NOT_REMOVED: &str = "MasterNodeNotRemoved";

    /// Event reason, emitted when the node tracker's degraded message changes.
    pub const MASTER_NODES_READY_CHANGED: &str = "MasterNodesReadyChanged";
}

fn default_revision_limit() -> i64 {
    5
}

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "operator.girder.io",
    version = "v1",
    kind = "StaticPodOperator",
    plural = "staticpodoperators",
    derive = "PartialEq",
    status = "OperatorStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.latestAvailableRevision\", \"name\": \"REVISION\", \"type\": \"integer\" }"
)]
#[serde(rename_all = "camelCase")]
pub struct StaticPodOperatorSpec {
    /// How many failed revisions to keep on disk per node. `-1` disables pruning.
    #[serde(default = "default_revision_limit")]
    pub failed_revision_limit: i64,

    /// How many succeeded revisions to keep on disk per node. `-1` disables pruning.
    #[serde(default = "default_revision_limit")]
    pub succeeded_revision_limit: i64,

    #[serde(default)]
    pub log_level: u8,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperatorStatus {
    /// The generation of the operator resource most recently acted upon.
    #[serde(default)]
    pub observed_generation: i64,

    /// Condition types are unique within the sequence.
    #[serde(default)]
    pub conditions: Vec<OperatorCondition>,

    /// Last generation applied per managed resource; `(group, resource,
    /// namespace, name)` is unique within the sequence.
    #[serde(default)]
    pub generations: Vec<GenerationStatus>,

    /// Highest revision that has been materialized as a configuration
    /// snapshot. Monotonically non-decreasing.
    #[serde(default)]
    pub latest_available_revision: i64,

    /// Per-master-node revision bookkeeping; `nodeName` is unique.
    #[serde(default)]
    pub node_statuses: Vec<NodeStatus>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperatorCondition {
    #[serde(rename = "type")]
    pub type_: String,

    pub status: ConditionStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl ConditionStatus {
    pub fn is_true(self) -> bool {
        self == ConditionStatus::True
    }
}

impl FromStr for ConditionStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "True" => Ok(ConditionStatus::True),
            "False" => Ok(ConditionStatus::False),
            "Unknown" => Ok(ConditionStatus::Unknown),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionStatus::True => write!(f, "True"),
            ConditionStatus::False => write!(f, "False"),
            ConditionStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerationStatus {
    pub group: String,
    pub resource: String,
    pub namespace: String,
    pub name: String,
    pub last_generation: i64,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub node_name: String,

    /// Revision currently running on the node. Never exceeds
    /// `latestAvailableRevision`.
    #[serde(default)]
    pub current_revision: i64,

    /// Revision an installer pod is driving the node toward; `0` when idle.
    #[serde(default)]
    pub target_revision: i64,

    /// Most recent revision that failed to install on this node; `0` when the
    /// last installation succeeded.
    #[serde(default)]
    pub last_failed_revision: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failed_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failed_time: Option<Time>,

    #[serde(default)]
    pub errors: Vec<String>,
}

impl OperatorCondition {
    pub fn new(type_: impl Into<String>, status: ConditionStatus, reason: &str) -> Self {
        OperatorCondition {
            type_: type_.into(),
            status,
            reason: Some(reason.to_string()),
            message: None,
            last_transition_time: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

pub fn find_condition<'a>(
    conditions: &'a [OperatorCondition],
    type_: &str,
) -> Option<&'a OperatorCondition> {
    conditions.iter().find(|c| c.type_ == type_)
}

pub fn is_condition_true(conditions: &[OperatorCondition], type_: &str) -> bool {
    find_condition(conditions, type_).is_some_and(|c| c.status.is_true())
}

/// Upserts a condition. The transition time is only stamped when the status
/// value actually changes, so repeated identical writes do not churn
/// `lastTransitionTime`.
pub fn set_condition(conditions: &mut Vec<OperatorCondition>, mut new: OperatorCondition) {
    match conditions.iter_mut().find(|c| c.type_ == new.type_) {
        Some(existing) => {
            if existing.status == new.status {
                new.last_transition_time = existing.last_transition_time.clone();
            } else if new.last_transition_time.is_none() {
                new.last_transition_time = Some(Time(Timestamp::now()));
            }
            *existing = new;
        }
        None => {
            if new.last_transition_time.is_none() {
                new.last_transition_time = Some(Time(Timestamp::now()));
            }
            conditions.push(new);
        }
    }
}

pub fn find_node_status<'a>(statuses: &'a [NodeStatus], node_name: &str) -> Option<&'a NodeStatus> {
    statuses.iter().find(|s| s.node_name == node_name)
}

/// Upserts the generations entry keyed by `(group, resource, namespace, name)`.
pub fn set_generation(generations: &mut Vec<GenerationStatus>, new: GenerationStatus) {
    match generations.iter_mut().find(|g| {
        g.group == new.group
            && g.resource == new.resource
            && g.namespace == new.namespace
            && g.name == new.name
    }) {
        Some(existing) => *existing = new,
        None => generations.push(new),
    }
}

/// Returns the last generation recorded for the given resource, or `-1` when
/// the resource has never been applied.
pub fn expected_generation(
    generations: &[GenerationStatus],
    group: &str,
    resource: &str,
    namespace: &str,
    name: &str,
) -> i64 {
    generations
        .iter()
        .find(|g| {
            g.group == group && g.resource == resource && g.namespace == namespace && g.name == name
        })
        .map(|g| g.last_generation)
        .unwrap_or(-1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cond(type_: &str, status: ConditionStatus) -> OperatorCondition {
        OperatorCondition::new(type_, status, reasons::AS_EXPECTED)
    }

    #[test]
    fn set_condition_stamps_transition_time_on_first_write() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, cond("FooAvailable", ConditionStatus::True));
        assert_eq!(conditions.len(), 1);
        assert!(conditions[0].last_transition_time.is_some());
    }

    #[test]
    fn set_condition_preserves_transition_time_when_status_unchanged() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, cond("FooAvailable", ConditionStatus::True));
        let stamped = conditions[0].last_transition_time.clone();

        set_condition(
            &mut conditions,
            cond("FooAvailable", ConditionStatus::True).with_message("still fine"),
        );
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, stamped);
        assert_eq!(conditions[0].message.as_deref(), Some("still fine"));
    }

    #[test]
    fn set_condition_restamps_on_status_flip() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, cond("FooAvailable", ConditionStatus::True));
        conditions[0].last_transition_time = None; // sentinel for "old"

        set_condition(&mut conditions, cond("FooAvailable", ConditionStatus::False));
        assert_eq!(conditions[0].status, ConditionStatus::False);
        assert!(conditions[0].last_transition_time.is_some());
    }

    #[test]
    fn generation_bookkeeping_round_trips() {
        let mut generations = Vec::new();
        set_generation(
            &mut generations,
            GenerationStatus {
                group: "apps".into(),
                resource: "deployments".into(),
                namespace: "girder".into(),
                name: "driver".into(),
                last_generation: 3,
            },
        );
        assert_eq!(
            expected_generation(&generations, "apps", "deployments", "girder", "driver"),
            3
        );
        assert_eq!(
            expected_generation(&generations, "apps", "daemonsets", "girder", "driver"),
            -1
        );

        set_generation(
            &mut generations,
            GenerationStatus {
                group: "apps".into(),
                resource: "deployments".into(),
                namespace: "girder".into(),
                name: "driver".into(),
                last_generation: 4,
            },
        );
        assert_eq!(generations.len(), 1);
        assert_eq!(generations[0].last_generation, 4);
    }

    #[test]
    fn condition_status_parses_and_formats() {
        assert_eq!(ConditionStatus::from_str("True"), Ok(ConditionStatus::True));
        assert_eq!(ConditionStatus::from_str("bogus"), Err(()));
        assert_eq!(ConditionStatus::False.to_string(), "False");
    }
}
