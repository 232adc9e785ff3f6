use girder_types::NodeStatus;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::jiff::Timestamp;

/// Per-node rollout state, read off the status fields. The fields are the
/// wire format; this sum type is what the engine reasons about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeState {
    /// Running `current`, nothing in flight, last attempt succeeded.
    Idle { current: i64 },
    /// An installer pod is driving the node from `current` to `target`.
    Installing { current: i64, target: i64 },
    /// Still running `current`; the attempt to reach `failed` did not land.
    Failed { current: i64, failed: i64 },
}

impl NodeState {
    pub fn of(status: &NodeStatus) -> NodeState {
        if status.target_revision != 0 && status.target_revision != status.current_revision {
            NodeState::Installing {
                current: status.current_revision,
                target: status.target_revision,
            }
        } else if status.last_failed_revision != 0 {
            NodeState::Failed {
                current: status.current_revision,
                failed: status.last_failed_revision,
            }
        } else {
            NodeState::Idle {
                current: status.current_revision,
            }
        }
    }

    /// A settled node has no in-flight transition.
    pub fn settled(&self) -> bool {
        !matches!(self, NodeState::Installing { .. })
    }
}

/// Terminal observation of a node's installer pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallerOutcome {
    /// Pod still pending or running; nothing to record yet.
    Pending,
    Succeeded,
    Failed { errors: Vec<String> },
    /// The pod is gone without reporting; treated as a failed attempt.
    NotFound,
}

pub fn installer_pod_name(revision: i64, node_name: &str) -> String {
    format!("installer-{revision}-{node_name}")
}

/// Maps the installer pod's phase to an outcome.
pub fn outcome_from_pod(pod: Option<&Pod>) -> InstallerOutcome {
    let Some(pod) = pod else {
        return InstallerOutcome::NotFound;
    };
    match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
        Some("Succeeded") => InstallerOutcome::Succeeded,
        Some("Failed") => InstallerOutcome::Failed {
            errors: terminated_messages(pod),
        },
        _ => InstallerOutcome::Pending,
    }
}

fn terminated_messages(pod: &Pod) -> Vec<String> {
    let messages: Vec<String> = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| {
            statuses
                .iter()
                .filter_map(|cs| {
                    cs.state
                        .as_ref()
                        .and_then(|s| s.terminated.as_ref())
                        .and_then(|t| t.message.clone())
                })
                .collect()
        })
        .unwrap_or_default();
    if messages.is_empty() {
        vec!["installer pod failed without reporting an error".to_string()]
    } else {
        messages
    }
}

/// Applies one observed installer outcome to the node's bookkeeping.
/// Returns true when anything changed.
pub fn apply_installer_outcome(
    node: &mut NodeStatus,
    outcome: &InstallerOutcome,
    now: Timestamp,
) -> bool {
    match outcome {
        InstallerOutcome::Pending => false,
        InstallerOutcome::Succeeded => {
            node.current_revision = node.target_revision;
            node.target_revision = 0;
            node.last_failed_revision = 0;
            node.last_failed_reason = None;
            node.last_failed_time = None;
            node.errors.clear();
            true
        }
        InstallerOutcome::Failed { errors } => {
            node.last_failed_revision = node.target_revision;
            node.target_revision = 0;
            node.last_failed_reason = Some("InstallerFailed".to_string());
            node.last_failed_time = Some(Time(now));
            node.errors = errors.clone();
            true
        }
        InstallerOutcome::NotFound => {
            let pod_name = installer_pod_name(node.target_revision, &node.node_name);
            node.last_failed_revision = node.target_revision;
            node.target_revision = 0;
            node.last_failed_reason = Some("InstallerPodNotFound".to_string());
            node.last_failed_time = Some(Time(now));
            node.errors = vec![format!("installer pod {pod_name} not found")];
            true
        }
    }
}
