//! Master-node tracker: keeps `nodeStatuses` congruent with the set of
//! master nodes and derives the `NodeControllerDegraded` condition from
//! their readiness.

use crate::clients::NodeLister;
use crate::factory::{ReconcileSync, SyncContext};
use crate::patch::{JsonPatch, remove_node_statuses};
use crate::status::StatusClient;
use crate::util::Error;
use async_trait::async_trait;
use girder_common::annotations;
use girder_types::{
    ConditionStatus, NodeStatus, OperatorCondition, condition_types, find_condition, reasons,
    set_condition,
};
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::jiff::Timestamp;
use kube::ResourceExt;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

pub const MASTER_NODE_LABEL: &str = "node-role.kubernetes.io/master";

/// How long a not-ready master with the rebooting annotation is exempt from
/// degraded reporting.
pub const DEFAULT_REBOOT_INERTIA: Duration = Duration::from_secs(2 * 60 * 60);

pub struct NodeController {
    instance: String,
    nodes: Arc<dyn NodeLister>,
    status: Arc<dyn StatusClient>,
    reboot_inertia: Duration,
}

impl NodeController {
    pub fn new(
        instance: &str,
        nodes: Arc<dyn NodeLister>,
        status: Arc<dyn StatusClient>,
    ) -> Self {
        NodeController {
            instance: instance.to_string(),
            nodes,
            status,
            reboot_inertia: DEFAULT_REBOOT_INERTIA,
        }
    }

    pub fn reboot_inertia(mut self, inertia: Duration) -> Self {
        self.reboot_inertia = inertia;
        self
    }
}

#[async_trait]
impl ReconcileSync for NodeController {
    async fn sync(&self, ctx: &SyncContext) -> Result<(), Error> {
        let mut masters = self.nodes.list_nodes(MASTER_NODE_LABEL).await?;
        masters.sort_by_key(|n| n.name_any());
        let master_names: BTreeSet<String> = masters.iter().map(|n| n.name_any()).collect();

        let mut status = self.status.get_status(&self.instance).await?;

        // Entries whose node vanished are retracted with a guarded patch. An
        // entry with an in-flight installer is kept until it settles.
        let mut removable: Vec<&str> = Vec::new();
        let mut pending_removal: Vec<String> = Vec::new();
        for entry in &status.node_statuses {
            if master_names.contains(&entry.node_name) {
                continue;
            }
            if entry.target_revision != 0 {
                pending_removal.push(entry.node_name.clone());
            } else {
                removable.push(&entry.node_name);
            }
        }
        if !removable.is_empty() {
            let patch = remove_node_statuses(JsonPatch::new(), &status.node_statuses, &removable);
            self.status.patch_status(&self.instance, &patch).await?;
            status = self.status.get_status(&self.instance).await?;
        }
        for node_name in &pending_removal {
            ctx.recorder.warningf(
                reasons::MASTER_NODE_NOT_REMOVED,
                format!(
                    "master node \"{node_name}\" is gone but still has an installer in flight; keeping its status entry"
                ),
            );
        }

        // New masters get a fresh entry through apply, not patch.
        let mut changed = false;
        for name in &master_names {
            if girder_types::find_node_status(&status.node_statuses, name).is_none() {
                status.node_statuses.push(NodeStatus {
                    node_name: name.clone(),
                    ..Default::default()
                });
                changed = true;
            }
        }

        let message = degraded_message(&masters, Timestamp::now(), self.reboot_inertia);
        let condition = match (&message, pending_removal.is_empty()) {
            (Some(message), _) => OperatorCondition::new(
                condition_types::NODE_CONTROLLER_DEGRADED,
                ConditionStatus::True,
                reasons::MASTER_NODES_READY,
            )
            .with_message(message.clone()),
            (None, false) => OperatorCondition::new(
                condition_types::NODE_CONTROLLER_DEGRADED,
                ConditionStatus::True,
                reasons::MASTER_NODE_NOT_REMOVED,
            )
            .with_message(format!(
                "master node(s) {} pending removal",
                pending_removal.join(", ")
            )),
            (None, true) => OperatorCondition::new(
                condition_types::NODE_CONTROLLER_DEGRADED,
                ConditionStatus::False,
                reasons::MASTER_NODES_READY,
            )
            .with_message("All master nodes are ready"),
        };

        let previous_message = find_condition(
            &status.conditions,
            condition_types::NODE_CONTROLLER_DEGRADED,
        )
        .and_then(|c| c.message.clone());
        if previous_message.as_deref() != condition.message.as_deref() {
            ctx.recorder.eventf(
                reasons::MASTER_NODES_READY_CHANGED,
                condition
                    .message
                    .clone()
                    .unwrap_or_else(|| "All master nodes are ready".to_string()),
            );
            changed = true;
        } else if find_condition(&status.conditions, condition_types::NODE_CONTROLLER_DEGRADED)
            .map(|c| c.status)
            != Some(condition.status)
        {
            changed = true;
        }

        if changed {
            set_condition(&mut status.conditions, condition);
            self.status.apply_status(&self.instance, status).await?;
        }
        Ok(())
    }
}

/// Enumerates not-ready masters, or `None` when every master is ready.
/// Masters annotated as rebooting are exempt while their Ready transition
/// is younger than the inertia window.
fn degraded_message(masters: &[Node], now: Timestamp, inertia: Duration) -> Option<String> {
    let mut phrases = Vec::new();
    for node in masters {
        let name = node.name_any();
        let ready = node
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .and_then(|cs| cs.iter().find(|c| c.type_ == "Ready"));
        if ready.is_some_and(|c| c.status == "True") {
            continue;
        }

        let rebooting = node
            .annotations()
            .contains_key(annotations::REBOOTING);
        let transition = ready.and_then(|c| c.last_transition_time.as_ref());
        if rebooting {
            let within_window = transition.is_none_or(|t| {
                now.duration_since(t.0).as_secs() < inertia.as_secs() as i64
            });
            if within_window {
                continue;
            }
        }

        let since = transition
            .map(|t| t.0.to_string())
            .unwrap_or_else(|| "an unknown time".to_string());
        let reason = ready
            .and_then(|c| c.reason.clone())
            .unwrap_or_else(|| "Unknown".to_string());
        phrases.push(format!("node \"{name}\" not ready since {since} because {reason}"));
    }
    if phrases.is_empty() {
        None
    } else {
        Some(phrases.join("; "))
    }
}
