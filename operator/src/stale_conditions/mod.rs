//! Removes condition types the owning operator no longer sets, so upgrades
//! do not leave dead conditions behind.

use crate::factory::{ReconcileSync, SyncContext};
use crate::patch::{JsonPatch, remove_conditions};
use crate::status::StatusClient;
use crate::util::Error;
use async_trait::async_trait;
use std::sync::Arc;

pub struct StaleConditionsController {
    instance: String,
    stale_types: Vec<String>,
    status: Arc<dyn StatusClient>,
}

impl StaleConditionsController {
    pub fn new(
        instance: &str,
        stale_types: Vec<String>,
        status: Arc<dyn StatusClient>,
    ) -> Self {
        StaleConditionsController {
            instance: instance.to_string(),
            stale_types,
            status,
        }
    }
}

#[async_trait]
impl ReconcileSync for StaleConditionsController {
    async fn sync(&self, _ctx: &SyncContext) -> Result<(), Error> {
        let current = self.status.get_status(&self.instance).await?;
        let stale: Vec<&str> = self.stale_types.iter().map(String::as_str).collect();
        let patch = remove_conditions(JsonPatch::new(), &current.conditions, &stale);
        if patch.is_empty() {
            return Ok(());
        }
        self.status.patch_status(&self.instance, &patch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::QueueKey;
    use crate::factory::fake::CapturingRecorder;
    use crate::status::fake::FakeStatusClient;
    use girder_types::{ConditionStatus, OperatorCondition, OperatorStatus, reasons};
    use tokio_util::sync::CancellationToken;

    fn ctx() -> SyncContext {
        SyncContext {
            key: QueueKey::Singleton,
            recorder: CapturingRecorder::new(),
            shutdown: CancellationToken::new(),
        }
    }

    fn status_with(types: &[&str]) -> OperatorStatus {
        OperatorStatus {
            conditions: types
                .iter()
                .map(|t| OperatorCondition::new(*t, ConditionStatus::True, reasons::AS_EXPECTED))
                .collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn removes_only_the_stale_types_and_keeps_order() {
        let status = FakeStatusClient::new(status_with(&[
            "LegacyDegraded",
            "Available",
            "AncientProgressing",
            "Degraded",
        ]));
        let sut = StaleConditionsController::new(
            "instance",
            vec!["LegacyDegraded".into(), "AncientProgressing".into()],
            status.clone(),
        );

        sut.sync(&ctx()).await.expect("sync");

        let remaining: Vec<String> = status
            .current()
            .conditions
            .iter()
            .map(|c| c.type_.clone())
            .collect();
        assert_eq!(remaining, vec!["Available".to_string(), "Degraded".to_string()]);
    }

    #[tokio::test]
    async fn nothing_stale_means_no_patch_round_trip() {
        let status = FakeStatusClient::new(status_with(&["Available"]));
        let sut = StaleConditionsController::new(
            "instance",
            vec!["LegacyDegraded".into()],
            status.clone(),
        );

        sut.sync(&ctx()).await.expect("sync");
        assert!(status.patched.lock().unwrap().is_empty());
    }
}
