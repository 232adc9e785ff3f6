//! Structured status access. All controllers mutate `OperatorStatus` through
//! this interface; nothing in the process caches the status array, so
//! concurrency correctness is delegated to the API server's replace
//! semantics plus the test-guarded patches of [`crate::patch`].

use crate::patch::JsonPatch;
use crate::util::{Error, MANAGER_NAME};
use async_trait::async_trait;
use girder_types::{OperatorStatus, StaticPodOperator, StaticPodOperatorSpec};
use kube::{
    Api, Client,
    api::{Patch, PatchParams},
};

#[async_trait]
pub trait StatusClient: Send + Sync {
    async fn get_spec(&self, name: &str) -> Result<StaticPodOperatorSpec, Error>;

    async fn get_status(&self, name: &str) -> Result<OperatorStatus, Error>;

    /// Replaces the status block, preserving everything the caller did not
    /// touch. A no-op when the submitted status matches the live one.
    async fn apply_status(&self, name: &str, status: OperatorStatus) -> Result<(), Error>;

    /// Submits a test-guarded JSON-patch. Empty patches skip the round-trip.
    async fn patch_status(&self, name: &str, patch: &JsonPatch) -> Result<(), Error>;
}

/// Status client backed by the `StaticPodOperator` API.
pub struct KubeStatusClient {
    api: Api<StaticPodOperator>,
}

impl KubeStatusClient {
    pub fn new(client: Client, namespace: &str) -> Self {
        KubeStatusClient {
            api: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl StatusClient for KubeStatusClient {
    async fn get_spec(&self, name: &str) -> Result<StaticPodOperatorSpec, Error> {
        Ok(self.api.get(name).await?.spec)
    }

    async fn get_status(&self, name: &str) -> Result<OperatorStatus, Error> {
        Ok(self.api.get(name).await?.status.unwrap_or_default())
    }

    async fn apply_status(&self, name: &str, status: OperatorStatus) -> Result<(), Error> {
        let instance = self.api.get(name).await?;
        let mut modified = instance.clone();
        modified.status = Some(status);
        let diff = json_patch::diff(
            &serde_json::to_value(&instance)?,
            &serde_json::to_value(&modified)?,
        );
        if diff.0.is_empty() {
            return Ok(());
        }
        self.api
            .patch_status(
                name,
                &PatchParams::apply(MANAGER_NAME),
                &Patch::Json::<StaticPodOperator>(diff),
            )
            .await?;
        Ok(())
    }

    async fn patch_status(&self, name: &str, patch: &JsonPatch) -> Result<(), Error> {
        if patch.is_empty() {
            return Ok(());
        }
        self.api
            .patch_status(
                name,
                &PatchParams::default(),
                &Patch::Json::<StaticPodOperator>(patch.to_patch()?),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// In-memory status store. JSON-patches are applied to the serialized
    /// form of the stored status, so guard failures surface exactly as they
    /// would against the API server.
    pub struct FakeStatusClient {
        spec: Mutex<StaticPodOperatorSpec>,
        status: Mutex<OperatorStatus>,
        pub applied: Mutex<Vec<OperatorStatus>>,
        pub patched: Mutex<Vec<Vec<u8>>>,
    }

    impl FakeStatusClient {
        pub fn new(initial: OperatorStatus) -> Arc<Self> {
            Arc::new(FakeStatusClient {
                spec: Mutex::new(StaticPodOperatorSpec {
                    failed_revision_limit: 5,
                    succeeded_revision_limit: 5,
                    log_level: 0,
                }),
                status: Mutex::new(initial),
                applied: Mutex::new(Vec::new()),
                patched: Mutex::new(Vec::new()),
            })
        }

        pub fn set_spec(&self, spec: StaticPodOperatorSpec) {
            *self.spec.lock().unwrap() = spec;
        }

        pub fn current(&self) -> OperatorStatus {
            self.status.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StatusClient for FakeStatusClient {
        async fn get_spec(&self, _name: &str) -> Result<StaticPodOperatorSpec, Error> {
            Ok(self.spec.lock().unwrap().clone())
        }

        async fn get_status(&self, _name: &str) -> Result<OperatorStatus, Error> {
            Ok(self.current())
        }

        async fn apply_status(&self, _name: &str, status: OperatorStatus) -> Result<(), Error> {
            self.applied.lock().unwrap().push(status.clone());
            *self.status.lock().unwrap() = status;
            Ok(())
        }

        async fn patch_status(&self, _name: &str, patch: &JsonPatch) -> Result<(), Error> {
            if patch.is_empty() {
                return Ok(());
            }
            self.patched.lock().unwrap().push(patch.to_bytes()?);
            let current = self.current();
            let mut doc = serde_json::json!({"status": serde_json::to_value(&current)?});
            json_patch::patch(&mut doc, &patch.to_patch()?)
                .map_err(|e| Error::UserInput(format!("patch did not apply: {e}")))?;
            let updated: OperatorStatus = serde_json::from_value(doc["status"].clone())?;
            *self.status.lock().unwrap() = updated;
            Ok(())
        }
    }
}
