use super::{
    Asset, MODE_DEFAULT, ResourceSource, atomic_write, recover_dir_swap, swap_dir_into_place,
};
use crate::clients::ResourceGetter;
use crate::util::Error;
use owo_colors::OwoColorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Placeholder token the revision controller leaves in the pod manifest;
/// the installer substitutes the concrete revision number.
pub const REVISION_PLACEHOLDER: &str = "REVISION";

/// Key inside the pod-manifest configmap that carries the manifest itself.
pub const POD_MANIFEST_KEY: &str = "pod.yaml";

pub struct InstallerOptions {
    pub revision: i64,
    pub namespace: String,
    /// Base name of the managed static pod.
    pub pod_manifest_name: String,
    pub resource_dir: PathBuf,
    pub pod_manifest_dir: PathBuf,
    /// The first configmap is the pod-manifest configmap.
    pub configmaps: Vec<ResourceSource>,
    pub secrets: Vec<ResourceSource>,
    /// Outer deadline for all resource fetches.
    pub fetch_timeout: Duration,
    pub retry_interval: Duration,
}

impl InstallerOptions {
    pub fn new(revision: i64, namespace: &str, pod_manifest_name: &str) -> Self {
        InstallerOptions {
            revision,
            namespace: namespace.to_string(),
            pod_manifest_name: pod_manifest_name.to_string(),
            resource_dir: PathBuf::from("/etc/kubernetes/static-pod-resources"),
            pod_manifest_dir: PathBuf::from("/etc/kubernetes/manifests"),
            configmaps: Vec::new(),
            secrets: Vec::new(),
            fetch_timeout: Duration::from_secs(120),
            retry_interval: Duration::from_secs(1),
        }
    }
}

/// Materializes one revision on the node it runs on. Connection errors are
/// retried under the outer deadline; a missing required resource fails hard
/// immediately; a missing optional resource is skipped.
pub struct Installer {
    options: InstallerOptions,
    getter: Arc<dyn ResourceGetter>,
}

impl Installer {
    pub fn new(options: InstallerOptions, getter: Arc<dyn ResourceGetter>) -> Self {
        Installer { options, getter }
    }

    fn revision_dir(&self) -> PathBuf {
        self.options.resource_dir.join(format!(
            "{}-pod-{}",
            self.options.pod_manifest_name, self.options.revision
        ))
    }

    fn live_manifest_path(&self) -> PathBuf {
        self.options
            .pod_manifest_dir
            .join(format!("{}.yaml", self.options.pod_manifest_name))
    }

    pub async fn run(&self) -> Result<(), Error> {
        let opts = &self.options;
        println!(
            "📦 {}{}",
            "Installing revision ".green(),
            opts.revision.to_string().green().dimmed()
        );

        let deadline = Instant::now() + opts.fetch_timeout;
        let revision_dir = self.revision_dir();
        recover_dir_swap(&revision_dir)?;

        let staging = opts.resource_dir.join(format!(
            ".{}-pod-{}.staging",
            opts.pod_manifest_name, opts.revision
        ));
        if staging.exists() {
            std::fs::remove_dir_all(&staging)?;
        }
        std::fs::create_dir_all(&staging)?;

        let mut pod_manifest: Option<String> = None;
        for (index, source) in opts.configmaps.iter().enumerate() {
            let Some(configmap) = self.fetch_configmap(source, deadline).await? else {
                continue;
            };
            let dir = staging.join("configmaps").join(&source.name);
            for (key, value) in configmap.data.clone().unwrap_or_default() {
                Asset::new(&key, value.into_bytes(), false).write_to(&dir)?;
            }
            for (key, value) in configmap.binary_data.clone().unwrap_or_default() {
                Asset::new(&key, value.0, false).write_to(&dir)?;
            }
            if index == 0 {
                pod_manifest = configmap
                    .data
                    .as_ref()
                    .and_then(|d| d.get(POD_MANIFEST_KEY))
                    .cloned();
            }
        }
        let Some(manifest) = pod_manifest else {
            return Err(Error::UserInput(format!(
                "pod-manifest configmap carries no '{POD_MANIFEST_KEY}' key"
            )));
        };

        for source in &opts.secrets {
            let Some(secret) = self.fetch_secret(source, deadline).await? else {
                continue;
            };
            let dir = staging.join("secrets").join(&source.name);
            for (key, value) in secret.data.clone().unwrap_or_default() {
                Asset::new(&key, value.0, true).write_to(&dir)?;
            }
        }

        let manifest = manifest.replace(REVISION_PLACEHOLDER, &opts.revision.to_string());
        atomic_write(
            &staging.join(format!("{}-pod.yaml", opts.pod_manifest_name)),
            manifest.as_bytes(),
            MODE_DEFAULT,
        )?;

        // Land the whole revision directory, then publish into the kubelet
        // manifest directory last. The kubelet only ever sees a complete
        // manifest.
        swap_dir_into_place(&staging, &revision_dir)?;
        atomic_write(&self.live_manifest_path(), manifest.as_bytes(), MODE_DEFAULT)?;

        println!(
            "✅ {}{}",
            "Installed revision ".green(),
            opts.revision.to_string().green().dimmed()
        );
        Ok(())
    }

    async fn fetch_configmap(
        &self,
        source: &ResourceSource,
        deadline: Instant,
    ) -> Result<Option<k8s_openapi::api::core::v1::ConfigMap>, Error> {
        loop {
            match self
                .getter
                .get_configmap(&self.options.namespace, &source.name)
                .await
            {
                Ok(Some(configmap)) => return Ok(Some(configmap)),
                Ok(None) if source.optional => return Ok(None),
                Ok(None) => {
                    return Err(Error::RequiredNotFound {
                        kind: "configmap",
                        name: source.name.clone(),
                    });
                }
                Err(e) => self.wait_for_retry("configmap", &source.name, e, deadline).await?,
            }
        }
    }

    async fn fetch_secret(
        &self,
        source: &ResourceSource,
        deadline: Instant,
    ) -> Result<Option<k8s_openapi::api::core::v1::Secret>, Error> {
        loop {
            match self
                .getter
                .get_secret(&self.options.namespace, &source.name)
                .await
            {
                Ok(Some(secret)) => return Ok(Some(secret)),
                Ok(None) if source.optional => return Ok(None),
                Ok(None) => {
                    return Err(Error::RequiredNotFound {
                        kind: "secret",
                        name: source.name.clone(),
                    });
                }
                Err(e) => self.wait_for_retry("secret", &source.name, e, deadline).await?,
            }
        }
    }

    async fn wait_for_retry(
        &self,
        kind: &str,
        name: &str,
        error: Error,
        deadline: Instant,
    ) -> Result<(), Error> {
        if Instant::now() + self.options.retry_interval >= deadline {
            return Err(Error::DeadlineExceeded(format!(
                "fetching {kind} '{name}': {error}"
            )));
        }
        eprintln!(
            "{}",
            format!("Retrying fetch of {kind} '{name}': {error}").yellow()
        );
        tokio::time::sleep(self.options.retry_interval).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use k8s_openapi::ByteString;
    use k8s_openapi::api::core::v1::{ConfigMap, Secret};
    use kube::api::ObjectMeta;
    use std::collections::{BTreeMap, HashMap};
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Mutex;

    struct FlakyGetter {
        configmaps: HashMap<String, ConfigMap>,
        secrets: HashMap<String, Secret>,
        failures_left: Mutex<u32>,
    }

    impl FlakyGetter {
        fn new(configmaps: Vec<ConfigMap>, secrets: Vec<Secret>, failures: u32) -> Arc<Self> {
            Arc::new(FlakyGetter {
                configmaps: configmaps
                    .into_iter()
                    .map(|cm| (cm.metadata.name.clone().unwrap(), cm))
                    .collect(),
                secrets: secrets
                    .into_iter()
                    .map(|s| (s.metadata.name.clone().unwrap(), s))
                    .collect(),
                failures_left: Mutex::new(failures),
            })
        }

        fn maybe_fail(&self) -> Result<(), Error> {
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(Error::UserInput("connection refused".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ResourceGetter for FlakyGetter {
        async fn get_configmap(
            &self,
            _namespace: &str,
            name: &str,
        ) -> Result<Option<ConfigMap>, Error> {
            self.maybe_fail()?;
            Ok(self.configmaps.get(name).cloned())
        }

        async fn get_secret(&self, _namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
            self.maybe_fail()?;
            Ok(self.secrets.get(name).cloned())
        }
    }

    fn pod_configmap() -> ConfigMap {
        let mut data = BTreeMap::new();
        data.insert(
            POD_MANIFEST_KEY.to_string(),
            concat!(
                "apiVersion: v1\n",
                "kind: Pod\n",
                "metadata:\n",
                "  name: girder-control\n",
                "  labels:\n",
                "    girder.io/revision: \"REVISION\"\n",
            )
            .to_string(),
        );
        data.insert("recover.sh".to_string(), "#!/bin/sh\n".to_string());
        ConfigMap {
            metadata: ObjectMeta {
                name: Some("girder-control-pod".into()),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        }
    }

    fn serving_secret() -> Secret {
        let mut data = BTreeMap::new();
        data.insert("tls.key".to_string(), ByteString(b"private".to_vec()));
        Secret {
            metadata: ObjectMeta {
                name: Some("serving-cert".into()),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        }
    }

    fn options(dir: &std::path::Path) -> InstallerOptions {
        let mut opts = InstallerOptions::new(3, "girder-system", "girder-control");
        opts.resource_dir = dir.join("static-pod-resources");
        opts.pod_manifest_dir = dir.join("manifests");
        opts.configmaps = vec![ResourceSource::required("girder-control-pod")];
        opts.secrets = vec![ResourceSource::required("serving-cert")];
        opts.fetch_timeout = Duration::from_secs(5);
        opts.retry_interval = Duration::from_millis(5);
        opts
    }

    fn mode_of(path: &std::path::Path) -> u32 {
        fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[tokio::test]
    async fn materializes_the_revision_layout() {
        let dir = tempfile::tempdir().unwrap();
        let getter = FlakyGetter::new(vec![pod_configmap()], vec![serving_secret()], 0);
        let installer = Installer::new(options(dir.path()), getter);

        installer.run().await.expect("install succeeds");

        let rev_dir = dir.path().join("static-pod-resources/girder-control-pod-3");
        let manifest = fs::read_to_string(rev_dir.join("girder-control-pod.yaml")).unwrap();
        assert!(manifest.contains("girder.io/revision: \"3\""));
        assert!(!manifest.contains(REVISION_PLACEHOLDER));

        let live = fs::read_to_string(
            dir.path().join("manifests/girder-control.yaml"),
        )
        .unwrap();
        assert_eq!(live, manifest);

        let script = rev_dir.join("configmaps/girder-control-pod/recover.sh");
        assert_eq!(mode_of(&script), 0o700);
        let key = rev_dir.join("secrets/serving-cert/tls.key");
        assert_eq!(mode_of(&key), 0o600);
        assert_eq!(fs::read(&key).unwrap(), b"private");
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let getter = FlakyGetter::new(vec![pod_configmap()], vec![serving_secret()], 2);
        let installer = Installer::new(options(dir.path()), getter);
        installer.run().await.expect("install recovers");
    }

    #[tokio::test]
    async fn deadline_turns_transient_errors_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let getter = FlakyGetter::new(vec![pod_configmap()], vec![serving_secret()], u32::MAX);
        let mut opts = options(dir.path());
        opts.fetch_timeout = Duration::from_millis(20);
        let installer = Installer::new(opts, getter);

        let err = installer.run().await.expect_err("must time out");
        assert!(matches!(err, Error::DeadlineExceeded(_)));
        assert!(!dir.path().join("manifests/girder-control.yaml").exists());
    }

    #[tokio::test]
    async fn missing_required_resource_fails_hard_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let getter = FlakyGetter::new(vec![pod_configmap()], Vec::new(), 0);
        let installer = Installer::new(options(dir.path()), getter);

        let err = installer.run().await.expect_err("must fail");
        assert!(matches!(err, Error::RequiredNotFound { kind: "secret", .. }));
        assert!(!dir.path().join("manifests/girder-control.yaml").exists());
    }

    #[tokio::test]
    async fn missing_optional_resource_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let getter = FlakyGetter::new(vec![pod_configmap()], vec![serving_secret()], 0);
        let mut opts = options(dir.path());
        opts.configmaps.push(ResourceSource::optional("overrides"));
        let installer = Installer::new(opts, getter);

        installer.run().await.expect("install succeeds");
        let rev_dir = dir.path().join("static-pod-resources/girder-control-pod-3");
        assert!(!rev_dir.join("configmaps/overrides").exists());
    }
}
