//! Read/write cluster access consumed by the controllers. Everything is a
//! trait so reconciles can run against fakes; the `Kube*` types are the
//! production implementations.

use crate::util::Error;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Node, Pod, Secret};
use kube::{
    Api, Client,
    api::{ListParams, PostParams},
};

#[async_trait]
pub trait PodClient: Send + Sync {
    /// `Ok(None)` when the pod does not exist.
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, Error>;
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, Error>;
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, Error>;
}

pub struct KubePodClient {
    client: Client,
}

impl KubePodClient {
    pub fn new(client: Client) -> Self {
        KubePodClient { client }
    }

    fn api(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl PodClient for KubePodClient {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, Error> {
        match self.api(namespace).get(name).await {
            Ok(pod) => Ok(Some(pod)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, Error> {
        Ok(self.api(namespace).create(&PostParams::default(), pod).await?)
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, Error> {
        let params = ListParams::default().labels(label_selector);
        Ok(self.api(namespace).list(&params).await?.items)
    }
}

#[async_trait]
pub trait NodeLister: Send + Sync {
    async fn list_nodes(&self, label_selector: &str) -> Result<Vec<Node>, Error>;
}

pub struct KubeNodeLister {
    client: Client,
}

impl KubeNodeLister {
    pub fn new(client: Client) -> Self {
        KubeNodeLister { client }
    }
}

#[async_trait]
impl NodeLister for KubeNodeLister {
    async fn list_nodes(&self, label_selector: &str) -> Result<Vec<Node>, Error> {
        let api: Api<Node> = Api::all(self.client.clone());
        let params = ListParams::default().labels(label_selector);
        Ok(api.list(&params).await?.items)
    }
}

/// Configmap/secret reads for the installer. `Ok(None)` means NotFound —
/// fatal for required sources, silent for optional ones. Transport errors
/// are `Err` and retried by the caller.
#[async_trait]
pub trait ResourceGetter: Send + Sync {
    async fn get_configmap(&self, namespace: &str, name: &str)
    -> Result<Option<ConfigMap>, Error>;
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;
}

pub struct KubeResourceGetter {
    client: Client,
}

impl KubeResourceGetter {
    pub fn new(client: Client) -> Self {
        KubeResourceGetter { client }
    }
}

#[async_trait]
impl ResourceGetter for KubeResourceGetter {
    async fn get_configmap(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(cm) => Ok(Some(cm)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(secret) => Ok(Some(secret)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Records the operand version an operator instance has fully rolled out.
/// Resetting is expressed as recording the empty string.
pub trait VersionRecorder: Send + Sync {
    fn set_version(&self, operand: &str, version: &str);
}
