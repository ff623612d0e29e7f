//! Pod lookup against the Kubernetes API

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::Client;
use tracing::debug;

use crate::errors::TunnelError;
use crate::selector::LabelQuery;

/// Phase reported for pods whose containers are running
pub const RUNNING_PHASE: &str = "Running";

/// The parts of a pod that target resolution looks at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSummary {
    pub name: String,
    pub namespace: String,
    pub phase: String,
}

impl PodSummary {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, phase: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            phase: phase.into(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.phase == RUNNING_PHASE
    }
}

impl From<Pod> for PodSummary {
    fn from(pod: Pod) -> Self {
        Self {
            name: pod.metadata.name.unwrap_or_default(),
            namespace: pod.metadata.namespace.unwrap_or_default(),
            phase: pod.status.and_then(|s| s.phase).unwrap_or_default(),
        }
    }
}

/// Source of pods that a label query can be resolved against
#[async_trait]
pub trait PodDirectory: Send + Sync {
    /// List running pods matching `selector`, in `namespace` or in all
    /// namespaces when `None`
    async fn list_running(
        &self,
        namespace: Option<&str>,
        selector: &LabelQuery,
    ) -> Result<Vec<PodSummary>, TunnelError>;
}

/// [`PodDirectory`] backed by the cluster's pod API
#[derive(Clone)]
pub struct KubeDirectory {
    client: Client,
}

impl KubeDirectory {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: Option<&str>) -> Api<Pod> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

#[async_trait]
impl PodDirectory for KubeDirectory {
    async fn list_running(
        &self,
        namespace: Option<&str>,
        selector: &LabelQuery,
    ) -> Result<Vec<PodSummary>, TunnelError> {
        let params = ListParams::default()
            .labels(&selector.to_string())
            .fields(&format!("status.phase={}", RUNNING_PHASE));

        debug!(namespace = namespace.unwrap_or("*"), selector = %selector, "Listing pods");

        let pods = self.api(namespace).list(&params).await?;
        Ok(pods.items.into_iter().map(PodSummary::from).collect())
    }
}
