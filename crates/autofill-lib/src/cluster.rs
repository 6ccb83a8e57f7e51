//! Read-only access to the cluster and metrics APIs
//!
//! The decision pipeline only ever reads: it fetches the owning ReplicaSet and
//! Deployment, lists running sibling pods and fetches one usage sample per
//! sibling. Both seams are traits so the pipeline can run against mocks.

use crate::models::PodMetrics;
use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::{
    apps::v1::{Deployment, ReplicaSet},
    core::v1::Pod,
};
use kube::{
    api::{Api, ListParams},
    Client,
};
use tracing::debug;

/// Field selector restricting sibling listing to running pods
pub const RUNNING_PHASE_SELECTOR: &str = "status.phase=Running";

/// Lookups against the cluster control plane
#[async_trait]
pub trait ClusterReader: Send + Sync {
    /// Get a ReplicaSet by name
    async fn replica_set(&self, namespace: &str, name: &str) -> Result<ReplicaSet>;

    /// Get a Deployment by name
    async fn deployment(&self, namespace: &str, name: &str) -> Result<Deployment>;

    /// List running pods matching a label selector
    async fn running_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>>;
}

/// Lookups against the resource metrics API
#[async_trait]
pub trait MetricsReader: Send + Sync {
    /// Get the latest usage sample of a pod
    async fn pod_metrics(&self, namespace: &str, name: &str) -> Result<PodMetrics>;
}

/// [`ClusterReader`] and [`MetricsReader`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect with in-cluster configuration, falling back to the local kubeconfig
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default()
            .await
            .context("Failed to create Kubernetes client")?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl ClusterReader for KubeCluster {
    async fn replica_set(&self, namespace: &str, name: &str) -> Result<ReplicaSet> {
        let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .with_context(|| format!("Failed to get ReplicaSet {}/{}", namespace, name))
    }

    async fn deployment(&self, namespace: &str, name: &str) -> Result<Deployment> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .with_context(|| format!("Failed to get Deployment {}/{}", namespace, name))
    }

    async fn running_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default()
            .labels(label_selector)
            .fields(RUNNING_PHASE_SELECTOR);

        let pods = api
            .list(&params)
            .await
            .with_context(|| {
                format!("Failed to list pods in {} matching {}", namespace, label_selector)
            })?;

        debug!(
            namespace = %namespace,
            selector = %label_selector,
            count = pods.items.len(),
            "Listed pods"
        );
        Ok(pods.items)
    }
}

#[async_trait]
impl MetricsReader for KubeCluster {
    async fn pod_metrics(&self, namespace: &str, name: &str) -> Result<PodMetrics> {
        let api: Api<PodMetrics> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .with_context(|| format!("Failed to get PodMetrics {}/{}", namespace, name))
    }
}
