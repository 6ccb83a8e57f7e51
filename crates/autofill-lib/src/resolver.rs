//! Ownership resolution
//!
//! Walks a pod's ownership chain exactly two hops up (Pod -> ReplicaSet ->
//! Deployment) to find the Deployment whose pod-template labels select the
//! pod's siblings. Any other ownership shape is not managed by a Deployment
//! and yields no decision.

use crate::cluster::ClusterReader;
use crate::error::DecisionError;
use crate::models::TemplateOwner;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::{info, warn};

pub const REPLICA_SET_KIND: &str = "ReplicaSet";
pub const DEPLOYMENT_KIND: &str = "Deployment";

/// Name of the owner of the given kind; the last matching reference wins
pub fn owner_name<'a>(metadata: &'a ObjectMeta, kind: &str) -> Option<&'a str> {
    metadata
        .owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .rev()
        .find(|owner| owner.kind == kind)
        .map(|owner| owner.name.as_str())
}

/// Resolve the Deployment that owns `pod` through its ReplicaSet
///
/// Returns `Ok(None)` when either owner reference is missing. A failed lookup
/// of either owner object is terminal for the decision.
pub async fn resolve(
    cluster: &dyn ClusterReader,
    pod: &Pod,
    namespace: &str,
) -> Result<Option<TemplateOwner>, DecisionError> {
    let Some(replica_set_name) = owner_name(&pod.metadata, REPLICA_SET_KIND) else {
        return Ok(None);
    };
    info!(namespace = %namespace, replica_set = %replica_set_name, "Found ReplicaSet");

    let replica_set = cluster
        .replica_set(namespace, replica_set_name)
        .await
        .map_err(|e| {
            DecisionError::lookup(
                format!("{} {}/{}", REPLICA_SET_KIND, namespace, replica_set_name),
                e,
            )
        })?;

    let Some(deployment_name) = owner_name(&replica_set.metadata, DEPLOYMENT_KIND) else {
        return Ok(None);
    };
    info!(namespace = %namespace, deployment = %deployment_name, "Found Deployment");

    let deployment = cluster
        .deployment(namespace, deployment_name)
        .await
        .map_err(|e| {
            DecisionError::lookup(
                format!("{} {}/{}", DEPLOYMENT_KIND, namespace, deployment_name),
                e,
            )
        })?;

    let pod_labels = deployment
        .spec
        .and_then(|spec| spec.template.metadata)
        .and_then(|metadata| metadata.labels)
        .unwrap_or_default();

    // An empty selector would match every running pod in the namespace
    if pod_labels.is_empty() {
        warn!(
            namespace = %namespace,
            deployment = %deployment_name,
            "Deployment has no pod template labels"
        );
        return Ok(None);
    }

    Ok(Some(TemplateOwner {
        name: deployment_name.to_string(),
        namespace: namespace.to_string(),
        pod_labels,
    }))
}
