//! Sibling usage aggregation
//!
//! Lists the running pods selected by a Deployment's pod-template labels,
//! fetches each pod's latest usage sample and reduces the samples to a
//! per-container, per-dimension maximum. A single failed fetch fails the whole
//! aggregation; there is no partial result.

use crate::cluster::{ClusterReader, MetricsReader};
use crate::error::DecisionError;
use crate::models::{Dimension, PodMetrics, UsageMaxima};
use crate::quantity::Quantity;
use futures_util::{stream, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Render a label set as a `key=value,key=value` selector (sorted by key)
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(",")
}

/// Aggregate the usage maxima of all running siblings selected by `labels`
///
/// Samples are fetched with at most `concurrency` lookups in flight and are
/// folded in listing order. The first failed fetch drops every outstanding
/// fetch and fails the aggregation.
pub async fn aggregate(
    cluster: &dyn ClusterReader,
    metrics: &dyn MetricsReader,
    labels: &BTreeMap<String, String>,
    namespace: &str,
    concurrency: usize,
) -> Result<UsageMaxima, DecisionError> {
    let selector = label_selector(labels);

    let pods = cluster
        .running_pods(namespace, &selector)
        .await
        .map_err(|e| {
            DecisionError::lookup(format!("running pods in {} matching {}", namespace, selector), e)
        })?;
    info!(
        namespace = %namespace,
        selector = %selector,
        known_pods = pods.len(),
        "Listed running siblings"
    );

    let names: Vec<String> = pods.iter().map(pod_name).collect();
    let samples: Vec<PodMetrics> = stream::iter(names)
        .map(|name| async move { fetch_sample(metrics, namespace, &name).await })
        .buffered(concurrency.max(1))
        .try_collect()
        .await?;

    let mut maxima = UsageMaxima::new();
    for sample in &samples {
        record_sample(&mut maxima, sample)?;
    }
    Ok(maxima)
}

fn pod_name(pod: &Pod) -> String {
    pod.metadata.name.clone().unwrap_or_default()
}

async fn fetch_sample(
    metrics: &dyn MetricsReader,
    namespace: &str,
    name: &str,
) -> Result<PodMetrics, DecisionError> {
    debug!(namespace = %namespace, pod = %name, "Fetching pod metrics");

    metrics
        .pod_metrics(namespace, name)
        .await
        .map_err(|e| DecisionError::lookup(format!("PodMetrics {}/{}", namespace, name), e))
}

/// Fold one sibling sample into the maxima; untracked dimensions are ignored
pub fn record_sample(maxima: &mut UsageMaxima, sample: &PodMetrics) -> Result<(), DecisionError> {
    let pod_name = sample.metadata.name.as_deref().unwrap_or_default();

    for container in &sample.containers {
        for (key, raw) in &container.usage {
            let Some(dimension) = Dimension::from_key(key) else {
                continue;
            };
            let usage = Quantity::try_from(raw).map_err(|e| {
                DecisionError::invalid_quantity(
                    format!("{} usage of container {} in pod {}", key, container.name, pod_name),
                    e,
                )
            })?;
            maxima.observe(&container.name, dimension, usage);
        }
    }

    maxima.add_sample();
    Ok(())
}
