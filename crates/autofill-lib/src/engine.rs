//! Admission decision pipeline
//!
//! Resolves the pod's Deployment, aggregates sibling usage, decides the
//! resource changes for every container and emits the patch list. Each call
//! builds its own state; nothing is shared between concurrent decisions.

use crate::aggregator::{self, label_selector};
use crate::cluster::{ClusterReader, MetricsReader};
use crate::decision::{decide, DeclaredResources, FieldDecision};
use crate::error::DecisionError;
use crate::models::UsageMaxima;
use crate::observability::{outcomes, StructuredLogger, WebhookMetrics};
use crate::patch::{emit, PatchOp};
use crate::resolver;
use k8s_openapi::api::core::v1::{Container, Pod};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Configuration for the decision pipeline
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deadline for a whole decision, lookups included
    pub decision_timeout: Duration,
    /// Maximum number of sibling metrics fetches in flight
    pub metrics_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            decision_timeout: Duration::from_secs(10),
            metrics_concurrency: 1,
        }
    }
}

/// A decoded pod creation request
#[derive(Debug, Clone)]
pub struct PodAdmission {
    pub uid: String,
    /// Namespace from the admission request; authoritative over the pod's own
    pub namespace: String,
    pub name: String,
    pub pod: Pod,
}

/// The result of a completed decision
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// One of [`outcomes::PATCHED`], [`outcomes::UNCHANGED`] or [`outcomes::NOT_APPLICABLE`]
    pub outcome: &'static str,
    pub patches: Vec<PatchOp>,
    /// Running siblings whose usage sample was fetched
    pub siblings: usize,
}

impl Decision {
    fn not_applicable() -> Self {
        Self {
            outcome: outcomes::NOT_APPLICABLE,
            patches: Vec::new(),
            siblings: 0,
        }
    }

    /// Whether the Deployment was resolved and its siblings aggregated
    pub fn aggregated(&self) -> bool {
        self.outcome != outcomes::NOT_APPLICABLE
    }
}

/// Decides the resource patches for pods being created
pub struct AutofillEngine {
    cluster: Arc<dyn ClusterReader>,
    metrics_api: Arc<dyn MetricsReader>,
    config: EngineConfig,
    logger: StructuredLogger,
    metrics: WebhookMetrics,
}

impl AutofillEngine {
    pub fn new(
        cluster: Arc<dyn ClusterReader>,
        metrics_api: Arc<dyn MetricsReader>,
        config: EngineConfig,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            cluster,
            metrics_api,
            config,
            logger,
            metrics: WebhookMetrics::new(),
        }
    }

    /// Decide the patches for one pod creation
    ///
    /// Yields no patches when the pod is not managed by a Deployment. When the
    /// deadline elapses, outstanding lookups are dropped and the decision
    /// fails with [`DecisionError::Cancelled`].
    pub async fn decide(&self, admission: &PodAdmission) -> Result<Decision, DecisionError> {
        let start = Instant::now();
        self.logger
            .log_admission(&admission.uid, &admission.namespace, &admission.name);

        let timeout = self.config.decision_timeout;
        let result = match tokio::time::timeout(timeout, self.run(admission)).await {
            Ok(result) => result,
            Err(_) => Err(DecisionError::Cancelled(timeout)),
        };

        let elapsed = start.elapsed();
        self.metrics.observe_decision_latency(elapsed.as_secs_f64());

        match result {
            Ok(decision) => {
                self.metrics.inc_decision(decision.outcome);
                self.metrics.add_patches_emitted(decision.patches.len());
                self.logger.log_decision(
                    &admission.uid,
                    decision.outcome,
                    decision.patches.len(),
                    elapsed.as_millis(),
                );
                Ok(decision)
            }
            Err(e) => {
                self.metrics.inc_decision(outcomes::ERROR);
                self.metrics.inc_decision_error(e.kind());
                self.logger
                    .log_decision_failed(&admission.uid, e.kind(), &e.to_string());
                Err(e)
            }
        }
    }

    async fn run(&self, admission: &PodAdmission) -> Result<Decision, DecisionError> {
        let namespace = admission.namespace.as_str();

        let owner = resolver::resolve(self.cluster.as_ref(), &admission.pod, namespace).await?;
        let Some(owner) = owner else {
            debug!(
                namespace = %namespace,
                pod = %admission.name,
                "Pod is not managed by a Deployment"
            );
            return Ok(Decision::not_applicable());
        };
        self.logger
            .log_template_owner(namespace, &owner.name, &label_selector(&owner.pod_labels));

        let maxima = aggregator::aggregate(
            self.cluster.as_ref(),
            self.metrics_api.as_ref(),
            &owner.pod_labels,
            namespace,
            self.config.metrics_concurrency,
        )
        .await?;
        self.metrics.observe_siblings(maxima.samples());
        self.logger.log_usage_maxima(namespace, &owner.name, &maxima);

        let containers = admission
            .pod
            .spec
            .as_ref()
            .map(|spec| spec.containers.as_slice())
            .unwrap_or_default();

        let plans = plan(containers, &maxima)?;
        for container_plan in &plans {
            self.log_updates(namespace, container_plan);
        }

        let patches: Vec<PatchOp> = plans.iter().flat_map(ContainerPlan::patches).collect();
        for patch in &patches {
            debug!(path = %patch.path, value = %patch.value, "Emitting patch");
        }

        let outcome = if patches.is_empty() {
            outcomes::UNCHANGED
        } else {
            outcomes::PATCHED
        };
        Ok(Decision {
            outcome,
            patches,
            siblings: maxima.samples(),
        })
    }

    fn log_updates(&self, namespace: &str, container_plan: &ContainerPlan<'_>) {
        for decision in &container_plan.decisions {
            let (field, dimension, value) = match decision {
                FieldDecision::SetRequest(dimension, value) => ("requests", dimension, value),
                FieldDecision::SetLimit(dimension, value) => ("limits", dimension, value),
                _ => continue,
            };
            self.logger.log_resource_update(
                namespace,
                container_plan.name,
                field,
                dimension.key(),
                &value.to_string(),
            );
        }
    }
}

/// The decisions taken for one container
#[derive(Debug, Clone)]
pub struct ContainerPlan<'a> {
    /// Position in the pod spec's container list
    pub index: usize,
    pub name: &'a str,
    pub decisions: Vec<FieldDecision>,
}

impl ContainerPlan<'_> {
    pub fn patches(&self) -> Vec<PatchOp> {
        emit(self.index, &self.decisions)
    }
}

/// Decide the changes for every container, in declared order
///
/// All declared quantities are validated before any decision is taken, so an
/// error never comes with a partial plan.
pub fn plan<'a>(
    containers: &'a [Container],
    maxima: &UsageMaxima,
) -> Result<Vec<ContainerPlan<'a>>, DecisionError> {
    let declared = containers
        .iter()
        .map(DeclaredResources::from_container)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(containers
        .iter()
        .zip(&declared)
        .enumerate()
        .map(|(index, (container, declared))| ContainerPlan {
            index,
            name: &container.name,
            decisions: decide(declared, maxima.container(&container.name)),
        })
        .collect())
}

/// Decide and emit the patch list for a set of containers
pub fn plan_patches(
    containers: &[Container],
    maxima: &UsageMaxima,
) -> Result<Vec<PatchOp>, DecisionError> {
    Ok(plan(containers, maxima)?
        .iter()
        .flat_map(ContainerPlan::patches)
        .collect())
}
