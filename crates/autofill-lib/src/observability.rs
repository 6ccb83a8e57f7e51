//! Observability infrastructure for the admission webhook
//!
//! Provides:
//! - Prometheus metrics (decision latency, outcomes, emitted patches, sibling counts)
//! - Structured JSON logging with tracing

use crate::models::UsageMaxima;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for decision latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Histogram buckets for the number of siblings inspected per decision
const SIBLING_BUCKETS: &[f64] = &[0.0, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 250.0, 500.0];

/// Decision outcome labels
pub mod outcomes {
    /// At least one patch was emitted
    pub const PATCHED: &str = "patched";
    /// Owner resolved and usage aggregated, but nothing to change
    pub const UNCHANGED: &str = "unchanged";
    /// The pod is not managed by a Deployment
    pub const NOT_APPLICABLE: &str = "not_applicable";
    /// Not a pod creation
    pub const SKIPPED: &str = "skipped";
    pub const ERROR: &str = "error";
}

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<WebhookMetricsInner> = OnceLock::new();

struct WebhookMetricsInner {
    decision_latency_seconds: Histogram,
    decisions: IntCounterVec,
    decision_errors: IntCounterVec,
    patches_emitted: IntCounter,
    siblings_inspected: Histogram,
}

impl WebhookMetricsInner {
    fn new() -> Self {
        Self {
            decision_latency_seconds: register_histogram!(
                "resource_autofill_decision_latency_seconds",
                "Time spent deciding resource patches for one admission request",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register decision_latency_seconds"),

            decisions: register_int_counter_vec!(
                "resource_autofill_decisions_total",
                "Admission decisions by outcome",
                &["outcome"]
            )
            .expect("Failed to register decisions_total"),

            decision_errors: register_int_counter_vec!(
                "resource_autofill_decision_errors_total",
                "Failed admission decisions by error kind",
                &["kind"]
            )
            .expect("Failed to register decision_errors_total"),

            patches_emitted: register_int_counter!(
                "resource_autofill_patches_emitted_total",
                "Total number of JSON patch operations emitted"
            )
            .expect("Failed to register patches_emitted_total"),

            siblings_inspected: register_histogram!(
                "resource_autofill_siblings_inspected",
                "Number of running siblings whose usage was aggregated per decision",
                SIBLING_BUCKETS.to_vec()
            )
            .expect("Failed to register siblings_inspected"),
        }
    }
}

/// Webhook metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance; clones share the same
/// underlying metrics.
#[derive(Clone)]
pub struct WebhookMetrics {
    _private: (),
}

impl Default for WebhookMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(WebhookMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &WebhookMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_decision_latency(&self, duration_secs: f64) {
        self.inner().decision_latency_seconds.observe(duration_secs);
    }

    pub fn inc_decision(&self, outcome: &str) {
        self.inner().decisions.with_label_values(&[outcome]).inc();
    }

    pub fn inc_decision_error(&self, kind: &str) {
        self.inner().decision_errors.with_label_values(&[kind]).inc();
    }

    pub fn add_patches_emitted(&self, count: usize) {
        self.inner().patches_emitted.inc_by(count as u64);
    }

    pub fn observe_siblings(&self, count: usize) {
        self.inner().siblings_inspected.observe(count as f64);
    }
}

/// Structured logger for admission events
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    /// Log an incoming pod creation
    pub fn log_admission(&self, uid: &str, namespace: &str, name: &str) {
        info!(
            event = "admission_received",
            instance = %self.instance,
            uid = %uid,
            namespace = %namespace,
            pod_name = %name,
            "Try to create pod"
        );
    }

    /// Log the Deployment whose template selects the siblings
    pub fn log_template_owner(&self, namespace: &str, deployment: &str, selector: &str) {
        info!(
            event = "template_owner_resolved",
            instance = %self.instance,
            namespace = %namespace,
            deployment = %deployment,
            selector = %selector,
            "Resolved template owner"
        );
    }

    /// Log the aggregated usage maxima, one line per container and dimension
    pub fn log_usage_maxima(&self, namespace: &str, deployment: &str, maxima: &UsageMaxima) {
        for (container, usage) in maxima.iter() {
            for (dimension, quantity) in usage {
                info!(
                    event = "usage_maximum",
                    instance = %self.instance,
                    namespace = %namespace,
                    deployment = %deployment,
                    container = %container,
                    dimension = %dimension,
                    quantity = %quantity,
                    siblings = maxima.samples(),
                    "Known max usage"
                );
            }
        }
    }

    /// Log a raised or filled request/limit
    pub fn log_resource_update(
        &self,
        namespace: &str,
        container: &str,
        field: &str,
        dimension: &str,
        value: &str,
    ) {
        info!(
            event = "resource_updated",
            instance = %self.instance,
            namespace = %namespace,
            container = %container,
            field = %field,
            dimension = %dimension,
            value = %value,
            "Resource {} updated",
            field
        );
    }

    /// Log a completed decision
    pub fn log_decision(&self, uid: &str, outcome: &str, patches: usize, elapsed_ms: u128) {
        info!(
            event = "decision_completed",
            instance = %self.instance,
            uid = %uid,
            outcome = %outcome,
            patches = patches,
            elapsed_ms = elapsed_ms,
            "Admission decision completed"
        );
    }

    /// Log a failed decision
    pub fn log_decision_failed(&self, uid: &str, kind: &str, error: &str) {
        warn!(
            event = "decision_failed",
            instance = %self.instance,
            uid = %uid,
            kind = %kind,
            error = %error,
            "Admission decision failed"
        );
    }

    /// Log webhook startup
    pub fn log_startup(&self, version: &str, port: u16) {
        info!(
            event = "webhook_started",
            instance = %self.instance,
            version = %version,
            port = port,
            "Resource autofill webhook started"
        );
    }

    /// Log webhook shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "webhook_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Resource autofill webhook shutting down"
        );
    }
}
