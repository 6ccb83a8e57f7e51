//! HTTP API: admission endpoint, health checks and Prometheus metrics

use crate::admission::{AdmissionResponse, AdmissionReview};
use crate::engine::{AutofillEngine, Decision};
use crate::error::DecisionError;
use crate::health::{components, ComponentStatus, HealthRegistry};
use crate::models::PodMetrics;
use crate::observability::{outcomes, WebhookMetrics};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use k8s_openapi::Resource;
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AutofillEngine>,
    pub health_registry: HealthRegistry,
    pub metrics: WebhookMetrics,
}

impl AppState {
    pub fn new(
        engine: Arc<AutofillEngine>,
        health_registry: HealthRegistry,
        metrics: WebhookMetrics,
    ) -> Self {
        Self {
            engine,
            health_registry,
            metrics,
        }
    }
}

/// Admission endpoint - always answers 200 with an AdmissionReview unless the
/// review carries no request
async fn mutate(
    State(state): State<Arc<AppState>>,
    Json(review): Json<AdmissionReview>,
) -> Response {
    let Some(request) = review.request else {
        warn!("AdmissionReview without request");
        return (StatusCode::BAD_REQUEST, "AdmissionReview carries no request").into_response();
    };

    if !request.is_pod_creation() {
        debug!(
            uid = %request.uid,
            kind = %request.kind.kind,
            operation = %request.operation,
            "Skipping non pod creation"
        );
        state.metrics.inc_decision(outcomes::SKIPPED);
        let response = AdmissionResponse::allow(&request.uid);
        return Json(AdmissionReview::respond(&review.api_version, response)).into_response();
    }

    let decided = match request.to_pod_admission() {
        Ok(admission) => state.engine.decide(&admission).await,
        Err(e) => {
            state.metrics.inc_decision(outcomes::ERROR);
            state.metrics.inc_decision_error(e.kind());
            Err(e)
        }
    };

    let response = match decided {
        Ok(decision) => {
            mark_recovered(&state.health_registry, &decision).await;
            AdmissionResponse::allow_with_patches(&request.uid, &decision.patches).unwrap_or_else(
                |e| {
                    warn!(uid = %request.uid, error = %e, "Failed to encode patch");
                    let reason = format!("failed to encode patch: {e}");
                    AdmissionResponse::deny(&request.uid, reason, 500)
                },
            )
        }
        Err(e) => {
            mark_degraded(&state.health_registry, &e).await;
            AdmissionResponse::deny(&request.uid, e.to_string(), 500)
        }
    };

    Json(AdmissionReview::respond(&review.api_version, response)).into_response()
}

/// Clear degraded lookup paths once a decision has gone through them
async fn mark_recovered(registry: &HealthRegistry, decision: &Decision) {
    if !decision.aggregated() {
        return;
    }
    registry.set_healthy(components::CLUSTER_API).await;
    if decision.siblings > 0 {
        registry.set_healthy(components::METRICS_API).await;
    }
}

async fn mark_degraded(registry: &HealthRegistry, error: &DecisionError) {
    if let DecisionError::Lookup { target, .. } = error {
        let component = if target.starts_with(PodMetrics::KIND) {
            components::METRICS_API
        } else {
            components::CLUSTER_API
        };
        registry.set_degraded(component, error.to_string()).await;
    }
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still admitting
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/mutate", post(mutate))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting admission server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
