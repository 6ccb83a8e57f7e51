//! Integration tests for the webhook API endpoints

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use autofill_lib::{
    api::{create_router, AppState},
    health::{components, ComponentStatus, HealthRegistry},
    AdmissionResponse, AutofillEngine, ClusterReader, EngineConfig, MetricsReader, PodMetrics,
    StructuredLogger, WebhookMetrics,
};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::Pod;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

/// Serves the `web` Deployment with two running siblings
struct StaticCluster {
    metrics_down: AtomicBool,
}

impl StaticCluster {
    fn new(metrics_down: bool) -> Self {
        Self {
            metrics_down: AtomicBool::new(metrics_down),
        }
    }
}

#[async_trait]
impl ClusterReader for StaticCluster {
    async fn replica_set(&self, namespace: &str, name: &str) -> Result<ReplicaSet> {
        if name != "web-6d4f" {
            return Err(anyhow!("replicasets.apps \"{}\" not found", name));
        }
        Ok(serde_json::from_value(json!({
            "metadata": {
                "name": name,
                "namespace": namespace,
                "ownerReferences": [{"apiVersion": "apps/v1", "kind": "Deployment", "name": "web", "uid": "d-1"}]
            }
        }))?)
    }

    async fn deployment(&self, namespace: &str, name: &str) -> Result<Deployment> {
        Ok(serde_json::from_value(json!({
            "metadata": {"name": name, "namespace": namespace},
            "spec": {
                "selector": {"matchLabels": {"app": "web"}},
                "template": {"metadata": {"labels": {"app": "web"}}}
            }
        }))?)
    }

    async fn running_pods(&self, namespace: &str, _label_selector: &str) -> Result<Vec<Pod>> {
        ["web-6d4f-a", "web-6d4f-b"]
            .iter()
            .map(|name| {
                serde_json::from_value(json!({"metadata": {"name": name, "namespace": namespace}}))
                    .map_err(Into::into)
            })
            .collect()
    }
}

#[async_trait]
impl MetricsReader for StaticCluster {
    async fn pod_metrics(&self, namespace: &str, name: &str) -> Result<PodMetrics> {
        if self.metrics_down.load(Ordering::SeqCst) {
            return Err(anyhow!("the server is currently unable to handle the request"));
        }
        let cpu = if name == "web-6d4f-a" { "120m" } else { "250m" };
        Ok(serde_json::from_value(json!({
            "metadata": {"name": name, "namespace": namespace},
            "timestamp": "2024-01-01T00:00:00Z",
            "window": "15s",
            "containers": [{"name": "app", "usage": {"cpu": cpu, "memory": "300Mi"}}]
        }))?)
    }
}

async fn setup_test_app(metrics_down: bool) -> (Router, Arc<AppState>) {
    setup_with_cluster(Arc::new(StaticCluster::new(metrics_down))).await
}

async fn setup_with_cluster(cluster: Arc<StaticCluster>) -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::ADMISSION_SERVER).await;
    health_registry.register(components::CLUSTER_API).await;
    health_registry.register(components::METRICS_API).await;

    let engine = AutofillEngine::new(
        cluster.clone(),
        cluster,
        EngineConfig::default(),
        StructuredLogger::new("test"),
    );

    let metrics = WebhookMetrics::new();
    let state = Arc::new(AppState::new(Arc::new(engine), health_registry, metrics));
    let router = create_router(state.clone());

    (router, state)
}

fn review(kind: &str, operation: &str, object: Value) -> Value {
    json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
            "kind": {"group": "", "version": "v1", "kind": kind},
            "resource": {"group": "", "version": "v1", "resource": "pods"},
            "namespace": "default",
            "operation": operation,
            "object": object
        }
    })
}

fn web_pod() -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "generateName": "web-6d4f-",
            "ownerReferences": [{"apiVersion": "apps/v1", "kind": "ReplicaSet", "name": "web-6d4f", "uid": "rs-1"}]
        },
        "spec": {"containers": [{"name": "app", "image": "nginx:1.25"}]}
    })
}

fn standalone_pod() -> Value {
    json!({
        "metadata": {"name": "standalone"},
        "spec": {"containers": [{"name": "app"}]}
    })
}

async fn send(app: Router, method: &str, uri: &str, body: Body) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(body)
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn mutate(app: Router, review: Value) -> (StatusCode, Value) {
    let (status, body) = send(app, "POST", "/mutate", Body::from(review.to_string())).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_mutate_returns_patches_for_managed_pod() {
    let (app, _state) = setup_test_app(false).await;

    let (status, body) = mutate(app, review("Pod", "CREATE", web_pod())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["apiVersion"], "admission.k8s.io/v1");
    assert_eq!(body["kind"], "AdmissionReview");
    assert_eq!(body["response"]["uid"], "705ab4f5-6393-11e8-b7cc-42010a800002");
    assert_eq!(body["response"]["allowed"], true);
    assert_eq!(body["response"]["patchType"], "JSONPatch");

    let response: AdmissionResponse = serde_json::from_value(body["response"].clone()).unwrap();
    let patches = serde_json::to_value(response.patches().unwrap()).unwrap();
    assert_eq!(
        patches,
        json!([
            {"op": "replace", "path": "/spec/containers/0/resources", "value": {}},
            {"op": "replace", "path": "/spec/containers/0/resources/requests", "value": {}},
            {"op": "replace", "path": "/spec/containers/0/resources/limits", "value": {}},
            {"op": "replace", "path": "/spec/containers/0/resources/requests/cpu", "value": "250m"},
            {"op": "replace", "path": "/spec/containers/0/resources/requests/memory", "value": "300Mi"}
        ])
    );
}

#[tokio::test]
async fn test_mutate_allows_unowned_pod_without_patch() {
    let (app, _state) = setup_test_app(false).await;

    let (status, body) = mutate(app, review("Pod", "CREATE", standalone_pod())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"]["allowed"], true);
    assert!(body["response"].get("patch").is_none());
    assert!(body["response"].get("patchType").is_none());
}

#[tokio::test]
async fn test_mutate_skips_non_creations() {
    let (app, _state) = setup_test_app(true).await;

    let (status, body) = mutate(app, review("Pod", "UPDATE", web_pod())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"]["allowed"], true);
    assert!(body["response"].get("patch").is_none());
}

#[tokio::test]
async fn test_mutate_rejects_on_lookup_failure() {
    let (app, state) = setup_test_app(true).await;

    let (status, body) = mutate(app, review("Pod", "CREATE", web_pod())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"]["allowed"], false);
    assert_eq!(body["response"]["status"]["code"], 500);
    assert!(body["response"]["status"]["message"]
        .as_str()
        .unwrap()
        .contains("PodMetrics default/web-6d4f-a"));
    assert!(body["response"].get("patch").is_none());

    let health = state.health_registry.health().await;
    assert_eq!(health.status, ComponentStatus::Degraded);
    assert_eq!(
        health.components[components::METRICS_API].status,
        ComponentStatus::Degraded
    );
}

#[tokio::test]
async fn test_metrics_api_recovers_after_successful_decision() {
    let cluster = Arc::new(StaticCluster::new(true));
    let (app, state) = setup_with_cluster(cluster.clone()).await;

    let (_status, body) = mutate(app.clone(), review("Pod", "CREATE", web_pod())).await;
    assert_eq!(body["response"]["allowed"], false);
    assert_eq!(
        state.health_registry.health().await.components[components::METRICS_API].status,
        ComponentStatus::Degraded
    );

    cluster.metrics_down.store(false, Ordering::SeqCst);
    let (_status, body) = mutate(app, review("Pod", "CREATE", web_pod())).await;
    assert_eq!(body["response"]["allowed"], true);
    assert!(body["response"]["patch"].is_string());

    let health = state.health_registry.health().await;
    assert_eq!(health.status, ComponentStatus::Healthy);
    assert_eq!(health.components[components::METRICS_API].status, ComponentStatus::Healthy);
    assert_eq!(health.components[components::CLUSTER_API].status, ComponentStatus::Healthy);
}

#[tokio::test]
async fn test_unowned_pod_leaves_lookup_health_untouched() {
    let (app, state) = setup_test_app(false).await;
    state
        .health_registry
        .set_degraded(components::CLUSTER_API, "ReplicaSet lookup failed")
        .await;

    let (_status, body) = mutate(app, review("Pod", "CREATE", standalone_pod())).await;
    assert_eq!(body["response"]["allowed"], true);

    let health = state.health_registry.health().await;
    assert_eq!(health.components[components::CLUSTER_API].status, ComponentStatus::Degraded);
}

#[tokio::test]
async fn test_mutate_rejects_undecodable_pod() {
    let (app, _state) = setup_test_app(false).await;
    let pod = json!({"spec": {"containers": "app"}});

    let (status, body) = mutate(app, review("Pod", "CREATE", pod)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"]["allowed"], false);
    assert_eq!(body["response"]["status"]["code"], 500);
}

#[tokio::test]
async fn test_mutate_without_request_is_bad_request() {
    let (app, _state) = setup_test_app(false).await;
    let review = json!({"apiVersion": "admission.k8s.io/v1", "kind": "AdmissionReview"});

    let (status, _body) = send(app, "POST", "/mutate", Body::from(review.to_string())).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state) = setup_test_app(false).await;
    state
        .health_registry
        .set_degraded(components::CLUSTER_API, "ReplicaSet lookup failed")
        .await;

    let (status, body) = send(app, "GET", "/healthz", Body::empty()).await;
    let health: Value = serde_json::from_slice(&body).unwrap();

    // Degraded still returns 200 (still admitting)
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state) = setup_test_app(false).await;
    state
        .health_registry
        .set_unhealthy(components::ADMISSION_SERVER, "Listener closed")
        .await;

    let (status, body) = send(app, "GET", "/healthz", Body::empty()).await;
    let health: Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_follows_initialization() {
    let (app, state) = setup_test_app(false).await;

    let (status, body) = send(app.clone(), "GET", "/readyz", Body::empty()).await;
    let readiness: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);

    state.health_registry.set_ready(true).await;

    let (status, body) = send(app, "GET", "/readyz", Body::empty()).await;
    let readiness: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);
    assert!(readiness.get("reason").is_none());
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_decisions() {
    let (app, _state) = setup_test_app(false).await;

    let (_status, _body) = mutate(app.clone(), review("Pod", "DELETE", web_pod())).await;
    let (status, body) = send(app, "GET", "/metrics", Body::empty()).await;
    let text = String::from_utf8(body).unwrap();

    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("resource_autofill_decisions_total"));
}
