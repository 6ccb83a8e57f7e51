//! Resource Autofill - mutating admission webhook
//!
//! Fills in or raises container requests and limits of pods created by a
//! Deployment, based on the peak usage of their running siblings.

use anyhow::{Context, Result};
use autofill_lib::{
    api::{self, AppState},
    health::{components, HealthRegistry},
    AutofillEngine, KubeCluster, StructuredLogger, WebhookMetrics,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const WEBHOOK_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting resource-autofill");

    let config = config::WebhookConfig::load()?;
    info!(
        instance = %config.instance_name,
        port = config.listen_port,
        decision_timeout_secs = config.decision_timeout_secs,
        metrics_concurrency = config.metrics_concurrency,
        "Webhook configured"
    );

    // In-cluster service account, falling back to the local kubeconfig
    let cluster = Arc::new(
        KubeCluster::try_default()
            .await
            .context("Failed to create Kubernetes client")?,
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::ADMISSION_SERVER).await;
    health_registry.register(components::CLUSTER_API).await;
    health_registry.register(components::METRICS_API).await;

    let metrics = WebhookMetrics::new();
    let logger = StructuredLogger::new(&config.instance_name);

    let engine = AutofillEngine::new(
        cluster.clone(),
        cluster,
        config.engine_config(),
        logger.clone(),
    );

    let app_state = Arc::new(AppState::new(Arc::new(engine), health_registry.clone(), metrics));

    health_registry.set_ready(true).await;
    logger.log_startup(WEBHOOK_VERSION, config.listen_port);

    let mut server = tokio::spawn(api::serve(config.listen_port, app_state));

    tokio::select! {
        result = &mut server => {
            let reason = match result {
                Ok(Ok(())) => "admission server stopped".to_string(),
                Ok(Err(e)) => format!("admission server failed: {e:#}"),
                Err(e) => format!("admission server task failed: {e}"),
            };
            error!(reason = %reason, "Admission server exited");
            health_registry
                .set_unhealthy(components::ADMISSION_SERVER, reason.as_str())
                .await;
            logger.log_shutdown(&reason);
            anyhow::bail!(reason);
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            logger.log_shutdown("SIGINT received");
        }
    }

    health_registry.set_ready(false).await;
    server.abort();
    info!("Shutting down");

    Ok(())
}
