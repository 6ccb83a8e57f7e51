//! Webhook configuration

use anyhow::{Context, Result};
use autofill_lib::EngineConfig;
use serde::Deserialize;
use std::time::Duration;

/// Environment variable naming an optional configuration file
const CONFIG_FILE_ENV: &str = "AUTOFILL_CONFIG_FILE";

/// Webhook configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Instance name from Kubernetes downward API
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// Port serving the admission, health and metrics endpoints
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Deadline for a single admission decision in seconds
    #[serde(default = "default_decision_timeout")]
    pub decision_timeout_secs: u64,

    /// Sibling metrics fetches in flight per decision
    #[serde(default = "default_metrics_concurrency")]
    pub metrics_concurrency: usize,
}

fn default_instance_name() -> String {
    std::env::var("POD_NAME").unwrap_or_else(|_| "resource-autofill".to_string())
}

fn default_listen_port() -> u16 {
    8443
}

fn default_decision_timeout() -> u64 {
    10
}

fn default_metrics_concurrency() -> usize {
    1
}

impl WebhookConfig {
    /// Load configuration from an optional config file and the environment
    ///
    /// Environment variables (`AUTOFILL_*`) take precedence over the file.
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            builder = builder.add_source(config::File::with_name(&path));
        }

        let config = builder
            .add_source(config::Environment::with_prefix("AUTOFILL"))
            .build()
            .context("Failed to read webhook configuration")?;

        config
            .try_deserialize()
            .context("Invalid webhook configuration")
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            decision_timeout: Duration::from_secs(self.decision_timeout_secs),
            metrics_concurrency: self.metrics_concurrency.max(1),
        }
    }
}
