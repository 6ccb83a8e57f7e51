//! Resource autofill library
//!
//! This crate provides the core functionality for:
//! - Resolving a pod's Deployment through its ReplicaSet
//! - Aggregating the peak usage of running siblings
//! - Deciding container requests and limits from that usage
//! - Emitting JSON patches and serving them as a mutating admission webhook
//! - Health checks and observability

pub mod admission;
pub mod aggregator;
pub mod api;
pub mod cluster;
pub mod decision;
pub mod engine;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod patch;
pub mod quantity;
pub mod resolver;

pub use admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
pub use cluster::{ClusterReader, KubeCluster, MetricsReader};
pub use engine::{AutofillEngine, Decision, EngineConfig, PodAdmission};
pub use error::DecisionError;
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{StructuredLogger, WebhookMetrics};
pub use patch::PatchOp;
pub use quantity::{Quantity, QuantityError, QuantityFormat};
