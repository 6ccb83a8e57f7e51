//! Core data models for the admission decision

use crate::quantity::Quantity;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity as K8sQuantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// A tracked resource axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Dimension {
    Cpu,
    Memory,
}

impl Dimension {
    /// Tracked dimensions in patch order
    pub const ALL: [Dimension; 2] = [Dimension::Cpu, Dimension::Memory];

    /// Key used in resource maps and patch paths
    pub fn key(&self) -> &'static str {
        match self {
            Dimension::Cpu => "cpu",
            Dimension::Memory => "memory",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.key() == key)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Per-dimension quantities for one container
pub type ContainerUsage = BTreeMap<Dimension, Quantity>;

/// The controller owning the pod template that defines the sibling set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateOwner {
    pub name: String,
    pub namespace: String,
    pub pod_labels: BTreeMap<String, String>,
}

/// Maximum observed usage per container name and dimension
///
/// Built fresh for every decision. A dimension that was never observed for a
/// container has no entry at all.
#[derive(Debug, Clone, Default)]
pub struct UsageMaxima {
    containers: HashMap<String, ContainerUsage>,
    samples: usize,
}

impl UsageMaxima {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observation, keeping it only if it exceeds the current maximum
    pub fn observe(&mut self, container: &str, dimension: Dimension, usage: Quantity) {
        let usage_by_dimension = self.containers.entry(container.to_string()).or_default();
        match usage_by_dimension.get(&dimension) {
            Some(current) if *current >= usage => {}
            _ => {
                usage_by_dimension.insert(dimension, usage);
            }
        }
    }

    /// Count one aggregated sibling sample
    pub fn add_sample(&mut self) {
        self.samples += 1;
    }

    /// Number of sibling samples folded into these maxima
    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn container(&self, name: &str) -> Option<&ContainerUsage> {
        self.containers.get(name)
    }

    pub fn get(&self, container: &str, dimension: Dimension) -> Option<&Quantity> {
        self.containers.get(container)?.get(&dimension)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ContainerUsage)> {
        self.containers.iter()
    }
}

/// Latest usage sample for one pod, served by `metrics.k8s.io/v1beta1`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodMetrics {
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<String>,
    #[serde(default)]
    pub containers: Vec<ContainerMetrics>,
}

/// Usage of one container inside a [`PodMetrics`] sample
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerMetrics {
    pub name: String,
    #[serde(default)]
    pub usage: BTreeMap<String, K8sQuantity>,
}

impl k8s_openapi::Resource for PodMetrics {
    type Scope = k8s_openapi::NamespaceResourceScope;

    const API_VERSION: &'static str = "metrics.k8s.io/v1beta1";
    const GROUP: &'static str = "metrics.k8s.io";
    const KIND: &'static str = "PodMetrics";
    const URL_PATH_SEGMENT: &'static str = "pods";
    const VERSION: &'static str = "v1beta1";
}

impl k8s_openapi::Metadata for PodMetrics {
    type Ty = ObjectMeta;

    fn metadata(&self) -> &Self::Ty {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Self::Ty {
        &mut self.metadata
    }
}
