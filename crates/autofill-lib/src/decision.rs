//! Per-container resource decisions
//!
//! Requests are filled or raised to the observed sibling maximum. Limits are
//! only ever raised, never invented: a declared limit that the observed
//! maximum exceeds is replaced by twice that maximum.

use crate::error::DecisionError;
use crate::models::{ContainerUsage, Dimension};
use crate::quantity::Quantity;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity as K8sQuantity;
use std::collections::BTreeMap;

/// A single field-level change to a container's resources
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldDecision {
    /// Replace `resources` with an empty object
    ClearResources,
    /// Replace `resources.requests` with an empty object
    ClearRequests,
    /// Replace `resources.limits` with an empty object
    ClearLimits,
    SetRequest(Dimension, Quantity),
    SetLimit(Dimension, Quantity),
}

/// A container's declared requests and limits, parsed for the tracked dimensions
#[derive(Debug, Clone, Default)]
pub struct DeclaredResources {
    /// Whether any request is declared, tracked or not
    pub has_requests: bool,
    /// Whether any limit is declared, tracked or not
    pub has_limits: bool,
    pub requests: ContainerUsage,
    pub limits: ContainerUsage,
}

impl DeclaredResources {
    pub fn from_container(container: &Container) -> Result<Self, DecisionError> {
        let resources = container.resources.as_ref();
        let requests = resources.and_then(|r| r.requests.as_ref());
        let limits = resources.and_then(|r| r.limits.as_ref());

        Ok(Self {
            has_requests: requests.is_some_and(|m| !m.is_empty()),
            has_limits: limits.is_some_and(|m| !m.is_empty()),
            requests: parse_tracked(requests, &container.name, "requests")?,
            limits: parse_tracked(limits, &container.name, "limits")?,
        })
    }
}

fn parse_tracked(
    map: Option<&BTreeMap<String, K8sQuantity>>,
    container: &str,
    field: &str,
) -> Result<ContainerUsage, DecisionError> {
    let mut parsed = ContainerUsage::new();
    for (key, raw) in map.into_iter().flatten() {
        if let Some(dimension) = Dimension::from_key(key) {
            let quantity = Quantity::try_from(raw).map_err(|e| {
                let location = format!("{}.{} of container {}", field, key, container);
                DecisionError::invalid_quantity(location, e)
            })?;
            parsed.insert(dimension, quantity);
        }
    }
    Ok(parsed)
}

/// Decide which resource fields of one container must be replaced
///
/// Clearing decisions come first (resources, requests, limits) so that the
/// objects targeted by later per-dimension replacements exist. Dimension
/// decisions follow in dimension order, request before limit.
pub fn decide(declared: &DeclaredResources, usage: Option<&ContainerUsage>) -> Vec<FieldDecision> {
    let mut decisions = Vec::new();

    if !declared.has_requests && !declared.has_limits {
        decisions.push(FieldDecision::ClearResources);
    }
    if !declared.has_requests {
        decisions.push(FieldDecision::ClearRequests);
    }
    if !declared.has_limits {
        decisions.push(FieldDecision::ClearLimits);
    }

    for (&dimension, &observed) in usage.into_iter().flatten() {
        let raise_request = match declared.requests.get(&dimension) {
            Some(request) => observed > *request,
            None => true,
        };
        if raise_request {
            decisions.push(FieldDecision::SetRequest(dimension, observed));
        }

        if let Some(limit) = declared.limits.get(&dimension) {
            if observed > *limit {
                decisions.push(FieldDecision::SetLimit(dimension, observed + observed));
            }
        }
    }

    decisions
}
