//! JSON patch emission
//!
//! Every field decision becomes one `replace` operation addressed by the
//! container's position in the pod spec.

use crate::decision::FieldDecision;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOperation {
    Replace,
}

/// One JSON patch operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOp {
    pub op: PatchOperation,
    pub path: String,
    pub value: Value,
}

impl PatchOp {
    pub fn replace(path: String, value: Value) -> Self {
        Self {
            op: PatchOperation::Replace,
            path,
            value,
        }
    }
}

/// Translate one container's decisions into patch operations, preserving order
pub fn emit(container_index: usize, decisions: &[FieldDecision]) -> Vec<PatchOp> {
    let resources = format!("/spec/containers/{}/resources", container_index);

    decisions
        .iter()
        .map(|decision| match decision {
            FieldDecision::ClearResources => PatchOp::replace(resources.clone(), json!({})),
            FieldDecision::ClearRequests => {
                PatchOp::replace(format!("{}/requests", resources), json!({}))
            }
            FieldDecision::ClearLimits => {
                PatchOp::replace(format!("{}/limits", resources), json!({}))
            }
            FieldDecision::SetRequest(dimension, value) => PatchOp::replace(
                format!("{}/requests/{}", resources, dimension.key()),
                Value::String(value.to_string()),
            ),
            FieldDecision::SetLimit(dimension, value) => PatchOp::replace(
                format!("{}/limits/{}", resources, dimension.key()),
                Value::String(value.to_string()),
            ),
        })
        .collect()
}
