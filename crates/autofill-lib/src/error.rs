//! Errors that terminate an admission decision

use crate::quantity::QuantityError;
use std::time::Duration;
use thiserror::Error;

/// A decision either completes with a (possibly empty) patch list or fails
/// with one of these; no partial patch list is ever returned.
#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("failed to look up {target}: {source:#}")]
    Lookup {
        target: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("admission request carries no object")]
    MissingObject,

    #[error("failed to decode admission object as a pod: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid quantity in {field}: {source}")]
    InvalidQuantity {
        field: String,
        #[source]
        source: QuantityError,
    },

    #[error("decision cancelled after {0:?}")]
    Cancelled(Duration),
}

impl DecisionError {
    pub fn lookup(target: impl Into<String>, source: anyhow::Error) -> Self {
        DecisionError::Lookup {
            target: target.into(),
            source,
        }
    }

    pub fn invalid_quantity(field: impl Into<String>, source: QuantityError) -> Self {
        DecisionError::InvalidQuantity {
            field: field.into(),
            source,
        }
    }

    /// Short label used for metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            DecisionError::Lookup { .. } => "lookup",
            DecisionError::MissingObject
            | DecisionError::Decode(_)
            | DecisionError::InvalidQuantity { .. } => "decode",
            DecisionError::Cancelled(_) => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_error_message_includes_cause() {
        let err = DecisionError::lookup(
            "ReplicaSet default/web-6d4f",
            anyhow::anyhow!("replicasets.apps \"web-6d4f\" not found"),
        );
        let message = err.to_string();
        assert!(message.contains("ReplicaSet default/web-6d4f"));
        assert!(message.contains("not found"));
        assert_eq!(err.kind(), "lookup");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(DecisionError::MissingObject.kind(), "decode");
        assert_eq!(
            DecisionError::invalid_quantity("limits.cpu of app", QuantityError::Empty).kind(),
            "decode"
        );
        assert_eq!(
            DecisionError::Cancelled(Duration::from_secs(10)).kind(),
            "cancelled"
        );
    }
}
