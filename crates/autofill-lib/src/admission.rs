//! `admission.k8s.io/v1` AdmissionReview envelope
//!
//! Only the fields the webhook reads or writes are modelled; unknown request
//! fields are ignored.

use crate::engine::PodAdmission;
use crate::error::DecisionError;
use crate::patch::PatchOp;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ADMISSION_API_VERSION: &str = "admission.k8s.io/v1";
pub const ADMISSION_REVIEW_KIND: &str = "AdmissionReview";
pub const JSON_PATCH_TYPE: &str = "JSONPatch";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    pub api_version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<AdmissionRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<AdmissionResponse>,
}

impl AdmissionReview {
    /// Wrap a response in a review of the same API version as the request
    pub fn respond(api_version: &str, response: AdmissionResponse) -> Self {
        Self {
            api_version: if api_version.is_empty() {
                ADMISSION_API_VERSION.to_string()
            } else {
                api_version.to_string()
            },
            kind: ADMISSION_REVIEW_KIND.to_string(),
            request: None,
            response: Some(response),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupVersionKind {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    pub uid: String,
    #[serde(default)]
    pub kind: GroupVersionKind,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
}

impl AdmissionRequest {
    /// Whether this request creates a core/v1 Pod
    pub fn is_pod_creation(&self) -> bool {
        self.kind.group.is_empty() && self.kind.kind == "Pod" && self.operation == "CREATE"
    }

    /// Decode the admitted object as a pod
    pub fn to_pod_admission(&self) -> Result<PodAdmission, DecisionError> {
        let object = self.object.clone().ok_or(DecisionError::MissingObject)?;
        let pod = serde_json::from_value(object)?;

        Ok(PodAdmission {
            uid: self.uid.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            pod,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ResponseStatus>,
    /// Base64-encoded JSON patch document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_type: Option<String>,
}

impl AdmissionResponse {
    pub fn allow(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            allowed: true,
            status: None,
            patch: None,
            patch_type: None,
        }
    }

    /// Allow with the given patches; an empty list carries no patch at all
    pub fn allow_with_patches(
        uid: impl Into<String>,
        patches: &[PatchOp],
    ) -> Result<Self, serde_json::Error> {
        let mut response = Self::allow(uid);
        if !patches.is_empty() {
            let document = serde_json::to_vec(patches)?;
            response.patch = Some(general_purpose::STANDARD.encode(document));
            response.patch_type = Some(JSON_PATCH_TYPE.to_string());
        }
        Ok(response)
    }

    /// Reject the request with a reason
    pub fn deny(uid: impl Into<String>, reason: impl Into<String>, code: u16) -> Self {
        Self {
            uid: uid.into(),
            allowed: false,
            status: Some(ResponseStatus {
                code: Some(code),
                message: reason.into(),
            }),
            patch: None,
            patch_type: None,
        }
    }

    /// Decode the patch document carried by this response
    pub fn patches(&self) -> anyhow::Result<Vec<PatchOp>> {
        match &self.patch {
            Some(encoded) => {
                let document = general_purpose::STANDARD.decode(encoded)?;
                Ok(serde_json::from_slice(&document)?)
            }
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn review_json(object: Value) -> Value {
        json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "kind": {"group": "", "version": "v1", "kind": "Pod"},
                "resource": {"group": "", "version": "v1", "resource": "pods"},
                "namespace": "default",
                "operation": "CREATE",
                "userInfo": {"username": "system:serviceaccount:kube-system:replicaset-controller"},
                "object": object,
                "dryRun": false
            }
        })
    }

    #[test]
    fn test_decode_pod_creation() {
        let review: AdmissionReview = serde_json::from_value(review_json(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "generateName": "web-6d4f-",
                "ownerReferences": [{
                    "apiVersion": "apps/v1",
                    "kind": "ReplicaSet",
                    "name": "web-6d4f",
                    "uid": "3c0d6c8e-1111-2222-3333-444455556666"
                }]
            },
            "spec": {"containers": [{"name": "app", "image": "nginx:1.25"}]}
        })))
        .unwrap();

        let request = review.request.unwrap();
        assert!(request.is_pod_creation());

        let admission = request.to_pod_admission().unwrap();
        assert_eq!(admission.namespace, "default");
        assert_eq!(admission.name, "");
        assert_eq!(admission.pod.spec.unwrap().containers[0].name, "app");
    }

    #[test]
    fn test_decode_failure() {
        let object = json!({"spec": {"containers": "not-a-list"}});
        let review: AdmissionReview = serde_json::from_value(review_json(object)).unwrap();
        let err = review.request.unwrap().to_pod_admission().unwrap_err();

        assert!(matches!(err, DecisionError::Decode(_)));
    }

    #[test]
    fn test_non_pod_requests_are_not_pod_creations() {
        let mut request: AdmissionRequest = serde_json::from_value(json!({
            "uid": "1",
            "kind": {"group": "apps", "version": "v1", "kind": "Deployment"},
            "operation": "CREATE"
        }))
        .unwrap();
        assert!(!request.is_pod_creation());

        request.kind = GroupVersionKind {
            group: String::new(),
            version: "v1".to_string(),
            kind: "Pod".to_string(),
        };
        request.operation = "UPDATE".to_string();
        assert!(!request.is_pod_creation());
        assert!(matches!(request.to_pod_admission(), Err(DecisionError::MissingObject)));
    }

    #[test]
    fn test_patched_response_shape() {
        let patches = vec![PatchOp::replace(
            "/spec/containers/0/resources".to_string(),
            json!({}),
        )];
        let response = AdmissionResponse::allow_with_patches("abc", &patches).unwrap();
        let review = AdmissionReview::respond("admission.k8s.io/v1", response.clone());
        let review = serde_json::to_value(review).unwrap();

        assert_eq!(review["kind"], "AdmissionReview");
        assert_eq!(review["response"]["uid"], "abc");
        assert_eq!(review["response"]["allowed"], true);
        assert_eq!(review["response"]["patchType"], "JSONPatch");
        assert!(review.get("request").is_none());
        assert_eq!(response.patches().unwrap(), patches);
    }

    #[test]
    fn test_empty_patch_list_omits_patch() {
        let response = AdmissionResponse::allow_with_patches("abc", &[]).unwrap();
        let value = serde_json::to_value(&response).unwrap();

        assert!(value.get("patch").is_none());
        assert!(value.get("patchType").is_none());
    }

    #[test]
    fn test_denied_response() {
        let response =
            AdmissionResponse::deny("abc", "failed to look up ReplicaSet default/web", 500);
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["allowed"], false);
        assert_eq!(value["status"]["code"], 500);
        assert_eq!(value["status"]["message"], "failed to look up ReplicaSet default/web");
    }
}
