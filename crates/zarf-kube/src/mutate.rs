//! Pod admission mutator
//!
//! The in-cluster agent serves a mutating admission webhook on Pod CREATE
//! that rewrites image references onto the in-cluster registry. The wire
//! contract is `admission.k8s.io/v1` AdmissionReview with a base64 JSON
//! Patch response in a fixed operation order: imagePullSecrets,
//! initContainers, ephemeralContainers, containers, then the patched label.
//! A pod that already carries the label gets an empty patch, which makes the
//! hook idempotent.

use base64::Engine;
use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{KubeError, Result};

/// Label marking a pod as already mutated
pub const PATCHED_LABEL: &str = "zarf-agent";
pub const PATCHED_VALUE: &str = "patched";

/// Name of the registry pull secret injected into every pod
pub const IMAGE_PULL_SECRET: &str = "private-registry";

/// One JSON Patch operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op: String,
    pub path: String,
    pub value: Value,
}

impl PatchOperation {
    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: "replace".into(),
            path: path.into(),
            value,
        }
    }

    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: "add".into(),
            path: path.into(),
            value,
        }
    }
}

/// AdmissionReview envelope (request and response share the shape)
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

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub operation: String,
    pub object: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    /// base64-encoded JSON Patch array
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_type: Option<String>,
}

/// Compute the fixed-order patch list for a pod. Already-patched pods get an
/// empty list.
pub fn mutate_pod(pod: &Pod, registry: &str) -> Result<Vec<PatchOperation>> {
    let labels = pod.metadata.labels.as_ref();
    if labels
        .and_then(|l| l.get(PATCHED_LABEL))
        .map(String::as_str)
        == Some(PATCHED_VALUE)
    {
        return Ok(Vec::new());
    }

    let mut patches = vec![PatchOperation::replace(
        "/spec/imagePullSecrets",
        json!([{ "name": IMAGE_PULL_SECRET }]),
    )];

    let spec = pod.spec.as_ref();
    if let Some(init) = spec.and_then(|s| s.init_containers.as_ref()) {
        for (i, container) in init.iter().enumerate() {
            if let Some(image) = &container.image {
                patches.push(PatchOperation::replace(
                    format!("/spec/initContainers/{i}/image"),
                    Value::String(zarf_core::mutate_reference(registry, image)?),
                ));
            }
        }
    }
    if let Some(ephemeral) = spec.and_then(|s| s.ephemeral_containers.as_ref()) {
        for (i, container) in ephemeral.iter().enumerate() {
            if let Some(image) = &container.image {
                patches.push(PatchOperation::replace(
                    format!("/spec/ephemeralContainers/{i}/image"),
                    Value::String(zarf_core::mutate_reference(registry, image)?),
                ));
            }
        }
    }
    if let Some(s) = spec {
        for (i, container) in s.containers.iter().enumerate() {
            if let Some(image) = &container.image {
                patches.push(PatchOperation::replace(
                    format!("/spec/containers/{i}/image"),
                    Value::String(zarf_core::mutate_reference(registry, image)?),
                ));
            }
        }
    }

    match labels {
        Some(_) => patches.push(PatchOperation::replace(
            format!("/metadata/labels/{PATCHED_LABEL}"),
            Value::String(PATCHED_VALUE.into()),
        )),
        None => patches.push(PatchOperation::add(
            "/metadata/labels",
            json!({ PATCHED_LABEL: PATCHED_VALUE }),
        )),
    }

    Ok(patches)
}

/// Handle a full AdmissionReview, producing the response review
pub fn handle_review(review: &AdmissionReview, registry: &str) -> Result<AdmissionReview> {
    let request = review
        .request
        .as_ref()
        .ok_or_else(|| KubeError::InvalidManifest("AdmissionReview has no request".into()))?;
    let pod: Pod = serde_json::from_value(request.object.clone())?;
    let patches = mutate_pod(&pod, registry)?;

    let (patch, patch_type) = if patches.is_empty() {
        (None, None)
    } else {
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(serde_json::to_vec(&patches)?);
        (Some(encoded), Some("JSONPatch".to_string()))
    };

    Ok(AdmissionReview {
        api_version: "admission.k8s.io/v1".into(),
        kind: "AdmissionReview".into(),
        request: None,
        response: Some(AdmissionResponse {
            uid: request.uid.clone(),
            allowed: true,
            patch,
            patch_type,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTRY: &str = "127.0.0.1:31999";

    fn pod(json: Value) -> Pod {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_labeled_pod_is_mutated_in_fixed_order() {
        let pod = pod(json!({
            "metadata": { "labels": { "should-be": "mutated" } },
            "spec": {
                "containers": [{ "name": "c", "image": "nginx" }],
                "initContainers": [{ "name": "i", "image": "busybox" }],
                "ephemeralContainers": [{ "name": "e", "image": "alpine" }],
            }
        }));

        let patches = mutate_pod(&pod, REGISTRY).unwrap();
        assert_eq!(
            patches,
            vec![
                PatchOperation::replace(
                    "/spec/imagePullSecrets",
                    json!([{ "name": "private-registry" }]),
                ),
                PatchOperation::replace(
                    "/spec/initContainers/0/image",
                    json!("127.0.0.1:31999/library/busybox:latest-zarf-2140033595"),
                ),
                PatchOperation::replace(
                    "/spec/ephemeralContainers/0/image",
                    json!("127.0.0.1:31999/library/alpine:latest-zarf-1117969859"),
                ),
                PatchOperation::replace(
                    "/spec/containers/0/image",
                    json!("127.0.0.1:31999/library/nginx:latest-zarf-3793515731"),
                ),
                PatchOperation::replace("/metadata/labels/zarf-agent", json!("patched")),
            ]
        );
    }

    #[test]
    fn test_already_patched_pod_gets_empty_patch() {
        let pod = pod(json!({
            "metadata": { "labels": { "zarf-agent": "patched" } },
            "spec": { "containers": [{ "name": "c", "image": "nginx" }] }
        }));
        assert!(mutate_pod(&pod, REGISTRY).unwrap().is_empty());
    }

    #[test]
    fn test_unlabeled_pod_adds_labels_map() {
        let pod = pod(json!({
            "spec": { "containers": [{ "name": "c", "image": "nginx" }] }
        }));

        let patches = mutate_pod(&pod, REGISTRY).unwrap();
        assert_eq!(
            patches,
            vec![
                PatchOperation::replace(
                    "/spec/imagePullSecrets",
                    json!([{ "name": "private-registry" }]),
                ),
                PatchOperation::replace(
                    "/spec/containers/0/image",
                    json!("127.0.0.1:31999/library/nginx:latest-zarf-3793515731"),
                ),
                PatchOperation::add("/metadata/labels", json!({ "zarf-agent": "patched" })),
            ]
        );
    }

    #[test]
    fn test_mutation_is_idempotent() {
        let original = pod(json!({
            "metadata": { "labels": { "app": "web" } },
            "spec": { "containers": [{ "name": "c", "image": "nginx" }] }
        }));
        let patches = mutate_pod(&original, REGISTRY).unwrap();
        assert!(!patches.is_empty());

        // Apply the label and image rewrites by hand, then mutate again.
        let patched = pod(json!({
            "metadata": { "labels": { "app": "web", "zarf-agent": "patched" } },
            "spec": { "containers": [{
                "name": "c",
                "image": "127.0.0.1:31999/library/nginx:latest-zarf-3793515731",
            }] }
        }));
        assert!(mutate_pod(&patched, REGISTRY).unwrap().is_empty());
    }

    #[test]
    fn test_handle_review_roundtrip() {
        let review = AdmissionReview {
            api_version: "admission.k8s.io/v1".into(),
            kind: "AdmissionReview".into(),
            request: Some(AdmissionRequest {
                uid: "abc-123".into(),
                operation: "CREATE".into(),
                object: json!({
                    "metadata": { "labels": null },
                    "spec": { "containers": [{ "name": "c", "image": "nginx" }] }
                }),
            }),
            response: None,
        };

        let result = handle_review(&review, REGISTRY).unwrap();
        let response = result.response.unwrap();
        assert_eq!(response.uid, "abc-123");
        assert!(response.allowed);
        assert_eq!(response.patch_type.as_deref(), Some("JSONPatch"));

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(response.patch.unwrap())
            .unwrap();
        let patches: Vec<PatchOperation> = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(patches.len(), 3);
        assert_eq!(patches[0].path, "/spec/imagePullSecrets");
    }

    #[test]
    fn test_review_without_patch_for_patched_pod() {
        let review = AdmissionReview {
            api_version: "admission.k8s.io/v1".into(),
            kind: "AdmissionReview".into(),
            request: Some(AdmissionRequest {
                uid: "abc-456".into(),
                operation: "CREATE".into(),
                object: json!({
                    "metadata": { "labels": { "zarf-agent": "patched" } },
                    "spec": { "containers": [{ "name": "c", "image": "nginx" }] }
                }),
            }),
            response: None,
        };

        let response = handle_review(&review, REGISTRY).unwrap().response.unwrap();
        assert!(response.allowed);
        assert!(response.patch.is_none());
    }
}
