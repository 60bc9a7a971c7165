//! Readiness checks in the style of kstatus
//!
//! Any Kubernetes object is judged by its generation/observedGeneration pair
//! and its `status.conditions`, rather than per-kind polling. Objects with no
//! status are considered current.

use kube::api::{DynamicObject, ListParams};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::error::{KubeError, Result};
use crate::release::{AppliedRef, ResourceManager};

/// Poll cadence for readiness and wait loops
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Readiness of a single object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceStatus {
    Current,
    InProgress,
}

/// Polls applied resources until they are all ready
#[derive(Debug, Clone)]
pub struct HealthChecker {
    interval: Duration,
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthChecker {
    pub fn new() -> Self {
        Self {
            interval: POLL_INTERVAL,
        }
    }

    /// Block until every reference reaches Current, or time out
    pub async fn wait_ready(
        &self,
        resources: &ResourceManager,
        refs: &[AppliedRef],
        timeout: Duration,
    ) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let mut pending = Vec::new();
            for reference in refs {
                let api = resources
                    .api_for_kind(&reference.kind, reference.namespace.as_deref())?;
                match api.get_opt(&reference.name).await? {
                    Some(object) if compute_status(&object) == ResourceStatus::Current => {}
                    _ => pending.push(reference.to_string()),
                }
            }
            if pending.is_empty() {
                return Ok(());
            }
            debug!(pending = ?pending, "waiting for resources");
            if tokio::time::Instant::now() + self.interval > deadline {
                return Err(KubeError::WaitTimeout {
                    what: pending.join(", "),
                    seconds: timeout.as_secs(),
                });
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    /// Wait for a kind/name-or-selector to meet a condition. The default
    /// condition "exists" is met as soon as a matching object is found.
    pub async fn wait_for(
        &self,
        resources: &ResourceManager,
        kind: &str,
        name_or_selector: &str,
        namespace: Option<&str>,
        condition: &str,
        timeout: Duration,
    ) -> Result<()> {
        let what = format!(
            "{kind} {name_or_selector} to be {}",
            if condition.is_empty() { "exists" } else { condition }
        );
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let objects = self
                .matching_objects(resources, kind, name_or_selector, namespace)
                .await?;
            if !objects.is_empty() && objects.iter().all(|o| meets_condition(o, condition)) {
                return Ok(());
            }
            if tokio::time::Instant::now() + self.interval > deadline {
                return Err(KubeError::WaitTimeout {
                    what,
                    seconds: timeout.as_secs(),
                });
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    async fn matching_objects(
        &self,
        resources: &ResourceManager,
        kind: &str,
        name_or_selector: &str,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        let api = resources.api_for_kind(kind, namespace)?;
        if name_or_selector.contains('=') {
            let params = ListParams::default().labels(name_or_selector);
            Ok(api.list(&params).await?.items)
        } else {
            Ok(api.get_opt(name_or_selector).await?.into_iter().collect())
        }
    }
}

/// kstatus-style readiness for one object
pub fn compute_status(object: &DynamicObject) -> ResourceStatus {
    let data = &object.data;

    // A newer generation that the controller has not observed yet is always
    // in progress.
    let generation = object.metadata.generation;
    let observed = data
        .pointer("/status/observedGeneration")
        .and_then(Value::as_i64);
    if let (Some(generation), Some(observed)) = (generation, observed) {
        if observed < generation {
            return ResourceStatus::InProgress;
        }
    }

    let Some(status) = data.get("status") else {
        // No status at all (ConfigMaps, Secrets, Services): current.
        return ResourceStatus::Current;
    };

    // Pods report phase rather than a Ready-style rollout.
    if let Some(phase) = status.get("phase").and_then(Value::as_str) {
        match phase {
            "Running" | "Succeeded" | "Active" | "Bound" => {}
            _ => return ResourceStatus::InProgress,
        }
    }

    if let Some(conditions) = status.get("conditions").and_then(Value::as_array) {
        for condition in conditions {
            let kind = condition.get("type").and_then(Value::as_str).unwrap_or("");
            let value = condition
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("");
            if matches!(kind, "Ready" | "Available") && value != "True" {
                return ResourceStatus::InProgress;
            }
        }
    }

    // Workload replica accounting, when present.
    let desired = data.pointer("/spec/replicas").and_then(Value::as_i64);
    let ready = status.get("readyReplicas").and_then(Value::as_i64);
    if let Some(desired) = desired {
        if desired > 0 && ready.unwrap_or(0) < desired {
            return ResourceStatus::InProgress;
        }
    }

    ResourceStatus::Current
}

/// Evaluate a wait condition against one object:
/// - "" or "exists": met by existing
/// - "{.json.path}=value": the jsonpath field equals the value
/// - anything else: a `status.conditions` type with status True, falling
///   back to kstatus readiness for "ready"
pub fn meets_condition(object: &DynamicObject, condition: &str) -> bool {
    let condition = condition.trim();
    if condition.is_empty() || condition.eq_ignore_ascii_case("exists") {
        return true;
    }

    if let Some((path, expected)) = parse_jsonpath_condition(condition) {
        let found = path
            .iter()
            .try_fold(&object.data, |value, key| value.get(key));
        return match found {
            Some(Value::String(s)) => s == &expected,
            Some(other) => other.to_string() == expected,
            None => false,
        };
    }

    if condition.eq_ignore_ascii_case("ready")
        && compute_status(object) == ResourceStatus::Current
    {
        return true;
    }

    object
        .data
        .pointer("/status/conditions")
        .and_then(Value::as_array)
        .map(|conditions| {
            conditions.iter().any(|c| {
                c.get("type")
                    .and_then(Value::as_str)
                    .map(|t| t.eq_ignore_ascii_case(condition))
                    .unwrap_or(false)
                    && c.get("status").and_then(Value::as_str) == Some("True")
            })
        })
        .unwrap_or(false)
}

/// Parse `'{.status.availableReplicas}'=23` style conditions
fn parse_jsonpath_condition(condition: &str) -> Option<(Vec<String>, String)> {
    let condition = condition.trim_matches('\'');
    let rest = condition.strip_prefix('{')?;
    let (path, expected) = rest.split_once("}=")?;
    let segments: Vec<String> = path
        .trim_start_matches('.')
        .split('.')
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    if segments.is_empty() {
        return None;
    }
    Some((segments, expected.trim_matches('\'').to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(data: Value) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "x" },
            "spec": data.get("spec").cloned().unwrap_or(json!({})),
            "status": data.get("status").cloned().unwrap_or(json!({})),
        }))
        .unwrap()
    }

    #[test]
    fn test_no_status_is_current() {
        let o = object(json!({}));
        assert_eq!(compute_status(&o), ResourceStatus::Current);
    }

    #[test]
    fn test_unready_replicas_in_progress() {
        let o = object(json!({
            "spec": { "replicas": 3 },
            "status": { "readyReplicas": 1 },
        }));
        assert_eq!(compute_status(&o), ResourceStatus::InProgress);

        let o = object(json!({
            "spec": { "replicas": 3 },
            "status": { "readyReplicas": 3 },
        }));
        assert_eq!(compute_status(&o), ResourceStatus::Current);
    }

    #[test]
    fn test_false_available_condition_in_progress() {
        let o = object(json!({
            "status": { "conditions": [{ "type": "Available", "status": "False" }] },
        }));
        assert_eq!(compute_status(&o), ResourceStatus::InProgress);
    }

    #[test]
    fn test_pod_phase() {
        let o = object(json!({ "status": { "phase": "Pending" } }));
        assert_eq!(compute_status(&o), ResourceStatus::InProgress);
        let o = object(json!({ "status": { "phase": "Running" } }));
        assert_eq!(compute_status(&o), ResourceStatus::Current);
    }

    #[test]
    fn test_exists_condition() {
        let o = object(json!({}));
        assert!(meets_condition(&o, ""));
        assert!(meets_condition(&o, "exists"));
    }

    #[test]
    fn test_named_condition() {
        let o = object(json!({
            "status": { "conditions": [{ "type": "Established", "status": "True" }] },
        }));
        assert!(meets_condition(&o, "Established"));
        assert!(!meets_condition(&o, "Degraded"));
    }

    #[test]
    fn test_jsonpath_condition() {
        let o = object(json!({
            "status": { "availableReplicas": 23 },
        }));
        assert!(meets_condition(&o, "'{.status.availableReplicas}'=23"));
        assert!(!meets_condition(&o, "'{.status.availableReplicas}'=24"));
    }
}
