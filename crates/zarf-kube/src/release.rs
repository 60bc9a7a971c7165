//! Resource application and release tracking
//!
//! Charts install through Server-Side Apply of their rendered manifests,
//! with release history persisted in Secrets (limit 10) in the target
//! namespace. A failed install rolls back to the previous deployed release
//! when one exists, and uninstalls the partial application otherwise.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::core::GroupVersionKind;
use kube::discovery::{ApiCapabilities, ApiResource, Discovery, Scope};
use kube::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{KubeError, Result};
use crate::health::HealthChecker;
use crate::state::ensure_namespace;

/// Field manager name for Server-Side Apply
pub const FIELD_MANAGER: &str = "zarf";

/// Releases kept per name before pruning
pub const HISTORY_LIMIT: usize = 10;

const RELEASE_LABEL: &str = "zarf.dev/release";
const RELEASE_KEY: &str = "release";

/// A reference to an applied cluster resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl std::fmt::Display for AppliedRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}/{}", self.kind, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// Applies and deletes dynamic resources through API discovery
pub struct ResourceManager {
    client: Client,
    discovery: Discovery,
}

impl ResourceManager {
    pub async fn new(client: Client) -> Result<Self> {
        let discovery = Discovery::new(client.clone()).run().await?;
        Ok(Self { client, discovery })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Find an API resource by kind or plural name, case-insensitively
    pub fn find_kind(&self, kind: &str) -> Result<(ApiResource, ApiCapabilities)> {
        for group in self.discovery.groups() {
            for (ar, caps) in group.recommended_resources() {
                if ar.kind.eq_ignore_ascii_case(kind) || ar.plural.eq_ignore_ascii_case(kind) {
                    return Ok((ar, caps));
                }
            }
        }
        Err(KubeError::UnknownKind {
            kind: kind.to_string(),
        })
    }

    /// Dynamic API handle for a kind in an optional namespace
    pub fn api_for_kind(
        &self,
        kind: &str,
        namespace: Option<&str>,
    ) -> Result<Api<DynamicObject>> {
        let (ar, caps) = self.find_kind(kind)?;
        Ok(self.dynamic_api(&ar, &caps, namespace))
    }

    fn dynamic_api(
        &self,
        ar: &ApiResource,
        caps: &ApiCapabilities,
        namespace: Option<&str>,
    ) -> Api<DynamicObject> {
        match caps.scope {
            Scope::Cluster => Api::all_with(self.client.clone(), ar),
            Scope::Namespaced => Api::namespaced_with(
                self.client.clone(),
                namespace.unwrap_or("default"),
                ar,
            ),
        }
    }

    /// Server-side apply every document in a multi-doc manifest, in order
    pub async fn apply_manifest(
        &self,
        manifest: &str,
        default_namespace: &str,
    ) -> Result<Vec<AppliedRef>> {
        let mut applied = Vec::new();
        for mut object in parse_manifest(manifest)? {
            let (api_version, kind) = type_of(&object)?;
            let gvk = gvk_of(&api_version, &kind);
            let (ar, caps) = self.discovery.resolve_gvk(&gvk).ok_or_else(|| {
                KubeError::UnknownKind {
                    kind: format!("{api_version}/{kind}"),
                }
            })?;

            if matches!(caps.scope, Scope::Namespaced) && object.metadata.namespace.is_none() {
                object.metadata.namespace = Some(default_namespace.to_string());
            }
            let namespace = object.metadata.namespace.clone();
            let name = object
                .metadata
                .name
                .clone()
                .ok_or_else(|| KubeError::InvalidManifest("resource has no name".into()))?;

            let api = self.dynamic_api(&ar, &caps, namespace.as_deref());
            let params = PatchParams::apply(FIELD_MANAGER).force();
            api.patch(&name, &params, &Patch::Apply(&object)).await?;
            debug!(kind = %kind, name = %name, "applied");

            applied.push(AppliedRef {
                api_version,
                kind,
                name,
                namespace,
            });
        }
        Ok(applied)
    }

    /// Delete previously applied resources, in reverse apply order
    pub async fn delete_refs(&self, refs: &[AppliedRef]) -> Result<()> {
        for reference in refs.iter().rev() {
            let gvk = gvk_of(&reference.api_version, &reference.kind);
            let Some((ar, caps)) = self.discovery.resolve_gvk(&gvk) else {
                warn!(kind = %reference.kind, "kind no longer served, skipping delete");
                continue;
            };
            let api = self.dynamic_api(&ar, &caps, reference.namespace.as_deref());
            match api.delete(&reference.name, &DeleteParams::default()).await {
                Ok(_) => debug!(resource = %reference, "deleted"),
                Err(kube::Error::Api(e)) if e.code == 404 => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Parse a multi-document YAML manifest into dynamic objects
pub fn parse_manifest(manifest: &str) -> Result<Vec<DynamicObject>> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(manifest) {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        let object: DynamicObject = serde_yaml::from_value(value)?;
        objects.push(object);
    }
    Ok(objects)
}

fn type_of(object: &DynamicObject) -> Result<(String, String)> {
    let types = object
        .types
        .as_ref()
        .ok_or_else(|| KubeError::InvalidManifest("resource has no apiVersion/kind".into()))?;
    Ok((types.api_version.clone(), types.kind.clone()))
}

fn gvk_of(api_version: &str, kind: &str) -> GroupVersionKind {
    match api_version.split_once('/') {
        Some((group, version)) => GroupVersionKind::gvk(group, version, kind),
        None => GroupVersionKind::gvk("", api_version, kind),
    }
}

// ========== Release history ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseStatus {
    Deployed,
    Failed,
    Superseded,
    Uninstalled,
}

/// One stored revision of a chart release
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub name: String,
    pub namespace: String,
    pub version: u32,
    pub chart: String,
    pub manifest: String,
    pub applied: Vec<AppliedRef>,
    pub status: ReleaseStatus,
    pub updated: DateTime<Utc>,
}

/// Secret-backed release history in the target namespace
pub struct ReleaseStorage {
    client: Client,
}

impl ReleaseStorage {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn secret_name(name: &str, version: u32) -> String {
        format!("zarf-release-{name}-v{version}")
    }

    /// History for one release, newest first
    pub async fn history(&self, namespace: &str, name: &str) -> Result<Vec<Release>> {
        let params = ListParams::default().labels(&format!("{RELEASE_LABEL}={name}"));
        let secrets = self.api(namespace).list(&params).await?;
        let mut releases = Vec::with_capacity(secrets.items.len());
        for secret in secrets {
            if let Some(payload) = secret.data.as_ref().and_then(|d| d.get(RELEASE_KEY)) {
                releases.push(decode_release(&payload.0)?);
            }
        }
        releases.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(releases)
    }

    pub async fn save(&self, release: &Release) -> Result<()> {
        let name = Self::secret_name(&release.name, release.version);
        let mut data = BTreeMap::new();
        data.insert(RELEASE_KEY.to_string(), ByteString(encode_release(release)?));
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(release.namespace.clone()),
                labels: Some(
                    [(RELEASE_LABEL.to_string(), release.name.clone())]
                        .into_iter()
                        .collect(),
                ),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        };
        let api = self.api(&release.namespace);
        match api.get_opt(&name).await? {
            Some(_) => {
                api.replace(&name, &PostParams::default(), &secret).await?;
            }
            None => {
                api.create(&PostParams::default(), &secret).await?;
            }
        }
        Ok(())
    }

    pub async fn delete(&self, namespace: &str, name: &str, version: u32) -> Result<()> {
        let api = self.api(namespace);
        match api
            .delete(&Self::secret_name(name, version), &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete_all(&self, namespace: &str, name: &str) -> Result<()> {
        for release in self.history(namespace, name).await? {
            self.delete(namespace, name, release.version).await?;
        }
        Ok(())
    }

    /// Drop the oldest revisions beyond the history limit
    pub async fn prune(&self, namespace: &str, name: &str) -> Result<()> {
        let history = self.history(namespace, name).await?;
        for release in history.iter().skip(HISTORY_LIMIT) {
            self.delete(namespace, name, release.version).await?;
        }
        Ok(())
    }
}

// Release payloads are zstd-compressed before landing in the Secret to stay
// clear of the 1MB resource limit.
fn encode_release(release: &Release) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(release)?;
    zstd::encode_all(std::io::Cursor::new(json), 3)
        .map_err(|e| KubeError::InvalidManifest(format!("failed to compress release: {e}")))
}

fn decode_release(data: &[u8]) -> Result<Release> {
    // Accept both compressed payloads and plain JSON written by older tools.
    let bytes = zstd::decode_all(std::io::Cursor::new(data)).unwrap_or_else(|_| data.to_vec());
    Ok(serde_json::from_slice(&bytes)?)
}

// ========== Install / uninstall ==========

/// Installation request for a rendered chart
#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub chart_name: String,
    pub release_name: String,
    pub namespace: String,
    pub manifest: String,
    pub wait: bool,
    pub timeout: Duration,
}

/// Installs rendered charts as tracked releases
pub struct ChartInstaller<'a> {
    resources: &'a ResourceManager,
    storage: ReleaseStorage,
}

impl<'a> ChartInstaller<'a> {
    pub fn new(resources: &'a ResourceManager) -> Self {
        Self {
            storage: ReleaseStorage::new(resources.client().clone()),
            resources,
        }
    }

    /// Upgrade-or-install the release, waiting for readiness when requested
    pub async fn install(&self, request: &InstallRequest) -> Result<Release> {
        ensure_namespace(self.resources.client(), &request.namespace).await?;

        let history = self
            .storage
            .history(&request.namespace, &request.release_name)
            .await?;
        let previous = history
            .iter()
            .find(|r| r.status == ReleaseStatus::Deployed)
            .cloned();
        let version = history.first().map(|r| r.version + 1).unwrap_or(1);

        info!(
            chart = %request.chart_name,
            release = %request.release_name,
            namespace = %request.namespace,
            version,
            "installing chart"
        );

        let mut release = Release {
            name: request.release_name.clone(),
            namespace: request.namespace.clone(),
            version,
            chart: request.chart_name.clone(),
            manifest: request.manifest.clone(),
            applied: Vec::new(),
            status: ReleaseStatus::Failed,
            updated: Utc::now(),
        };

        let applied = match self
            .resources
            .apply_manifest(&request.manifest, &request.namespace)
            .await
        {
            Ok(applied) => applied,
            Err(e) => {
                self.recover(&previous, &release, request).await;
                release.updated = Utc::now();
                let _ = self.storage.save(&release).await;
                return Err(KubeError::ChartInstall {
                    chart: request.chart_name.clone(),
                    message: e.to_string(),
                });
            }
        };
        release.applied = applied;

        if request.wait {
            let checker = HealthChecker::new();
            if let Err(e) = checker
                .wait_ready(self.resources, &release.applied, request.timeout)
                .await
            {
                self.recover(&previous, &release, request).await;
                release.updated = Utc::now();
                let _ = self.storage.save(&release).await;
                return Err(KubeError::ChartInstall {
                    chart: request.chart_name.clone(),
                    message: e.to_string(),
                });
            }
        }

        release.status = ReleaseStatus::Deployed;
        release.updated = Utc::now();
        self.storage.save(&release).await?;

        if let Some(mut previous) = previous {
            previous.status = ReleaseStatus::Superseded;
            self.storage.save(&previous).await?;
        }
        self.storage
            .prune(&request.namespace, &request.release_name)
            .await?;

        Ok(release)
    }

    /// Roll back to the previous deployed release, or tear down the partial
    /// install when there is none
    async fn recover(
        &self,
        previous: &Option<Release>,
        failed: &Release,
        request: &InstallRequest,
    ) {
        match previous {
            Some(previous) => {
                warn!(
                    release = %request.release_name,
                    to_version = previous.version,
                    "install failed, rolling back"
                );
                if let Err(e) = self
                    .resources
                    .apply_manifest(&previous.manifest, &request.namespace)
                    .await
                {
                    warn!(error = %e, "rollback failed");
                }
            }
            None => {
                warn!(release = %request.release_name, "install failed, uninstalling");
                if let Err(e) = self.resources.delete_refs(&failed.applied).await {
                    warn!(error = %e, "cleanup failed");
                }
            }
        }
    }

    /// Remove a release and its history
    pub async fn uninstall(&self, namespace: &str, release_name: &str) -> Result<()> {
        let history = self.storage.history(namespace, release_name).await?;
        let latest = history.first().ok_or_else(|| KubeError::ReleaseNotFound {
            name: release_name.to_string(),
            namespace: namespace.to_string(),
        })?;

        info!(release = release_name, namespace, "uninstalling release");
        self.resources.delete_refs(&latest.applied).await?;
        self.storage.delete_all(namespace, release_name).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_multi_document_manifest() {
        let manifest = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: a
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: b
  namespace: web
---
"#;
        let objects = parse_manifest(manifest).unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].types.as_ref().unwrap().kind, "ConfigMap");
        assert_eq!(objects[1].metadata.namespace.as_deref(), Some("web"));
    }

    #[test]
    fn test_gvk_of_core_and_grouped() {
        let core = gvk_of("v1", "ConfigMap");
        assert_eq!(core.group, "");
        assert_eq!(core.version, "v1");

        let apps = gvk_of("apps/v1", "Deployment");
        assert_eq!(apps.group, "apps");
        assert_eq!(apps.kind, "Deployment");
    }

    #[test]
    fn test_release_encode_roundtrip() {
        let release = Release {
            name: "podinfo".into(),
            namespace: "web".into(),
            version: 3,
            chart: "podinfo".into(),
            manifest: "apiVersion: v1\nkind: ConfigMap\n".into(),
            applied: vec![AppliedRef {
                api_version: "v1".into(),
                kind: "ConfigMap".into(),
                name: "a".into(),
                namespace: Some("web".into()),
            }],
            status: ReleaseStatus::Deployed,
            updated: Utc::now(),
        };
        let encoded = encode_release(&release).unwrap();
        let decoded = decode_release(&encoded).unwrap();
        assert_eq!(decoded.version, 3);
        assert_eq!(decoded.status, ReleaseStatus::Deployed);
        assert_eq!(decoded.applied[0].to_string(), "web/ConfigMap/a");
    }

    #[test]
    fn test_secret_name_shape() {
        assert_eq!(
            ReleaseStorage::secret_name("podinfo", 12),
            "zarf-release-podinfo-v12"
        );
    }
}
