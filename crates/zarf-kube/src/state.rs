//! Persisted cluster state
//!
//! A Secret named `zarf-state` in the `zarf` namespace records the in-cluster
//! registry and git server addresses, the agent's TLS material, and the list
//! of deployed packages with per-component digests for idempotent re-deploy
//! and remove.

use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, PostParams};
use kube::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{KubeError, Result};

/// Namespace owning all zarf-managed cluster resources
pub const ZARF_NAMESPACE: &str = "zarf";

/// Name of the state Secret
pub const STATE_SECRET: &str = "zarf-state";

/// Key inside the Secret data holding the JSON payload
const STATE_KEY: &str = "state";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryInfo {
    /// Address reachable from inside the cluster (host:port)
    pub address: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub push_username: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub push_password: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pull_username: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pull_password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitServerInfo {
    pub address: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub push_username: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub push_password: String,
}

/// PEM material for the agent webhook
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTls {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ca: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cert: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
}

/// One deployed package recorded in state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployedPackage {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Component name to content digest, in deploy order
    #[serde(default)]
    pub components: Vec<DeployedComponent>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployedComponent {
    pub name: String,

    /// Aggregate digest of the component's artifacts at deploy time
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub digest: String,

    /// Helm releases installed by this component, in install order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub installed_releases: Vec<InstalledRelease>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledRelease {
    pub name: String,
    pub namespace: String,
}

/// The full persisted state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZarfState {
    #[serde(default)]
    pub registry_info: RegistryInfo,

    #[serde(default)]
    pub git_server: GitServerInfo,

    #[serde(default)]
    pub agent_tls: AgentTls,

    #[serde(default)]
    pub deployed_packages: Vec<DeployedPackage>,
}

impl ZarfState {
    /// Record (or refresh) a deployed package entry
    pub fn record_package(&mut self, package: DeployedPackage) {
        self.deployed_packages.retain(|p| p.name != package.name);
        self.deployed_packages.push(package);
    }

    /// Remove a deployed package entry, returning it when present
    pub fn remove_package(&mut self, name: &str) -> Option<DeployedPackage> {
        let index = self.deployed_packages.iter().position(|p| p.name == name)?;
        Some(self.deployed_packages.remove(index))
    }

    pub fn get_package(&self, name: &str) -> Option<&DeployedPackage> {
        self.deployed_packages.iter().find(|p| p.name == name)
    }
}

/// Load the state Secret
pub async fn load(client: &Client) -> Result<ZarfState> {
    let api: Api<Secret> = Api::namespaced(client.clone(), ZARF_NAMESPACE);
    let secret = api.get_opt(STATE_SECRET).await?.ok_or(KubeError::StateNotFound)?;
    let data = secret
        .data
        .as_ref()
        .and_then(|d| d.get(STATE_KEY))
        .ok_or(KubeError::StateNotFound)?;
    Ok(serde_json::from_slice(&data.0)?)
}

/// Persist the state Secret, creating the namespace and Secret when absent
pub async fn save(client: &Client, state: &ZarfState) -> Result<()> {
    ensure_namespace(client, ZARF_NAMESPACE).await?;

    let mut data = BTreeMap::new();
    data.insert(
        STATE_KEY.to_string(),
        ByteString(serde_json::to_vec(state)?),
    );
    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(STATE_SECRET.to_string()),
            namespace: Some(ZARF_NAMESPACE.to_string()),
            labels: Some(
                [("app.kubernetes.io/managed-by".to_string(), "zarf".to_string())]
                    .into_iter()
                    .collect(),
            ),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    };

    let api: Api<Secret> = Api::namespaced(client.clone(), ZARF_NAMESPACE);
    match api.get_opt(STATE_SECRET).await? {
        Some(_) => {
            api.replace(STATE_SECRET, &PostParams::default(), &secret)
                .await?;
        }
        None => {
            api.create(&PostParams::default(), &secret).await?;
        }
    }
    Ok(())
}

/// Create a namespace if it does not exist
pub async fn ensure_namespace(client: &Client, name: &str) -> Result<()> {
    let api: Api<Namespace> = Api::all(client.clone());
    if api.get_opt(name).await?.is_some() {
        return Ok(());
    }
    let namespace = Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    api.create(&PostParams::default(), &namespace).await?;
    Ok(())
}
