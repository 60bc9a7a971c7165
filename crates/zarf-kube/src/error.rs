//! Kubernetes error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum KubeError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("chart {chart} failed to install: {message}")]
    ChartInstall { chart: String, message: String },

    #[error("timed out after {seconds}s waiting for {what}")]
    WaitTimeout { what: String, seconds: u64 },

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("no API resource found for kind {kind}")]
    UnknownKind { kind: String },

    #[error("zarf state not found in the cluster (is the cluster initialized?)")]
    StateNotFound,

    #[error("action failed: {description}: {message}")]
    ActionFailed {
        description: String,
        message: String,
    },

    #[error("data injection into {selector} failed: {message}")]
    DataInjection { selector: String, message: String },

    #[error("tunnel error: {message}")]
    Tunnel { message: String },

    #[error("release {name} not found in namespace {namespace}")]
    ReleaseNotFound { name: String, namespace: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Core(#[from] zarf_core::CoreError),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, KubeError>;
