//! Zarf Kube - Kubernetes integration for the package lifecycle
//!
//! This crate provides:
//! - **Cluster handle**: discovery-backed dynamic resource management
//! - **Chart assembly**: normalised chart directories, generated charts for
//!   raw manifests, rendering, and values stacking
//! - **Releases**: Server-Side Apply installs with Secret-backed history,
//!   rollback on failure, and kstatus readiness waits
//! - **Action engine**: shell actions with retries, timeouts, and variable
//!   capture; cluster and network wait conditions
//! - **Data injection**: post-Ready tar streaming into containers
//! - **Admission mutator**: the pod image-rewriting webhook contract
//! - **State**: the `zarf-state` Secret and the tunnel surface

pub mod actions;
pub mod chart;
pub mod client;
pub mod error;
pub mod health;
pub mod inject;
pub mod mutate;
pub mod release;
pub mod state;
pub mod tunnel;
pub mod wait;

pub use actions::{ActionContext, RETRY_DELAY};
pub use chart::{
    generate_manifest_chart, render_chart, render_kustomization, substitute_values_files,
    PreparedChart,
};
pub use client::Cluster;
pub use error::{KubeError, Result};
pub use health::{compute_status, HealthChecker, ResourceStatus, POLL_INTERVAL};
pub use inject::DataInjector;
pub use mutate::{
    handle_review, mutate_pod, AdmissionRequest, AdmissionResponse, AdmissionReview,
    PatchOperation, IMAGE_PULL_SECRET, PATCHED_LABEL, PATCHED_VALUE,
};
pub use release::{
    parse_manifest, AppliedRef, ChartInstaller, InstallRequest, Release, ReleaseStatus,
    ReleaseStorage, ResourceManager, FIELD_MANAGER, HISTORY_LIMIT,
};
pub use state::{
    ensure_namespace, AgentTls, DeployedComponent, DeployedPackage, GitServerInfo,
    InstalledRelease, RegistryInfo, ZarfState, STATE_SECRET, ZARF_NAMESPACE,
};
pub use tunnel::{
    list_connect_targets, target_tunnel_info, ConnectTarget, Tunnel, TunnelInfo,
    CONNECT_DESCRIPTION_ANNOTATION, CONNECT_NAME_LABEL, CONNECT_URL_ANNOTATION, GIT_TARGET,
    REGISTRY_TARGET,
};
pub use wait::{wait_cluster, wait_network, DEFAULT_WAIT_TIMEOUT};
