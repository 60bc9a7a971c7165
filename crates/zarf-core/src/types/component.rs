//! Component definition: the unit of selection within a package
//!
//! A component bundles manifests, charts, images, repos, files, data
//! injections, and lifecycle actions. Deploy plans operate at component
//! granularity.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::variable::{is_false, VariableDef};
use crate::error::{CoreError, Result};

/// Marker prefix for substitution tokens; forbidden in import fields
pub const TEMPLATE_MARKER: &str = "###ZARF_";

/// A named bundle of assets within a package
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZarfComponent {
    /// Component name, unique within the package
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Pre-select this component in interactive choices
    #[serde(default, skip_serializing_if = "is_false")]
    pub default: bool,

    /// Tri-state: absent (optional, not preselected), true (always deployed),
    /// false (explicitly optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,

    /// Filter for when this component applies
    #[serde(default, skip_serializing_if = "OnlyFilter::is_empty")]
    pub only: OnlyFilter,

    /// Import this component from another package
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import: Option<ComponentImport>,

    /// Raw Kubernetes manifests, deployed as a generated chart
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manifests: Vec<ZarfManifest>,

    /// Helm charts to install during deploy
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub charts: Vec<ZarfChart>,

    /// Data to copy into running containers after deploy
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_injections: Vec<ZarfDataInjection>,

    /// Files or folders placed on disk during deploy
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<ZarfFile>,

    /// OCI images bundled into the package
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,

    /// Git repositories bundled into the package
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repos: Vec<String>,

    /// Opaque extension configuration, carried through untouched
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, serde_yaml::Value>,

    /// Cluster conditions awaited after the component's work completes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub waits: Vec<ClusterWait>,

    /// Lifecycle action sets
    #[serde(default, skip_serializing_if = "ComponentActions::is_empty")]
    pub actions: ComponentActions,
}

impl ZarfComponent {
    /// A component needs a cluster connection iff it carries cluster assets
    pub fn requires_cluster(&self) -> bool {
        !self.images.is_empty()
            || !self.charts.is_empty()
            || !self.manifests.is_empty()
            || !self.repos.is_empty()
            || !self.data_injections.is_empty()
    }

    /// Resolve the tri-state required flag
    pub fn is_required(&self) -> bool {
        self.required.unwrap_or(false)
    }

    /// Validate the component shape
    pub fn validate(&self) -> Result<()> {
        if !super::package::is_valid_package_name(&self.name) {
            return Err(CoreError::ManifestInvalid {
                path: format!(".components[{}].name", self.name),
                message: "must be lowercase alphanumeric with dashes".into(),
            });
        }
        if let Some(import) = &self.import {
            import.validate(&self.name)?;
        }
        let mut chart_names = std::collections::BTreeSet::new();
        for chart in &self.charts {
            chart.validate(&self.name)?;
            if !chart_names.insert(chart.name.as_str()) {
                return Err(CoreError::ManifestInvalid {
                    path: format!(".components[{}].charts", self.name),
                    message: format!("duplicate chart name {}", chart.name),
                });
            }
        }
        for (set_name, set) in [
            ("onCreate", &self.actions.on_create),
            ("onDeploy", &self.actions.on_deploy),
            ("onRemove", &self.actions.on_remove),
        ] {
            set.validate(&self.name, set_name)?;
        }
        Ok(())
    }
}

/// Narrows the hosts and clusters a component applies to
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlyFilter {
    /// Only include when creating on this OS
    #[serde(default, rename = "localOS", skip_serializing_if = "Option::is_none")]
    pub local_os: Option<LocalOs>,

    #[serde(default, skip_serializing_if = "OnlyCluster::is_empty")]
    pub cluster: OnlyCluster,

    /// Only include when `--flavor` matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flavor: Option<String>,
}

impl OnlyFilter {
    pub fn is_empty(&self) -> bool {
        self.local_os.is_none() && self.cluster.is_empty() && self.flavor.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalOs {
    Linux,
    Darwin,
    Windows,
}

impl LocalOs {
    /// The OS the current binary was built for
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            LocalOs::Windows
        } else if cfg!(target_os = "macos") {
            LocalOs::Darwin
        } else {
            LocalOs::Linux
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlyCluster {
    /// Target cluster CPU architecture
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<Architecture>,

    /// Kubernetes distros this component works with (hint only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub distros: Vec<String>,
}

impl OnlyCluster {
    pub fn is_empty(&self) -> bool {
        self.architecture.is_none() && self.distros.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    Amd64,
    Arm64,
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Architecture::Amd64 => write!(f, "amd64"),
            Architecture::Arm64 => write!(f, "arm64"),
        }
    }
}

/// Pulls a component definition in from another package
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentImport {
    /// Name of the component in the source package (defaults to this
    /// component's name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Local directory containing the source package manifest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// OCI URL of a skeleton package to import from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ComponentImport {
    fn validate(&self, component: &str) -> Result<()> {
        let path = format!(".components[{component}].import");
        match (&self.path, &self.url) {
            (Some(_), Some(_)) => Err(CoreError::ManifestInvalid {
                path,
                message: "path and url are mutually exclusive".into(),
            }),
            (None, None) => Err(CoreError::ManifestInvalid {
                path,
                message: "one of path or url is required".into(),
            }),
            (Some(p), None) if p.contains(TEMPLATE_MARKER) => Err(CoreError::ManifestInvalid {
                path,
                message: "import path may not contain template markers".into(),
            }),
            (None, Some(u)) if u.contains(TEMPLATE_MARKER) => Err(CoreError::ManifestInvalid {
                path,
                message: "import url may not contain template markers".into(),
            }),
            (None, Some(u)) if !u.starts_with("oci://") => Err(CoreError::ManifestInvalid {
                path,
                message: "import url must be an oci:// reference".into(),
            }),
            _ => Ok(()),
        }
    }
}

/// A file to place on disk during deploy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZarfFile {
    /// Local path or remote URL to pull into the package
    pub source: String,

    /// Expected SHA-256 of the source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shasum: Option<String>,

    /// Where the file lands at deploy
    pub target: String,

    #[serde(default, skip_serializing_if = "is_false")]
    pub executable: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symlinks: Vec<String>,

    /// Subtree to keep when the source is an archive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract_path: Option<String>,
}

/// Where a chart comes from (v1 schema: exactly one populated)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmSource {
    /// Chart repository URL
    pub url: String,
    /// Chart name within the repository (defaults to the zarf chart name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitChartSource {
    /// Git repository URL
    pub url: String,
    /// Subdirectory of the chart within the repo
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciChartSource {
    /// oci:// URL of the chart
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalChartSource {
    /// Path to a chart directory or .tgz archive
    pub path: String,
}

/// A Helm chart to install during deploy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZarfChart {
    /// Chart name, unique within the package
    pub name: String,

    /// Chart version; required for remote sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm: Option<HelmSource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitChartSource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oci: Option<OciChartSource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalChartSource>,

    /// Target namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Helm release name (defaults to the chart name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_name: Option<String>,

    /// Block until all chart resources are ready
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub wait: bool,

    /// Values files merged in order (local paths or URLs)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values_files: Vec<String>,

    /// Variable-driven overrides applied on dotted values paths
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<ChartVariable>,
}

impl ZarfChart {
    /// The Helm release name for this chart
    pub fn release_name(&self) -> &str {
        self.release_name.as_deref().unwrap_or(&self.name)
    }

    /// True when the chart comes from a remote source
    pub fn is_remote(&self) -> bool {
        self.helm.is_some() || self.git.is_some() || self.oci.is_some()
    }

    fn validate(&self, component: &str) -> Result<()> {
        let path = format!(".components[{component}].charts[{}]", self.name);
        let sources = [
            self.helm.is_some(),
            self.git.is_some(),
            self.oci.is_some(),
            self.local.is_some(),
        ]
        .iter()
        .filter(|s| **s)
        .count();
        if sources != 1 {
            return Err(CoreError::ManifestInvalid {
                path,
                message: format!(
                    "exactly one of helm, git, oci, or local must be set (found {sources})"
                ),
            });
        }
        if self.is_remote() && self.version.is_none() {
            return Err(CoreError::ManifestInvalid {
                path,
                message: "version is required for remote chart sources".into(),
            });
        }
        for variable in &self.variables {
            if !super::variable::is_valid_variable_name(&variable.name) {
                return Err(CoreError::ManifestInvalid {
                    path: format!("{path}.variables[{}]", variable.name),
                    message: "variable names must be uppercase with underscores".into(),
                });
            }
        }
        Ok(())
    }
}

/// A variable override applied to a chart's values
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartVariable {
    /// Variable name resolved through the variable engine
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Dotted path within the chart values (e.g. `image.tag`)
    pub path: String,
}

/// Raw manifests deployed as a generated chart
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZarfManifest {
    /// Becomes the name of the generated chart
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// YAML files collected into the chart templates, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,

    /// Kustomizations rendered before the plain files
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kustomizations: Vec<String>,

    /// Allow kustomizations to traverse above the package directory
    #[serde(default, skip_serializing_if = "is_false")]
    pub kustomize_allow_any_directory: bool,

    /// Block until all manifest resources are ready
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub wait: bool,
}

/// Copies data into a running container once its pod is Ready
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZarfDataInjection {
    /// Local path or URL of the data
    pub source: String,

    pub target: ContainerTarget,

    /// gzip the stream in transit
    #[serde(default, skip_serializing_if = "is_false")]
    pub compress: bool,
}

/// Destination of a data injection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerTarget {
    pub namespace: String,
    /// Label selector matching the target pod
    pub selector: String,
    pub container: String,
    /// Path inside the container to copy into
    pub path: String,
}

/// Action sets per package operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentActions {
    #[serde(default, skip_serializing_if = "ActionSet::is_empty")]
    pub on_create: ActionSet,

    #[serde(default, skip_serializing_if = "ActionSet::is_empty")]
    pub on_deploy: ActionSet,

    #[serde(default, skip_serializing_if = "ActionSet::is_empty")]
    pub on_remove: ActionSet,
}

impl ComponentActions {
    pub fn is_empty(&self) -> bool {
        self.on_create.is_empty() && self.on_deploy.is_empty() && self.on_remove.is_empty()
    }
}

/// Ordered action lists around one operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionSet {
    #[serde(default, skip_serializing_if = "ActionDefaults::is_empty")]
    pub defaults: ActionDefaults,

    /// Run before the operation's primary work
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub before: Vec<Action>,

    /// Run after the primary work succeeds
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub after: Vec<Action>,

    /// Run iff primary work and `after` all succeed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_success: Vec<Action>,

    /// Run iff any of before/primary/after fails
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_failure: Vec<Action>,
}

impl ActionSet {
    pub fn is_empty(&self) -> bool {
        self.before.is_empty()
            && self.after.is_empty()
            && self.on_success.is_empty()
            && self.on_failure.is_empty()
    }

    fn validate(&self, component: &str, set_name: &str) -> Result<()> {
        for (list_name, list) in [
            ("before", &self.before),
            ("after", &self.after),
            ("onSuccess", &self.on_success),
            ("onFailure", &self.on_failure),
        ] {
            for (i, action) in list.iter().enumerate() {
                action.validate(&format!(
                    ".components[{component}].actions.{set_name}.{list_name}[{i}]"
                ))?;
            }
        }
        Ok(())
    }
}

/// Defaults inherited by every action in a set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDefaults {
    #[serde(default, skip_serializing_if = "is_false")]
    pub mute: bool,

    /// Wall-clock limit in seconds; 0 means no limit for commands
    #[serde(default, skip_serializing_if = "is_zero")]
    pub max_total_seconds: u64,

    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub retries: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,

    /// KEY=VALUE pairs added to the command environment
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    #[serde(default, skip_serializing_if = "ShellPreference::is_empty")]
    pub shell: ShellPreference,
}

impl ActionDefaults {
    pub fn is_empty(&self) -> bool {
        *self == ActionDefaults::default()
    }
}

/// Per-OS shell override for command actions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellPreference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linux: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub darwin: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub windows: Option<String>,
}

impl ShellPreference {
    pub fn is_empty(&self) -> bool {
        self.linux.is_none() && self.darwin.is_none() && self.windows.is_none()
    }
}

/// A single shell command or wait condition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mute: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_total_seconds: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<ShellPreference>,

    /// The command to run; mutually exclusive with `wait`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,

    /// The condition to await; mutually exclusive with `cmd`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait: Option<ActionWait>,

    /// Shown instead of the command during execution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Variables updated from the command's trimmed stdout
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub set_variables: Vec<VariableDef>,
}

impl Action {
    pub fn validate(&self, path: &str) -> Result<()> {
        match (&self.cmd, &self.wait) {
            (Some(_), Some(_)) => Err(CoreError::ManifestInvalid {
                path: path.to_string(),
                message: "cmd and wait are mutually exclusive".into(),
            }),
            (None, None) => Err(CoreError::ManifestInvalid {
                path: path.to_string(),
                message: "one of cmd or wait is required".into(),
            }),
            (None, Some(w)) => w.validate(path),
            _ => Ok(()),
        }
    }
}

/// Cluster or network condition awaited by a wait action
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionWait {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterWait>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkWait>,
}

impl ActionWait {
    fn validate(&self, path: &str) -> Result<()> {
        match (&self.cluster, &self.network) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            _ => Err(CoreError::ManifestInvalid {
                path: path.to_string(),
                message: "exactly one of cluster or network must be set".into(),
            }),
        }
    }
}

/// Waits for a Kubernetes object to reach a condition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterWait {
    /// Resource kind (e.g. Pod, Deployment)
    pub kind: String,

    /// Resource name or label selector
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Condition, jsonpath state, or the default "exists"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// Waits for a network endpoint to respond
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkWait {
    pub protocol: NetworkProtocol,

    /// Host:port or URL path to probe
    pub address: String,

    /// Expected HTTP status (http/https only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkProtocol {
    Tcp,
    Http,
    Https,
}

pub(crate) fn default_true() -> bool {
    true
}

fn is_true(v: &bool) -> bool {
    *v
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chart(yaml: &str) -> ZarfChart {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_requires_cluster() {
        let mut component = ZarfComponent {
            name: "tools".into(),
            ..Default::default()
        };
        assert!(!component.requires_cluster());

        component.images.push("nginx".into());
        assert!(component.requires_cluster());
    }

    #[test]
    fn test_chart_exactly_one_source() {
        let c = chart(
            r#"
name: podinfo
version: 6.4.0
helm:
  url: https://stefanprodan.github.io/podinfo
"#,
        );
        assert!(c.validate("web").is_ok());

        let c = chart(
            r#"
name: podinfo
version: 6.4.0
helm:
  url: https://stefanprodan.github.io/podinfo
local:
  path: ./chart
"#,
        );
        assert!(matches!(
            c.validate("web"),
            Err(CoreError::ManifestInvalid { .. })
        ));
    }

    #[test]
    fn test_remote_chart_requires_version() {
        let c = chart(
            r#"
name: podinfo
oci:
  url: oci://ghcr.io/stefanprodan/charts/podinfo
"#,
        );
        assert!(c.validate("web").is_err());

        let c = chart(
            r#"
name: podinfo
local:
  path: ./chart
"#,
        );
        assert!(c.validate("web").is_ok(), "local charts may omit version");
    }

    #[test]
    fn test_action_cmd_xor_wait() {
        let action = Action {
            cmd: Some("echo hi".into()),
            wait: Some(ActionWait {
                cluster: Some(ClusterWait::default()),
                network: None,
            }),
            ..Default::default()
        };
        assert!(action.validate(".a").is_err());

        let action = Action::default();
        assert!(action.validate(".a").is_err());

        let action = Action {
            cmd: Some("echo hi".into()),
            ..Default::default()
        };
        assert!(action.validate(".a").is_ok());
    }

    #[test]
    fn test_import_exclusive_and_no_markers() {
        let mut component = ZarfComponent {
            name: "base".into(),
            import: Some(ComponentImport {
                name: None,
                path: Some("../common".into()),
                url: Some("oci://ghcr.io/acme/common".into()),
            }),
            ..Default::default()
        };
        assert!(component.validate().is_err());

        component.import = Some(ComponentImport {
            name: None,
            path: Some("../###ZARF_VAR_DIR###".into()),
            url: None,
        });
        assert!(component.validate().is_err());

        component.import = Some(ComponentImport {
            name: None,
            path: Some("../common".into()),
            url: None,
        });
        assert!(component.validate().is_ok());
    }

    #[test]
    fn test_required_tristate_roundtrip() {
        let c: ZarfComponent = serde_yaml::from_str("name: a\n").unwrap();
        assert_eq!(c.required, None);
        assert!(!c.is_required());

        let c: ZarfComponent = serde_yaml::from_str("name: a\nrequired: true\n").unwrap();
        assert_eq!(c.required, Some(true));

        let c: ZarfComponent = serde_yaml::from_str("name: a\nrequired: false\n").unwrap();
        assert_eq!(c.required, Some(false));
        let out = serde_yaml::to_string(&c).unwrap();
        assert!(out.contains("required: false"), "tri-state must survive serialization");
    }
}
