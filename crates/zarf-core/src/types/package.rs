//! Package definition and loading

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::component::ZarfComponent;
use super::variable::{VariableDef, ZarfConstant};
use crate::error::{CoreError, Result};

/// Schema marker for packages predating the v1 layout
pub const API_VERSION_V0: &str = "zarf.dev/v1alpha1";

/// Current schema marker
pub const API_VERSION_V1: &str = "zarf.dev/v1";

/// Manifest filename for the legacy/v0 schema view
pub const LAYOUT_ZARF_YAML: &str = "zarf.yaml";

/// Manifest filename written alongside zarf.yaml when building at v1
pub const LAYOUT_ZARF_V1_YAML: &str = "zarfv1.yaml";

/// The top-level package entity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZarfPackage {
    /// Schema discriminator
    pub api_version: String,

    #[serde(default)]
    pub kind: PackageKind,

    pub metadata: PackageMetadata,

    /// Writer-populated provenance; ignored on deploy except for display
    /// and differential resolution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildData>,

    #[serde(default)]
    pub components: Vec<ZarfComponent>,

    /// Immutable key/value pairs fixed at create
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constants: Vec<ZarfConstant>,

    /// User-settable variables
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<VariableDef>,

    /// Named tunnel descriptors for the connect surface
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub connections: BTreeMap<String, TunnelDescriptor>,
}

impl ZarfPackage {
    /// Parse a package manifest from YAML bytes
    pub fn from_yaml(data: &[u8]) -> Result<Self> {
        let package: ZarfPackage = serde_yaml::from_slice(data)?;
        Ok(package)
    }

    /// Load a package manifest from a directory, preferring the v1 view
    pub fn load(dir: &Path) -> Result<Self> {
        let v1 = dir.join(LAYOUT_ZARF_V1_YAML);
        let path = if v1.exists() {
            v1
        } else {
            dir.join(LAYOUT_ZARF_YAML)
        };
        let data = std::fs::read(&path).map_err(|e| CoreError::ManifestInvalid {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_yaml(&data)
    }

    /// Serialize back to YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the manifest shape: schema version, names, and components
    pub fn validate(&self) -> Result<()> {
        if self.api_version != API_VERSION_V0 && self.api_version != API_VERSION_V1 {
            return Err(CoreError::UnknownApiVersion {
                api_version: self.api_version.clone(),
            });
        }
        if !is_valid_package_name(&self.metadata.name) {
            return Err(CoreError::ManifestInvalid {
                path: ".metadata.name".into(),
                message: format!(
                    "{} must be lowercase alphanumeric with dashes",
                    self.metadata.name
                ),
            });
        }
        let mut names = std::collections::BTreeSet::new();
        for component in &self.components {
            component.validate()?;
            if !names.insert(component.name.as_str()) {
                return Err(CoreError::ManifestInvalid {
                    path: ".components".into(),
                    message: format!("duplicate component name {}", component.name),
                });
            }
        }
        for variable in &self.variables {
            if !super::variable::is_valid_variable_name(&variable.name) {
                return Err(CoreError::ManifestInvalid {
                    path: format!(".variables[{}]", variable.name),
                    message: "variable names must be uppercase with underscores".into(),
                });
            }
        }
        for constant in &self.constants {
            if !super::variable::is_valid_variable_name(&constant.name) {
                return Err(CoreError::ManifestInvalid {
                    path: format!(".constants[{}]", constant.name),
                    message: "constant names must be uppercase with underscores".into(),
                });
            }
        }
        Ok(())
    }

    /// The archive filename for this package
    pub fn archive_name(&self) -> String {
        format!(
            "zarf-package-{}-{}-{}.{}",
            self.metadata.name,
            self.metadata.architecture.as_deref().unwrap_or("amd64"),
            self.metadata.version.as_deref().unwrap_or("unset"),
            if self.metadata.uncompressed {
                "tar"
            } else {
                "tar.zst"
            },
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackageKind {
    #[default]
    ZarfPackageConfig,
    ZarfInitConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMetadata {
    /// Package name
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Target cluster architecture for bundled images
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,

    /// Skip zstd compression of the outer archive
    #[serde(default, skip_serializing_if = "super::variable::is_false")]
    pub uncompressed: bool,

    /// False disables image bundling and in-cluster rewriting (the package
    /// deploys against upstream registries)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub airgap: Option<bool>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Provenance recorded at create
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildData {
    /// Hostname of the build machine
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub terminal: String,

    /// User that ran the build
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    /// Tool version that produced the archive
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    /// Schema migrations applied at load, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub migrations: Vec<String>,

    /// Flavor selected at create
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flavor: Option<String>,

    /// SHA-256 of checksums.txt
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub aggregate_checksum: String,

    /// Base version this differential package was built against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub differential_package_version: Option<String>,

    /// Components omitted because they are unchanged from the base
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub differential_missing: Vec<String>,
}

/// Kind of resource a tunnel attaches to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelResource {
    #[default]
    Service,
    Pod,
}

/// A named port-forward target
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelDescriptor {
    #[serde(default, rename = "type")]
    pub resource_type: TunnelResource,

    /// Resource name or label selector
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// 0 picks an ephemeral local port
    #[serde(default)]
    pub local_port: u16,

    pub remote_port: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Returns true if the name matches `^[a-z0-9][a-z0-9-]*$`
pub fn is_valid_package_name(name: &str) -> bool {
    let mut bytes = name.bytes();
    match bytes.next() {
        Some(b) if b.is_ascii_lowercase() || b.is_ascii_digit() => {}
        _ => return false,
    }
    bytes.all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
apiVersion: zarf.dev/v1
kind: ZarfPackageConfig
metadata:
  name: example
  version: 0.1.0
components:
  - name: web
    required: true
    images:
      - nginx:1.27
"#;

    #[test]
    fn test_load_minimal_package() {
        let package = ZarfPackage::from_yaml(MINIMAL.as_bytes()).unwrap();
        assert_eq!(package.api_version, API_VERSION_V1);
        assert_eq!(package.metadata.name, "example");
        assert_eq!(package.components.len(), 1);
        assert!(package.validate().is_ok());
    }

    #[test]
    fn test_package_name_pattern() {
        assert!(is_valid_package_name("podinfo"));
        assert!(is_valid_package_name("my-app-2"));
        assert!(is_valid_package_name("0day"));
        assert!(!is_valid_package_name("-leading"));
        assert!(!is_valid_package_name("Upper"));
        assert!(!is_valid_package_name(""));
    }

    #[test]
    fn test_unknown_api_version_rejected() {
        let mut package = ZarfPackage::from_yaml(MINIMAL.as_bytes()).unwrap();
        package.api_version = "zarf.dev/v9".into();
        assert!(matches!(
            package.validate(),
            Err(CoreError::UnknownApiVersion { .. })
        ));
    }

    #[test]
    fn test_duplicate_component_names_rejected() {
        let mut package = ZarfPackage::from_yaml(MINIMAL.as_bytes()).unwrap();
        let mut dup = package.components[0].clone();
        dup.images.clear();
        package.components.push(dup);
        assert!(package.validate().is_err());
    }

    #[test]
    fn test_archive_name() {
        let package = ZarfPackage::from_yaml(MINIMAL.as_bytes()).unwrap();
        assert_eq!(
            package.archive_name(),
            "zarf-package-example-amd64-0.1.0.tar.zst"
        );
    }
}
