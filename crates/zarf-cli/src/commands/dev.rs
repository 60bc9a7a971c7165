//! `zarf dev` utilities

use console::style;
use std::path::Path;

use crate::error::{CliError, Result};
use crate::exit_codes;

/// Migrate a manifest directory to the current schema in place
pub fn update_schema(dir: &Path) -> Result<()> {
    let path = dir.join(zarf_core::LAYOUT_ZARF_YAML);
    let data = std::fs::read(&path)
        .map_err(|e| CliError::new(format!("cannot read {}: {e}", path.display()), exit_codes::SCHEMA_UNMIGRATABLE))?;
    let doc: serde_yaml::Value = serde_yaml::from_slice(&data)
        .map_err(|e| CliError::new(e.to_string(), exit_codes::SCHEMA_UNMIGRATABLE))?;

    let migrated = zarf_core::migrate(doc)
        .map_err(|e| CliError::new(e.to_string(), exit_codes::SCHEMA_UNMIGRATABLE))?;

    let yaml = migrated
        .package
        .to_yaml()
        .map_err(|e| CliError::new(e.to_string(), exit_codes::SCHEMA_UNMIGRATABLE))?;
    std::fs::write(&path, yaml)
        .map_err(|e| CliError::new(e.to_string(), exit_codes::SCHEMA_UNMIGRATABLE))?;

    if migrated.applied.is_empty() {
        println!("{} already at the current schema", style("ok:").green());
    } else {
        println!(
            "{} applied: {}",
            style("Migrated").green().bold(),
            migrated.applied.join(", ")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_update_schema_migrates_legacy_manifest() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("zarf.yaml"),
            r#"
apiVersion: zarf.dev/v1alpha1
kind: ZarfPackageConfig
metadata:
  name: legacy
components:
  - name: web
    charts:
      - name: podinfo
        version: 6.4.0
        url: https://stefanprodan.github.io/podinfo
        noWait: true
"#,
        )
        .unwrap();

        update_schema(dir.path()).unwrap();

        let updated = std::fs::read_to_string(dir.path().join("zarf.yaml")).unwrap();
        assert!(updated.contains("apiVersion: zarf.dev/v1"));
        assert!(updated.contains("helm:"));
        assert!(!updated.contains("noWait"));
    }

    #[test]
    fn test_update_schema_fails_on_unmigratable() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("zarf.yaml"),
            "apiVersion: zarf.dev/v1alpha1\nkind: ZarfPackageConfig\nmetadata:\n  name: x\ncomponents:\n  - name: a\n    cosignKeyPath: k.pub\n",
        )
        .unwrap();

        let err = update_schema(dir.path()).unwrap_err();
        assert_eq!(err.exit_code(), exit_codes::SCHEMA_UNMIGRATABLE);
    }
}
