//! Chart assembly and rendering
//!
//! Every chart entry - helm repo, OCI, git, local, or a raw-manifest
//! collection - is normalised into a chart directory before deploy. Raw
//! manifests become a generated chart named `raw-<component>-<manifest>`
//! whose templates hold the listed files in listed order. Helm charts render
//! through the `helm` binary; generated charts are plain YAML and render by
//! concatenation.

use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

use crate::error::{KubeError, Result};
use zarf_core::VariableConfig;

/// A normalised chart ready to render and install
#[derive(Debug, Clone)]
pub struct PreparedChart {
    /// The zarf chart name
    pub name: String,
    pub release_name: String,
    pub namespace: String,
    pub chart_dir: PathBuf,
    /// Values files in precedence order (lowest first), already substituted
    pub values_files: Vec<PathBuf>,
    /// `--set` overrides resolved from the variable engine
    pub set_values: Vec<(String, String)>,
    pub wait: bool,
    /// Generated charts skip helm and render by concatenation
    pub generated: bool,
}

/// Build the generated chart for a component's raw manifests. Files land in
/// `templates/` with an index prefix so listed order survives rendering.
pub fn generate_manifest_chart(
    component: &str,
    manifest_name: &str,
    rendered_files: &[PathBuf],
    dest_root: &Path,
) -> Result<PathBuf> {
    let chart_name = format!("raw-{component}-{manifest_name}");
    let chart_dir = dest_root.join(&chart_name);
    let templates = chart_dir.join("templates");
    std::fs::create_dir_all(&templates)?;

    std::fs::write(
        chart_dir.join("Chart.yaml"),
        format!(
            "apiVersion: v2\nname: {chart_name}\ndescription: Generated chart for raw manifests\nversion: 0.1.0\n"
        ),
    )?;

    for (index, file) in rendered_files.iter().enumerate() {
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "manifest.yaml".into());
        std::fs::copy(file, templates.join(format!("{index:04}-{file_name}")))?;
    }

    Ok(chart_dir)
}

/// Substitute variables into each values file, writing scratch copies next
/// to the chart so the originals stay untouched
pub fn substitute_values_files(
    variables: &VariableConfig,
    values_files: &[PathBuf],
    scratch: &Path,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(scratch)?;
    let mut out = Vec::with_capacity(values_files.len());
    for (index, file) in values_files.iter().enumerate() {
        let content = std::fs::read_to_string(file)?;
        let substituted = variables.substitute(&content)?;
        let dest = scratch.join(format!("values-{index}.yaml"));
        std::fs::write(&dest, substituted)?;
        out.push(dest);
    }
    Ok(out)
}

/// Render a prepared chart to a multi-document manifest string
pub async fn render_chart(chart: &PreparedChart) -> Result<String> {
    if chart.generated {
        return render_generated(chart);
    }

    let mut command = Command::new("helm");
    command
        .arg("template")
        .arg(&chart.release_name)
        .arg(&chart.chart_dir)
        .args(["--namespace", &chart.namespace]);
    for values in &chart.values_files {
        command.arg("--values").arg(values);
    }
    for (path, value) in &chart.set_values {
        command.arg("--set").arg(format!("{path}={value}"));
    }

    debug!(chart = %chart.name, dir = %chart.chart_dir.display(), "rendering chart");
    let output = command.output().await.map_err(|e| KubeError::ChartInstall {
        chart: chart.name.clone(),
        message: format!("failed to run helm: {e}"),
    })?;
    if !output.status.success() {
        return Err(KubeError::ChartInstall {
            chart: chart.name.clone(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Generated charts are plain YAML: concatenate templates in order
fn render_generated(chart: &PreparedChart) -> Result<String> {
    let templates = chart.chart_dir.join("templates");
    let mut names: Vec<PathBuf> = std::fs::read_dir(&templates)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    names.sort();

    let mut manifest = String::new();
    for path in names {
        if !manifest.is_empty() {
            manifest.push_str("\n---\n");
        }
        manifest.push_str(&std::fs::read_to_string(&path)?);
    }
    Ok(manifest)
}

/// Render a kustomization directory or URL to plain YAML
pub async fn render_kustomization(path: &str) -> Result<String> {
    let output = Command::new("kubectl")
        .args(["kustomize", path])
        .output()
        .await
        .map_err(|e| KubeError::InvalidManifest(format!("failed to run kubectl: {e}")))?;
    if !output.status.success() {
        return Err(KubeError::InvalidManifest(format!(
            "kustomize build of {path} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn prepared(dir: PathBuf, generated: bool) -> PreparedChart {
        PreparedChart {
            name: "test".into(),
            release_name: "test".into(),
            namespace: "default".into(),
            chart_dir: dir,
            values_files: vec![],
            set_values: vec![],
            wait: true,
            generated,
        }
    }

    #[tokio::test]
    async fn test_generated_chart_preserves_file_order() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("z-first.yaml");
        let b = temp.path().join("a-second.yaml");
        std::fs::write(&a, "kind: ConfigMap\n").unwrap();
        std::fs::write(&b, "kind: Secret\n").unwrap();

        let chart_dir = generate_manifest_chart(
            "web",
            "core",
            &[a, b],
            &temp.path().join("charts"),
        )
        .unwrap();
        assert!(chart_dir.ends_with("raw-web-core"));
        assert!(chart_dir.join("Chart.yaml").is_file());

        let manifest = render_chart(&prepared(chart_dir, true)).await.unwrap();
        let first = manifest.find("ConfigMap").unwrap();
        let second = manifest.find("Secret").unwrap();
        assert!(
            first < second,
            "listed order wins over alphabetical order"
        );
    }

    #[test]
    fn test_substitute_values_files_copies_to_scratch() {
        let temp = TempDir::new().unwrap();
        let values = temp.path().join("values.yaml");
        std::fs::write(&values, "domain: ###ZARF_VAR_DOMAIN###\n").unwrap();

        let declared = vec![zarf_core::VariableDef {
            name: "DOMAIN".into(),
            default: Some("example.com".into()),
            ..Default::default()
        }];
        let variables = VariableConfig::new(&[], &declared).unwrap();

        let out = substitute_values_files(
            &variables,
            &[values.clone()],
            &temp.path().join("scratch"),
        )
        .unwrap();
        assert_eq!(
            std::fs::read_to_string(&out[0]).unwrap(),
            "domain: example.com\n"
        );
        // The original file is untouched.
        assert!(std::fs::read_to_string(&values)
            .unwrap()
            .contains("###ZARF_VAR_DOMAIN###"));
    }
}
