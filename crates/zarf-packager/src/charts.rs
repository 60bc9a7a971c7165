//! Create-time chart staging
//!
//! Normalises every chart source into `charts/<name>/` inside the staged
//! component, so deploy only ever sees local chart directories. Values files
//! are fetched alongside as `zarf-values-<n>.yaml` in listed order.

use std::path::{Path, PathBuf};
use tracing::debug;

use zarf_core::ZarfChart;
use zarf_fetch::{copy_dir, unpack_archive, FetchRequest, Fetcher, HttpFetcher, OciFetcher};

use crate::error::{PackagerError, Result};

/// Stage one chart into the component directory
pub async fn stage_chart(
    chart: &ZarfChart,
    component_dir: &Path,
    package_root: &Path,
    scratch: &Path,
    fetcher: &Fetcher,
    http: &HttpFetcher,
    oci: &OciFetcher,
) -> Result<PathBuf> {
    let dest = component_dir.join("charts").join(&chart.name);
    std::fs::create_dir_all(&dest)?;

    if let Some(helm) = &chart.helm {
        let version = chart.version.as_deref().unwrap_or_default();
        let chart_name = helm.repo_name.as_deref().unwrap_or(&chart.name);
        let tgz_url = resolve_repo_chart(http, &helm.url, chart_name, version, scratch).await?;
        let tgz = scratch.join(format!("{}-{version}.tgz", chart.name));
        http.download(&tgz_url, &tgz, None).await?;
        unpack_chart_tgz(&tgz, &dest, scratch)?;
    } else if let Some(oci_source) = &chart.oci {
        let version = chart.version.as_deref().unwrap_or_default();
        let reference = format!("{}:{version}", oci_source.url.trim_end_matches('/'));
        let tgz = scratch.join(format!("{}-{version}.tgz", chart.name));
        oci.pull_blob_to(&reference, &tgz).await?;
        unpack_chart_tgz(&tgz, &dest, scratch)?;
    } else if let Some(git) = &chart.git {
        let source = match chart.version.as_deref() {
            Some(version) if !git.url.contains('@') && !git.url.contains('#') => {
                format!("{}@{version}", git.url)
            }
            _ => git.url.clone(),
        };
        let clone_dir = scratch.join(format!("git-{}", chart.name));
        zarf_fetch::git::shallow_clone(&source, &clone_dir).await?;
        let chart_src = match &git.path {
            Some(path) => clone_dir.join(path),
            None => clone_dir.clone(),
        };
        copy_dir(&chart_src, &dest)?;
    } else if let Some(local) = &chart.local {
        let source = package_root.join(&local.path);
        if source.is_dir() {
            copy_dir(&source, &dest)?;
        } else {
            unpack_chart_tgz(&source, &dest, scratch)?;
        }
    }

    // Values files ride along in listed order; substitution happens at
    // deploy into scratch copies.
    for (index, values) in chart.values_files.iter().enumerate() {
        let target = dest.join(format!("zarf-values-{index}.yaml"));
        let request = FetchRequest {
            source: values.clone(),
            ..Default::default()
        };
        let fetched = fetcher.fetch(&request, scratch, package_root).await?;
        std::fs::copy(&fetched.path, &target)?;
    }

    debug!(chart = %chart.name, dest = %dest.display(), "staged chart");
    Ok(dest)
}

/// Resolve a chart's tgz URL through the repository's index.yaml
async fn resolve_repo_chart(
    http: &HttpFetcher,
    repo_url: &str,
    chart_name: &str,
    version: &str,
    scratch: &Path,
) -> Result<String> {
    let repo_url = repo_url.trim_end_matches('/');
    let index_path = scratch.join("index.yaml");
    http.download(&format!("{repo_url}/index.yaml"), &index_path, None)
        .await?;

    let index: serde_yaml::Value =
        serde_yaml::from_slice(&std::fs::read(&index_path)?).map_err(zarf_core::CoreError::from)?;
    let entries = index
        .get("entries")
        .and_then(|e| e.get(chart_name))
        .and_then(serde_yaml::Value::as_sequence)
        .ok_or_else(|| chart_error(chart_name, "chart not present in repository index"))?;
    let entry = entries
        .iter()
        .find(|e| {
            e.get("version").and_then(serde_yaml::Value::as_str) == Some(version)
        })
        .ok_or_else(|| chart_error(chart_name, "requested version not in repository index"))?;
    let url = entry
        .get("urls")
        .and_then(serde_yaml::Value::as_sequence)
        .and_then(|u| u.first())
        .and_then(serde_yaml::Value::as_str)
        .ok_or_else(|| chart_error(chart_name, "index entry has no download URL"))?;

    // Index URLs may be relative to the repository root.
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(url.to_string())
    } else {
        Ok(format!("{repo_url}/{url}"))
    }
}

/// Unpack a chart tgz and flatten its single top-level directory into dest
fn unpack_chart_tgz(tgz: &Path, dest: &Path, scratch: &Path) -> Result<()> {
    let unpacked = scratch.join(format!(
        "unpack-{}",
        tgz.file_stem().unwrap_or_default().to_string_lossy()
    ));
    std::fs::create_dir_all(&unpacked)?;
    unpack_archive(tgz, &unpacked)?;

    let mut entries: Vec<PathBuf> = std::fs::read_dir(&unpacked)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    let source = match entries.len() {
        1 if entries[0].is_dir() => entries.remove(0),
        _ => unpacked.clone(),
    };
    copy_dir(&source, dest)?;
    Ok(())
}

fn chart_error(chart: &str, message: &str) -> PackagerError {
    PackagerError::Kube(zarf_kube::KubeError::ChartInstall {
        chart: chart.to_string(),
        message: message.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_chart_dir_staged() {
        let root = TempDir::new().unwrap();
        let chart_src = root.path().join("chart");
        std::fs::create_dir_all(chart_src.join("templates")).unwrap();
        std::fs::write(chart_src.join("Chart.yaml"), "name: app\n").unwrap();
        std::fs::write(chart_src.join("templates/cm.yaml"), "kind: ConfigMap\n").unwrap();

        let chart: ZarfChart = serde_yaml::from_str(
            "name: app\nlocal:\n  path: chart\n",
        )
        .unwrap();

        let component_dir = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let staged = stage_chart(
            &chart,
            component_dir.path(),
            root.path(),
            scratch.path(),
            &Fetcher::default(),
            &HttpFetcher::default(),
            &OciFetcher::default(),
        )
        .await
        .unwrap();

        assert!(staged.join("Chart.yaml").is_file());
        assert!(staged.join("templates/cm.yaml").is_file());
    }

    #[tokio::test]
    async fn test_local_values_files_staged_in_order() {
        let root = TempDir::new().unwrap();
        let chart_src = root.path().join("chart");
        std::fs::create_dir_all(&chart_src).unwrap();
        std::fs::write(chart_src.join("Chart.yaml"), "name: app\n").unwrap();
        std::fs::write(root.path().join("base.yaml"), "a: 1\n").unwrap();
        std::fs::write(root.path().join("prod.yaml"), "a: 2\n").unwrap();

        let chart: ZarfChart = serde_yaml::from_str(
            "name: app\nlocal:\n  path: chart\nvaluesFiles:\n  - base.yaml\n  - prod.yaml\n",
        )
        .unwrap();

        let component_dir = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let staged = stage_chart(
            &chart,
            component_dir.path(),
            root.path(),
            scratch.path(),
            &Fetcher::default(),
            &HttpFetcher::default(),
            &OciFetcher::default(),
        )
        .await
        .unwrap();

        assert_eq!(
            std::fs::read_to_string(staged.join("zarf-values-0.yaml")).unwrap(),
            "a: 1\n"
        );
        assert_eq!(
            std::fs::read_to_string(staged.join("zarf-values-1.yaml")).unwrap(),
            "a: 2\n"
        );
    }
}
