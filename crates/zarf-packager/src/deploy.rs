//! The deploy verb: replay an archive into a cluster
//!
//! Pipeline: verify archive -> filter selected components -> per component:
//! onDeploy.before, image push, chart install + wait, file placement, data
//! injection, component waits, onDeploy.after -> onSuccess/onFailure ->
//! record state. Components run strictly sequentially so captured variables
//! flow forward.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use zarf_core::{plan, PackageLayout, PlanOptions, VariableConfig, ZarfComponent};
use zarf_fetch::ImageTransport;
use zarf_kube::{
    generate_manifest_chart, render_chart, substitute_values_files, wait_cluster, ActionContext,
    ChartInstaller, Cluster, DataInjector, DeployedComponent, DeployedPackage, InstallRequest,
    InstalledRelease, PreparedChart, ZarfState,
};

use crate::create::parse_architecture;
use crate::error::{PackagerError, Result};
use crate::layout::{component_digest, load_package, LoadOptions, Scratch};
use crate::mirror::push_repos_from;
use crate::VERB_DEPLOY;

/// Default per-component wait budget
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    /// Path to the package archive (or an extracted tree)
    pub package: PathBuf,
    /// `--components` selection
    pub components: String,
    /// Variable overrides from --set and ZARF_VAR_* env
    pub set: BTreeMap<String, String>,
    /// Override the registry recorded in cluster state
    pub registry_url: Option<String>,
    /// Downgrade signature failures to warnings
    pub insecure: bool,
    pub public_key: Option<PathBuf>,
    /// Per-component wait budget; None takes the default
    pub timeout: Option<Duration>,
}

/// What a deploy did, for display
#[derive(Debug, Default)]
pub struct DeploySummary {
    pub package: String,
    pub deployed_components: Vec<String>,
    /// Original image reference to in-cluster reference
    pub image_mapping: BTreeMap<String, String>,
}

/// Deploy a package archive into the connected cluster
pub async fn deploy(options: &DeployOptions) -> Result<DeploySummary> {
    let scratch = Scratch::new()?;
    let loaded = load_package(
        &options.package,
        &scratch,
        &LoadOptions {
            insecure: options.insecure,
            public_key: options.public_key.clone(),
        },
    )?;
    let package = loaded.package;
    let layout = loaded.layout;

    let architecture = package
        .metadata
        .architecture
        .clone()
        .unwrap_or_else(|| "amd64".into());
    let plan_options = PlanOptions {
        architecture: parse_architecture(&architecture),
        ..Default::default()
    }
    .with_requested(&options.components);
    let selected = plan(&package.components, &plan_options)?;
    let explicit: Vec<String> = plan_options.requested.clone();

    let variables = VariableConfig::new(&package.constants, &package.variables)?;
    variables.set_overrides(&options.set)?;

    let needs_cluster = selected.iter().any(|c| c.requires_cluster());
    let cluster = if needs_cluster {
        Some(Cluster::connect().await?)
    } else {
        None
    };

    let mut state = match &cluster {
        Some(cluster) => match cluster.load_state().await {
            Ok(state) => state,
            Err(zarf_kube::KubeError::StateNotFound) if options.registry_url.is_some() => {
                ZarfState::default()
            }
            Err(e) => return Err(e.into()),
        },
        None => ZarfState::default(),
    };
    let registry = options
        .registry_url
        .clone()
        .unwrap_or_else(|| state.registry_info.address.clone());

    let timeout = options.timeout.unwrap_or(DEFAULT_TIMEOUT);
    let mut summary = DeploySummary {
        package: package.metadata.name.clone(),
        ..Default::default()
    };
    let mut record = DeployedPackage {
        name: package.metadata.name.clone(),
        version: package.metadata.version.clone(),
        components: Vec::new(),
    };

    let mut images_pushed = false;
    for component in &selected {
        if component.requires_cluster() && registry.is_empty() {
            return Err(PackagerError::NoRegistry);
        }

        // Images land in the registry before any chart that references them.
        if !images_pushed && !component.images.is_empty() {
            let transport = ImageTransport::default();
            let mapping = transport
                .push_images(&layout.images_dir(), &registry)
                .await
                .map_err(|e| {
                    PackagerError::from(e).in_component(VERB_DEPLOY, &component.name, "image push")
                })?;
            summary.image_mapping.extend(mapping);
            images_pushed = true;
        }

        let result = deploy_component(
            component,
            &layout,
            &scratch,
            &variables,
            cluster.as_ref(),
            &state,
            timeout,
        )
        .await;

        match result {
            Ok(releases) => {
                record.components.push(DeployedComponent {
                    name: component.name.clone(),
                    digest: component_digest(&layout, &component.name)?,
                    installed_releases: releases,
                });
                summary.deployed_components.push(component.name.clone());
            }
            Err(e) => {
                let explicitly_selected = explicit.iter().any(|s| s == &component.name);
                let optional = component.required != Some(true);
                let wrapped = e.in_component(VERB_DEPLOY, &component.name, "deploy");
                if optional && !explicitly_selected {
                    warn!(
                        component = %component.name,
                        error = %wrapped,
                        "optional component failed, continuing"
                    );
                    continue;
                }
                // Persist what succeeded before aborting.
                if let Some(cluster) = &cluster {
                    if !record.components.is_empty() {
                        state.record_package(record.clone());
                        let _ = cluster.save_state(&state).await;
                    }
                }
                return Err(wrapped);
            }
        }
    }

    if let Some(cluster) = &cluster {
        state.record_package(record);
        cluster.save_state(&state).await?;
    }

    info!(
        package = %summary.package,
        components = summary.deployed_components.len(),
        "deploy complete"
    );
    Ok(summary)
}

/// Run one component's deploy sequence. Returns the installed releases for
/// the state record.
async fn deploy_component(
    component: &ZarfComponent,
    layout: &PackageLayout,
    scratch: &Scratch,
    variables: &VariableConfig,
    cluster: Option<&Cluster>,
    state: &ZarfState,
    timeout: Duration,
) -> Result<Vec<InstalledRelease>> {
    info!(component = %component.name, "deploying component");
    let set = &component.actions.on_deploy;
    let actions = match cluster {
        Some(cluster) => ActionContext::new(variables).with_cluster(cluster.resources()),
        None => ActionContext::new(variables),
    };

    let mut releases = Vec::new();
    let result = async {
        actions.run_list(&set.defaults, &set.before).await?;

        let staged = if layout
            .components_dir()
            .join(format!("{}.tar", component.name))
            .is_file()
        {
            Some(layout.open_component(&component.name)?)
        } else {
            None
        };

        if let Some(staged) = &staged {
            let repos_dir = staged.join("repos");
            if cluster.is_some() && repos_dir.is_dir() && !state.git_server.address.is_empty() {
                push_repos_from(&repos_dir, &state.git_server.address).await?;
            }
        }

        if let Some(staged) = &staged {
            place_files(component, staged, variables)?;
        }

        if let (Some(staged), Some(cluster)) = (&staged, cluster) {
            releases =
                install_charts(component, staged, scratch, variables, cluster, timeout).await?;

            let injector = DataInjector::new(cluster.client().clone());
            for (index, injection) in component.data_injections.iter().enumerate() {
                let source = staged.join("data").join(index.to_string());
                injector.inject(injection, &source, timeout).await?;
            }

            for wait in &component.waits {
                wait_cluster(cluster.resources(), wait, timeout).await?;
            }
        }

        actions.run_list(&set.defaults, &set.after).await?;
        Ok::<(), PackagerError>(())
    }
    .await;

    match result {
        Ok(()) => {
            if let Err(e) = actions.run_list(&set.defaults, &set.on_success).await {
                warn!(component = %component.name, error = %e, "onSuccess action failed");
            }
            Ok(releases)
        }
        Err(e) => {
            // onFailure runs on any failure and never flips the outcome.
            if let Err(failure) = actions.run_list(&set.defaults, &set.on_failure).await {
                warn!(component = %component.name, error = %failure, "onFailure action failed");
            }
            Err(e)
        }
    }
}

/// Install the component's charts and generated manifest charts, serially,
/// each waiting for readiness before the next begins
async fn install_charts(
    component: &ZarfComponent,
    staged: &Path,
    scratch: &Scratch,
    variables: &VariableConfig,
    cluster: &Cluster,
    timeout: Duration,
) -> Result<Vec<InstalledRelease>> {
    let installer = ChartInstaller::new(cluster.resources());
    let mut releases = Vec::new();

    for chart in &component.charts {
        let chart_dir = staged.join("charts").join(&chart.name);
        let values_scratch = scratch.subdir(&format!("values-{}-{}", component.name, chart.name))?;

        // Values precedence: chart defaults < values files in order <
        // variable overrides on their dotted paths.
        let mut staged_values: Vec<PathBuf> = Vec::new();
        for index in 0..chart.values_files.len() {
            staged_values.push(chart_dir.join(format!("zarf-values-{index}.yaml")));
        }
        let values_files = substitute_values_files(variables, &staged_values, &values_scratch)
            .map_err(PackagerError::from)?;

        let mut set_values = Vec::new();
        for variable in &chart.variables {
            if let Some(value) = variables.resolve(&variable.name) {
                set_values.push((variable.path.clone(), value));
            }
        }

        let namespace = chart
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        let prepared = PreparedChart {
            name: chart.name.clone(),
            release_name: chart.release_name().to_string(),
            namespace: namespace.clone(),
            chart_dir,
            values_files,
            set_values,
            wait: chart.wait,
            generated: false,
        };
        let manifest = render_chart(&prepared).await?;
        let manifest = variables.substitute(&manifest)?;

        installer
            .install(&InstallRequest {
                chart_name: prepared.name.clone(),
                release_name: prepared.release_name.clone(),
                namespace: namespace.clone(),
                manifest,
                wait: prepared.wait,
                timeout,
            })
            .await?;
        releases.push(InstalledRelease {
            name: prepared.release_name,
            namespace,
        });
    }

    for manifest in &component.manifests {
        let manifest_dir = staged.join("manifests").join(&manifest.name);
        let mut files: Vec<PathBuf> = std::fs::read_dir(&manifest_dir)
            .map_err(PackagerError::Io)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .collect();
        files.sort();

        let charts_scratch = scratch.subdir(&format!("raw-{}", component.name))?;
        let chart_dir =
            generate_manifest_chart(&component.name, &manifest.name, &files, &charts_scratch)?;
        let namespace = manifest
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        let prepared = PreparedChart {
            name: format!("raw-{}-{}", component.name, manifest.name),
            release_name: format!("raw-{}-{}", component.name, manifest.name),
            namespace: namespace.clone(),
            chart_dir,
            values_files: Vec::new(),
            set_values: Vec::new(),
            wait: manifest.wait,
            generated: true,
        };
        let rendered = render_chart(&prepared).await?;
        let rendered = variables.substitute(&rendered)?;

        installer
            .install(&InstallRequest {
                chart_name: prepared.name.clone(),
                release_name: prepared.release_name.clone(),
                namespace: namespace.clone(),
                manifest: rendered,
                wait: prepared.wait,
                timeout,
            })
            .await?;
        releases.push(InstalledRelease {
            name: prepared.release_name,
            namespace,
        });
    }

    Ok(releases)
}

/// Place `files` entries at their targets, substituting variables in text
/// files without touching the staged copies
fn place_files(
    component: &ZarfComponent,
    staged: &Path,
    variables: &VariableConfig,
) -> Result<()> {
    for (index, file) in component.files.iter().enumerate() {
        let source_dir = staged.join("files").join(index.to_string());
        let Some(entry) = std::fs::read_dir(&source_dir)?.flatten().next() else {
            continue;
        };
        let source = entry.path();
        let target = PathBuf::from(variables.substitute(&file.target)?);

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if source.is_dir() {
            zarf_fetch::copy_dir(&source, &target)?;
        } else {
            let bytes = std::fs::read(&source)?;
            match std::str::from_utf8(&bytes) {
                Ok(text) if text.contains(zarf_core::TEMPLATE_MARKER) => {
                    std::fs::write(&target, variables.substitute(text)?)?;
                }
                _ => {
                    std::fs::write(&target, &bytes)?;
                }
            }
        }

        #[cfg(unix)]
        if file.executable {
            use std::os::unix::fs::PermissionsExt;
            let mut permissions = std::fs::metadata(&target)?.permissions();
            permissions.set_mode(permissions.mode() | 0o755);
            std::fs::set_permissions(&target, permissions)?;
        }

        for link in &file.symlinks {
            let link = PathBuf::from(variables.substitute(link)?);
            if let Some(parent) = link.parent() {
                std::fs::create_dir_all(parent)?;
            }
            #[cfg(unix)]
            {
                let _ = std::fs::remove_file(&link);
                std::os::unix::fs::symlink(&target, &link)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create::{create, CreateOptions};
    use tempfile::TempDir;

    /// S6: a tampered archive never reaches the cluster.
    #[tokio::test]
    async fn test_tampered_archive_fails_before_cluster() {
        let package_dir = TempDir::new().unwrap();
        std::fs::write(package_dir.path().join("app.conf"), "port=8080\n").unwrap();
        std::fs::write(
            package_dir.path().join("zarf.yaml"),
            r####"
apiVersion: zarf.dev/v1
kind: ZarfPackageConfig
metadata:
  name: tamper-check
  version: 0.1.0
components:
  - name: config
    required: true
    files:
      - source: app.conf
        target: "###ZARF_VAR_TARGET_DIR###/app.conf"
"####,
        )
        .unwrap();

        let output = TempDir::new().unwrap();
        let archive = create(&CreateOptions {
            package_dir: package_dir.path().to_path_buf(),
            output_dir: output.path().to_path_buf(),
            ..Default::default()
        })
        .await
        .unwrap();

        // Re-pack the archive with one flipped byte inside the component tar.
        let extracted = TempDir::new().unwrap();
        let layout = zarf_core::extract_package(&archive, extracted.path()).unwrap();
        let tar_path = layout.components_dir().join("config.tar");
        let mut bytes = std::fs::read(&tar_path).unwrap();
        let index = bytes.len() / 2;
        bytes[index] ^= 0xff;
        std::fs::write(&tar_path, bytes).unwrap();

        let target_dir = TempDir::new().unwrap();
        let err = deploy(&DeployOptions {
            package: extracted.path().to_path_buf(),
            set: [(
                "TARGET_DIR".to_string(),
                target_dir.path().display().to_string(),
            )]
            .into_iter()
            .collect(),
            ..Default::default()
        })
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            PackagerError::Core(zarf_core::CoreError::ChecksumMismatch { .. })
        ));
        assert!(
            !target_dir.path().join("app.conf").exists(),
            "nothing may be deployed from a tampered archive"
        );
    }

    /// A cluster-free package deploys end to end: files placed, variables
    /// substituted, actions run.
    #[tokio::test]
    async fn test_deploy_files_and_actions_without_cluster() {
        let package_dir = TempDir::new().unwrap();
        std::fs::write(
            package_dir.path().join("motd.txt"),
            "host: ###ZARF_VAR_DOMAIN###\n",
        )
        .unwrap();
        std::fs::write(
            package_dir.path().join("zarf.yaml"),
            r####"
apiVersion: zarf.dev/v1
kind: ZarfPackageConfig
metadata:
  name: local-files
  version: 0.1.0
variables:
  - name: DOMAIN
    default: airgap.local
components:
  - name: motd
    required: true
    files:
      - source: motd.txt
        target: "###ZARF_VAR_TARGET_DIR###/motd.txt"
    actions:
      onDeploy:
        after:
          - cmd: test -f "###ZARF_VAR_TARGET_DIR###/motd.txt"
            mute: true
"####,
        )
        .unwrap();

        let output = TempDir::new().unwrap();
        let archive = create(&CreateOptions {
            package_dir: package_dir.path().to_path_buf(),
            output_dir: output.path().to_path_buf(),
            ..Default::default()
        })
        .await
        .unwrap();

        let target_dir = TempDir::new().unwrap();
        let summary = deploy(&DeployOptions {
            package: archive,
            set: [(
                "TARGET_DIR".to_string(),
                target_dir.path().display().to_string(),
            )]
            .into_iter()
            .collect(),
            ..Default::default()
        })
        .await
        .unwrap();

        assert_eq!(summary.deployed_components, vec!["motd"]);
        assert_eq!(
            std::fs::read_to_string(target_dir.path().join("motd.txt")).unwrap(),
            "host: airgap.local\n"
        );
    }
}
