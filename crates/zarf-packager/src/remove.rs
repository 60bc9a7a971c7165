//! The remove verb: tear down a deployed package
//!
//! Removal is driven by the `zarf-state` record of what deploy installed:
//! components tear down in reverse deploy order, each release uninstalled in
//! reverse install order. When the package definition is available (a path
//! was given), `onRemove` actions run around the teardown.

use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

use zarf_core::{VariableConfig, ZarfPackage};
use zarf_kube::{ActionContext, ChartInstaller, Cluster};

use crate::error::{PackagerError, Result};
use crate::layout::{load_package, LoadOptions, Scratch};
use crate::VERB_REMOVE;

#[derive(Debug, Clone, Default)]
pub struct RemoveOptions {
    /// A deployed package name, or a path to its archive
    pub target: String,
    /// `--components` selection; empty removes everything
    pub components: String,
    pub set: BTreeMap<String, String>,
}

/// Remove a deployed package (or a selection of its components)
pub async fn remove(options: &RemoveOptions) -> Result<Vec<String>> {
    let path = PathBuf::from(&options.target);
    let package: Option<ZarfPackage> = if path.exists() {
        let scratch = Scratch::new()?;
        Some(
            load_package(
                &path,
                &scratch,
                &LoadOptions {
                    insecure: true,
                    public_key: None,
                },
            )?
            .package,
        )
    } else {
        None
    };
    let package_name = package
        .as_ref()
        .map(|p| p.metadata.name.clone())
        .unwrap_or_else(|| options.target.clone());

    let cluster = Cluster::connect().await?;
    let mut state = cluster.load_state().await?;
    let deployed = state
        .get_package(&package_name)
        .cloned()
        .ok_or_else(|| PackagerError::PackageNotDeployed {
            name: package_name.clone(),
        })?;

    let selected: Vec<String> = options
        .components
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    let remove_all = selected.is_empty();

    let variables = match &package {
        Some(package) => VariableConfig::new(&package.constants, &package.variables)?,
        None => VariableConfig::new(&[], &[])?,
    };
    variables.set_overrides(&options.set)?;
    let actions = ActionContext::new(&variables).with_cluster(cluster.resources());
    let installer = ChartInstaller::new(cluster.resources());

    let mut removed = Vec::new();
    let mut remaining = deployed.components.clone();

    for component in deployed.components.iter().rev() {
        if !remove_all && !selected.iter().any(|s| s == &component.name) {
            continue;
        }
        info!(component = %component.name, "removing component");

        let action_set = package.as_ref().and_then(|p| {
            p.components
                .iter()
                .find(|c| c.name == component.name)
                .map(|c| c.actions.on_remove.clone())
        });

        let result = async {
            if let Some(set) = &action_set {
                actions.run_list(&set.defaults, &set.before).await?;
            }
            for release in component.installed_releases.iter().rev() {
                installer.uninstall(&release.namespace, &release.name).await?;
            }
            if let Some(set) = &action_set {
                actions.run_list(&set.defaults, &set.after).await?;
            }
            Ok::<(), PackagerError>(())
        }
        .await;

        match result {
            Ok(()) => {
                if let Some(set) = &action_set {
                    if let Err(e) = actions.run_list(&set.defaults, &set.on_success).await {
                        warn!(component = %component.name, error = %e, "onSuccess action failed");
                    }
                }
                remaining.retain(|c| c.name != component.name);
                removed.push(component.name.clone());
            }
            Err(e) => {
                if let Some(set) = &action_set {
                    if let Err(failure) = actions.run_list(&set.defaults, &set.on_failure).await {
                        warn!(component = %component.name, error = %failure, "onFailure action failed");
                    }
                }
                // Persist partial progress so a retry resumes cleanly.
                if remaining.len() != deployed.components.len() {
                    let mut record = deployed.clone();
                    record.components = remaining;
                    state.record_package(record);
                    let _ = cluster.save_state(&state).await;
                }
                return Err(e.in_component(VERB_REMOVE, &component.name, "uninstall"));
            }
        }
    }

    if remaining.is_empty() {
        state.remove_package(&package_name);
    } else {
        let mut record = deployed;
        record.components = remaining;
        state.record_package(record);
    }
    cluster.save_state(&state).await?;

    Ok(removed)
}
