//! `zarf package deploy`

use console::style;
use std::path::{Path, PathBuf};
use std::time::Duration;

use zarf_packager::{DeployOptions, PackagerError};

use crate::config::{merge_variables, ZarfConfig};
use crate::error::{error_chain, root_error, CliError, Result};
use crate::exit_codes;

#[allow(clippy::too_many_arguments)]
pub async fn run(
    package: &Path,
    components: &str,
    confirm: bool,
    set: &[String],
    registry_url: Option<String>,
    insecure: bool,
    key: Option<PathBuf>,
    timeout: Option<u64>,
) -> Result<()> {
    let config = ZarfConfig::load();
    let set =
        merge_variables(&config, set).map_err(|e| CliError::new(e, exit_codes::DEPLOY_LOAD))?;
    let components = if components.is_empty() {
        config.components.clone().unwrap_or_default()
    } else {
        components.to_string()
    };

    super::confirm_or_prompt(
        confirm,
        &format!("Deploy package {}?", package.display()),
        exit_codes::DEPLOY_LOAD,
    )?;

    let options = DeployOptions {
        package: package.to_path_buf(),
        components,
        set,
        registry_url: registry_url.or(config.registry_url),
        insecure,
        public_key: key,
        timeout: timeout.map(Duration::from_secs),
    };

    let summary = zarf_packager::deploy(&options)
        .await
        .map_err(|e| CliError::new(error_chain(&e), deploy_exit_code(&e)))?;

    println!(
        "{} package {} ({} component{})",
        style("Deployed").green().bold(),
        summary.package,
        summary.deployed_components.len(),
        if summary.deployed_components.len() == 1 {
            ""
        } else {
            "s"
        },
    );
    for component in &summary.deployed_components {
        println!("  {} {component}", style("+").green());
    }
    Ok(())
}

/// deploy exits 1 on load, 2 on deploy, 3 on wait timeout
fn deploy_exit_code(err: &PackagerError) -> i32 {
    use zarf_kube::KubeError;
    if let PackagerError::Kube(KubeError::WaitTimeout { .. }) = root_error(err) {
        return exit_codes::DEPLOY_WAIT_TIMEOUT;
    }
    // Anything that failed before a component started executing is a load
    // failure; component failures are always wrapped with their context.
    match err {
        PackagerError::Component { .. } => exit_codes::DEPLOY_FAILED,
        _ => exit_codes::DEPLOY_LOAD,
    }
}
