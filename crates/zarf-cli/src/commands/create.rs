//! `zarf package create`

use console::style;
use std::path::{Path, PathBuf};

use zarf_packager::{CreateOptions, PackagerError};

use crate::config::{merge_variables, ZarfConfig};
use crate::error::{error_chain, root_error, CliError, Result};
use crate::exit_codes;

#[allow(clippy::too_many_arguments)]
pub async fn run(
    dir: &Path,
    flavor: Option<String>,
    confirm: bool,
    set: &[String],
    output: &Path,
    architecture: Option<String>,
    signing_key: Option<PathBuf>,
    skeleton: bool,
) -> Result<()> {
    let config = ZarfConfig::load();
    let set = merge_variables(&config, set)
        .map_err(|e| CliError::new(e, exit_codes::CREATE_VALIDATION))?;

    super::confirm_or_prompt(
        confirm,
        &format!("Create package from {}?", dir.display()),
        exit_codes::CREATE_VALIDATION,
    )?;

    let options = CreateOptions {
        package_dir: dir.to_path_buf(),
        output_dir: output.to_path_buf(),
        flavor: flavor.or(config.flavor),
        set,
        architecture,
        signing_key,
        signing_key_password: None,
        skeleton,
    };

    let archive = zarf_packager::create(&options)
        .await
        .map_err(|e| CliError::new(error_chain(&e), create_exit_code(&e)))?;

    println!(
        "{} {}",
        style("Created").green().bold(),
        archive.display()
    );
    Ok(())
}

/// create exits 1 on validation, 2 on build, 3 on signing failures
fn create_exit_code(err: &PackagerError) -> i32 {
    use zarf_core::CoreError;
    match root_error(err) {
        PackagerError::Core(core) => match core {
            CoreError::Signing(_) | CoreError::SignatureInvalid { .. } => {
                exit_codes::CREATE_SIGNING
            }
            CoreError::ManifestInvalid { .. }
            | CoreError::UnknownApiVersion { .. }
            | CoreError::VariableValidation { .. }
            | CoreError::VariableMissing { .. }
            | CoreError::ImportCycle { .. }
            | CoreError::ImportNotFound { .. }
            | CoreError::UnsupportedDeprecation { .. }
            | CoreError::RequiredMissing { .. } => exit_codes::CREATE_VALIDATION,
            _ => exit_codes::CREATE_BUILD,
        },
        _ => exit_codes::CREATE_BUILD,
    }
}
