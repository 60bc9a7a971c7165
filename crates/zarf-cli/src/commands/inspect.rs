//! `zarf package inspect`

use console::style;
use std::path::{Path, PathBuf};

use crate::error::{error_chain, CliError, Result};
use crate::exit_codes;

pub async fn run(package: &Path, key: Option<PathBuf>) -> Result<()> {
    let report = zarf_packager::inspect(package, key)
        .await
        .map_err(|e| CliError::new(error_chain(&e), exit_codes::INSPECT_LOAD))?;

    let yaml = report
        .package
        .to_yaml()
        .map_err(|e| CliError::new(e.to_string(), exit_codes::INSPECT_LOAD))?;
    println!("{yaml}");

    if !report.applied_migrations.is_empty() {
        eprintln!(
            "{} migrations applied at load: {}",
            style("note:").yellow(),
            report.applied_migrations.join(", ")
        );
    }
    if report.signed {
        match report.signature_verified {
            Some(true) => eprintln!("{} signature verified", style("ok:").green()),
            _ => eprintln!(
                "{} package is signed; pass --key to verify",
                style("note:").yellow()
            ),
        }
    }
    Ok(())
}
