//! `zarf package remove`

use console::style;

use zarf_packager::RemoveOptions;

use crate::config::{merge_variables, ZarfConfig};
use crate::error::{error_chain, CliError, Result};
use crate::exit_codes;

pub async fn run(target: &str, components: &str, confirm: bool, set: &[String]) -> Result<()> {
    let config = ZarfConfig::load();
    let set =
        merge_variables(&config, set).map_err(|e| CliError::new(e, exit_codes::REMOVE_MISSING))?;

    super::confirm_or_prompt(
        confirm,
        &format!("Remove package {target}?"),
        exit_codes::REMOVE_MISSING,
    )?;

    let options = RemoveOptions {
        target: target.to_string(),
        components: components.to_string(),
        set,
    };
    let removed = zarf_packager::remove(&options)
        .await
        .map_err(|e| CliError::new(error_chain(&e), exit_codes::REMOVE_MISSING))?;

    for component in &removed {
        println!("  {} {component}", style("-").red());
    }
    println!("{} {target}", style("Removed").green().bold());
    Ok(())
}
