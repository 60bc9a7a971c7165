//! CLI subcommands

pub mod connect;
pub mod create;
pub mod deploy;
pub mod dev;
pub mod inspect;
pub mod mirror;
pub mod remove;

use console::style;
use std::io::Write;

use crate::error::{CliError, Result};

/// Ask for confirmation on the terminal unless --confirm was given
pub fn confirm_or_prompt(confirm: bool, prompt: &str, failure_code: i32) -> Result<()> {
    if confirm {
        return Ok(());
    }
    print!("{} {prompt} [y/N] ", style("?").yellow().bold());
    let _ = std::io::stdout().flush();

    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err()
        || !matches!(answer.trim(), "y" | "Y" | "yes")
    {
        return Err(CliError::new("operation not confirmed", failure_code));
    }
    Ok(())
}
