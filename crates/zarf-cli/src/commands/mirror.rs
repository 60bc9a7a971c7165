//! `zarf package mirror-resources`

use console::style;
use std::path::{Path, PathBuf};

use zarf_packager::MirrorOptions;

use crate::config::ZarfConfig;
use crate::error::{error_chain, CliError, Result};
use crate::exit_codes;

pub async fn run(
    package: &Path,
    registry_url: Option<String>,
    git_url: Option<String>,
    insecure: bool,
    key: Option<PathBuf>,
) -> Result<()> {
    let config = ZarfConfig::load();
    let options = MirrorOptions {
        package: package.to_path_buf(),
        registry_url: registry_url.or(config.registry_url),
        git_url: git_url.or(config.git_url),
        insecure,
        public_key: key,
    };
    if options.registry_url.is_none() && options.git_url.is_none() {
        return Err(CliError::new(
            "nothing to mirror: pass --registry-url and/or --git-url",
            exit_codes::MIRROR_PUSH,
        ));
    }

    let summary = zarf_packager::mirror(&options)
        .await
        .map_err(|e| CliError::new(error_chain(&e), exit_codes::MIRROR_PUSH))?;

    for (original, mirrored) in &summary.images {
        println!("{} {original} -> {mirrored}", style("image").cyan());
    }
    for repo in &summary.repos {
        println!("{} {repo}", style("repo").cyan());
    }
    println!(
        "{} {} image(s), {} repo(s)",
        style("Mirrored").green().bold(),
        summary.images.len(),
        summary.repos.len(),
    );
    Ok(())
}
