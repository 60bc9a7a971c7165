//! The mirror verb: push a package's images and repos to external targets
//!
//! Unlike deploy, mirroring goes straight at user-supplied registry and git
//! endpoints without touching cluster state or installing anything.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::info;

use zarf_fetch::ImageTransport;

use crate::error::{PackagerError, Result};
use crate::layout::{load_package, LoadOptions, Scratch};

#[derive(Debug, Clone, Default)]
pub struct MirrorOptions {
    pub package: PathBuf,
    pub registry_url: Option<String>,
    pub git_url: Option<String>,
    pub insecure: bool,
    pub public_key: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct MirrorSummary {
    /// Original to mirrored image reference
    pub images: BTreeMap<String, String>,
    /// Repo directories pushed
    pub repos: Vec<String>,
}

/// Push every bundled image and repo to the given endpoints
pub async fn mirror(options: &MirrorOptions) -> Result<MirrorSummary> {
    let scratch = Scratch::new()?;
    let loaded = load_package(
        &options.package,
        &scratch,
        &LoadOptions {
            insecure: options.insecure,
            public_key: options.public_key.clone(),
        },
    )?;
    let layout = loaded.layout;

    let mut summary = MirrorSummary::default();

    if let Some(registry) = &options.registry_url {
        if layout.images_dir().is_dir() {
            let transport = ImageTransport::default();
            summary.images = transport.push_images(&layout.images_dir(), registry).await?;
            info!(count = summary.images.len(), registry, "images mirrored");
        }
    }

    if let Some(git_url) = &options.git_url {
        for component in &loaded.package.components {
            let tar = layout
                .components_dir()
                .join(format!("{}.tar", component.name));
            if !tar.is_file() || component.repos.is_empty() {
                continue;
            }
            let staged = layout.open_component(&component.name)?;
            let repos_dir = staged.join("repos");
            if repos_dir.is_dir() {
                summary.repos.extend(push_repos_from(&repos_dir, git_url).await?);
            }
        }
    }

    Ok(summary)
}

/// Mirror-push every cloned repo under `repos_dir` to the git server
pub async fn push_repos_from(repos_dir: &Path, git_url: &str) -> Result<Vec<String>> {
    let mut pushed = Vec::new();
    for entry in std::fs::read_dir(repos_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let target = format!("{}/{name}.git", git_url.trim_end_matches('/'));
        info!(repo = %name, target = %target, "pushing repository");

        let output = Command::new("git")
            .args(["push", "--mirror", &target])
            .current_dir(entry.path())
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .await?;
        if !output.status.success() {
            return Err(PackagerError::Fetch(zarf_fetch::FetchError::Git {
                url: target,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }));
        }
        pushed.push(name);
    }
    Ok(pushed)
}
