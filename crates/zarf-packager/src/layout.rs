//! Scratch directory ownership and package loading
//!
//! Every verb works inside a scratch directory that is removed when the run
//! ends, success or failure. Derived bytes (rendered charts, fetched files)
//! never land outside it.

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::warn;

use zarf_core::{extract_package, Checksums, Migrated, PackageLayout, CHECKSUMS_TXT};

use crate::error::{PackagerError, Result};

/// Scratch space for one verb; deleted on drop
pub struct Scratch {
    dir: TempDir,
}

impl Scratch {
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("zarf-").tempdir()?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// A fresh subdirectory inside the scratch space
    pub fn subdir(&self, name: &str) -> Result<PathBuf> {
        let path = self.dir.path().join(name);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }
}

/// How strictly to treat integrity failures on load
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Downgrade signature problems to warnings
    pub insecure: bool,
    /// Verification key for signed packages
    pub public_key: Option<PathBuf>,
}

/// A verified, migrated package extracted into scratch
pub struct LoadedPackage {
    pub layout: PackageLayout,
    pub package: zarf_core::ZarfPackage,
    pub applied_migrations: Vec<String>,
}

/// Extract a package archive, verify integrity and signature, and migrate
/// the manifest. Nothing touches the cluster before this succeeds.
pub fn load_package(
    archive: &Path,
    scratch: &Scratch,
    options: &LoadOptions,
) -> Result<LoadedPackage> {
    let dest = scratch.subdir("package")?;
    let layout = if archive.is_dir() {
        // Already-extracted trees (mostly tests and `inspect` of a build
        // directory) load in place.
        PackageLayout::new(archive)
    } else {
        extract_package(archive, &dest)?
    };

    let Migrated { package, applied } = layout.read_package()?;

    let expected = package
        .build
        .as_ref()
        .map(|b| b.aggregate_checksum.clone())
        .unwrap_or_default();
    layout.verify_checksums(&expected)?;

    if layout.is_signed() {
        match &options.public_key {
            Some(key) => zarf_core::signing::verify_tree(&layout.root, key)?,
            None if options.insecure => {
                warn!("package is signed but --insecure was set; skipping verification")
            }
            None => return Err(zarf_core::CoreError::SignatureKeyMissing.into()),
        }
    } else if options.public_key.is_some() {
        return Err(PackagerError::Core(zarf_core::CoreError::SignatureInvalid {
            message: "a key was provided but the package is unsigned".into(),
        }));
    }

    Ok(LoadedPackage {
        layout,
        package,
        applied_migrations: applied,
    })
}

/// Per-file digests of the package tree, for recording component digests in
/// cluster state
pub fn component_digest(layout: &PackageLayout, component: &str) -> Result<String> {
    let content = std::fs::read_to_string(layout.root.join(CHECKSUMS_TXT))?;
    let checksums = Checksums::parse(&content)?;
    let path = format!("components/{component}.tar");
    Ok(checksums
        .files
        .iter()
        .find(|f| f.path == path)
        .map(|f| f.sha256.clone())
        .unwrap_or_default())
}
