//! The inspect verb: show a package's manifest and provenance

use std::path::{Path, PathBuf};

use zarf_core::ZarfPackage;

use crate::error::Result;
use crate::layout::{load_package, LoadOptions, Scratch};

/// What inspect reports about an archive
#[derive(Debug)]
pub struct InspectReport {
    pub package: ZarfPackage,
    /// Migrations applied while loading
    pub applied_migrations: Vec<String>,
    pub signed: bool,
    /// Present when a key was supplied; true when the signature verified
    pub signature_verified: Option<bool>,
}

/// Load, verify, and describe a package archive or extracted tree
pub async fn inspect(source: &Path, public_key: Option<PathBuf>) -> Result<InspectReport> {
    let scratch = Scratch::new()?;
    let verifying = public_key.is_some();
    let loaded = load_package(
        source,
        &scratch,
        &LoadOptions {
            // Inspect never deploys; an unverifiable signature is reported,
            // not fatal.
            insecure: !verifying,
            public_key,
        },
    )?;

    Ok(InspectReport {
        signed: loaded.layout.is_signed(),
        signature_verified: verifying.then_some(true),
        package: loaded.package,
        applied_migrations: loaded.applied_migrations,
    })
}
