//! Zarf Core - types and pure logic for the airgap package lifecycle
//!
//! This crate provides the foundational pieces used throughout zarf:
//! - The package data model (`ZarfPackage`, `ZarfComponent`, charts, actions)
//! - `VariableConfig`: constants, variables, and token substitution
//! - The component planner: imports, flavors, and selection filters
//! - Schema migration between manifest versions
//! - The package archive format: checksums, signing, tar.zst layout
//! - Deterministic image reference rewriting for the in-cluster registry
//!
//! Everything here is synchronous and cluster-free; network and Kubernetes
//! concerns live in `zarf-fetch` and `zarf-kube`.

pub mod archive;
pub mod checksums;
pub mod error;
pub mod image_ref;
pub mod migrate;
pub mod planner;
pub mod signing;
pub mod types;
pub mod variables;

pub use archive::{extract_package, tar_directory, PackageLayout, COMPONENTS_DIR, IMAGES_DIR};
pub use checksums::{hash_bytes, hash_file, Checksums, FileEntry, CHECKSUMS_TXT, SIGNATURE_FILE};
pub use error::{CoreError, Result};
pub use image_ref::{mutate_reference, ImageRef};
pub use migrate::{downgrade_to_v0, migrate, Migrated};
pub use planner::{
    plan, plan_create, resolve_imports, LocalOnlyResolver, PlanOptions, SkeletonResolver,
};
pub use types::*;
pub use variables::{fingerprint, SetVariable, VariableConfig};
