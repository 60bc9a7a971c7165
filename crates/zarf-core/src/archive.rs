//! Package tree layout and archive creation/extraction
//!
//! The on-disk tree of a package:
//!
//! ```text
//! /zarf.yaml                      legacy/v0 schema view
//! /zarfv1.yaml                    present iff apiVersion=v1
//! /checksums.txt                  sha256  relative/path - sorted
//! /signature                      optional, over checksums.txt
//! /components/<name>.tar          one tar per component
//! /images/                        OCI image layout, shared across components
//! /sboms.tar                      optional
//! ```
//!
//! The whole tree ships as `zarf-package-<name>-<arch>-<version>.tar.zst`.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder, Header};

use crate::checksums::{Checksums, CHECKSUMS_TXT, SIGNATURE_FILE};
use crate::error::{CoreError, Result};
use crate::migrate;
use crate::types::{ZarfPackage, API_VERSION_V1, LAYOUT_ZARF_V1_YAML, LAYOUT_ZARF_YAML};

/// zstd level for the outer archive
const ZSTD_LEVEL: i32 = 3;

/// Magic bytes of a zstd frame
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// Directory holding per-component tars inside the tree
pub const COMPONENTS_DIR: &str = "components";

/// Directory holding the shared OCI image layout inside the tree
pub const IMAGES_DIR: &str = "images";

/// A package tree being assembled or inspected on disk
#[derive(Debug)]
pub struct PackageLayout {
    pub root: PathBuf,
}

impl PackageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn components_dir(&self) -> PathBuf {
        self.root.join(COMPONENTS_DIR)
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join(IMAGES_DIR)
    }

    /// Write the manifest views: zarf.yaml always, zarfv1.yaml iff the
    /// package is at v1
    pub fn write_manifests(&self, package: &ZarfPackage) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        if package.api_version == API_VERSION_V1 {
            std::fs::write(
                self.root.join(LAYOUT_ZARF_V1_YAML),
                serde_yaml::to_string(package)?,
            )?;
            let legacy = migrate::downgrade_to_v0(package)?;
            std::fs::write(
                self.root.join(LAYOUT_ZARF_YAML),
                serde_yaml::to_string(&legacy)?,
            )?;
        } else {
            std::fs::write(
                self.root.join(LAYOUT_ZARF_YAML),
                serde_yaml::to_string(package)?,
            )?;
        }
        Ok(())
    }

    /// Tar a staged component directory into `components/<name>.tar` and
    /// drop the staging directory
    pub fn seal_component(&self, name: &str) -> Result<()> {
        let staged = self.components_dir().join(name);
        if !staged.is_dir() {
            return Ok(());
        }
        let dest = self.components_dir().join(format!("{name}.tar"));
        tar_directory(&staged, &dest)?;
        std::fs::remove_dir_all(&staged)?;
        Ok(())
    }

    /// Extract `components/<name>.tar` back into a staging directory
    pub fn open_component(&self, name: &str) -> Result<PathBuf> {
        let tar_path = self.components_dir().join(format!("{name}.tar"));
        let dest = self.components_dir().join(name);
        if dest.is_dir() {
            return Ok(dest);
        }
        if !tar_path.is_file() {
            return Err(CoreError::Archive {
                message: format!("component archive not found: {name}"),
            });
        }
        std::fs::create_dir_all(&dest)?;
        let mut archive = Archive::new(File::open(&tar_path)?);
        archive.unpack(&dest)?;
        Ok(dest)
    }

    /// Hash the tree and write checksums.txt; returns the aggregate checksum
    pub fn finalize_checksums(&self) -> Result<String> {
        let checksums = Checksums::generate(&self.root)?;
        std::fs::write(self.root.join(CHECKSUMS_TXT), checksums.to_string())?;
        Ok(checksums.aggregate())
    }

    /// Verify the tree against checksums.txt and the recorded aggregate
    pub fn verify_checksums(&self, expected_aggregate: &str) -> Result<()> {
        let content = std::fs::read_to_string(self.root.join(CHECKSUMS_TXT))?;
        let checksums = Checksums::parse(&content)?;
        let aggregate = checksums.aggregate();
        if !expected_aggregate.is_empty() && aggregate != expected_aggregate {
            return Err(CoreError::ChecksumMismatch {
                path: CHECKSUMS_TXT.into(),
                expected: expected_aggregate.into(),
                actual: aggregate,
            });
        }
        checksums.verify(&self.root)
    }

    /// True when the tree carries a detached signature
    pub fn is_signed(&self) -> bool {
        self.root.join(SIGNATURE_FILE).is_file()
    }

    /// Load the manifest from the tree, preferring the v1 view and migrating
    /// the legacy view when that is all there is
    pub fn read_package(&self) -> Result<migrate::Migrated> {
        let v1 = self.root.join(LAYOUT_ZARF_V1_YAML);
        let path = if v1.is_file() {
            v1
        } else {
            self.root.join(LAYOUT_ZARF_YAML)
        };
        let doc: serde_yaml::Value = serde_yaml::from_slice(&std::fs::read(path)?)?;
        migrate::migrate(doc)
    }

    /// Compress the tree into the package archive
    pub fn archive(&self, destination: &Path, package: &ZarfPackage) -> Result<PathBuf> {
        std::fs::create_dir_all(destination)?;
        let output = destination.join(package.archive_name());
        let file = File::create(&output)?;

        if package.metadata.uncompressed {
            let mut builder = Builder::new(file);
            append_tree(&mut builder, &self.root)?;
            builder.into_inner()?;
        } else {
            let encoder = zstd::stream::write::Encoder::new(file, ZSTD_LEVEL)
                .map_err(|e| CoreError::Archive {
                    message: format!("zstd encoder: {e}"),
                })?;
            let mut builder = Builder::new(encoder);
            append_tree(&mut builder, &self.root)?;
            let encoder = builder.into_inner()?;
            encoder.finish().map_err(|e| CoreError::Archive {
                message: format!("zstd finish: {e}"),
            })?;
        }

        Ok(output)
    }

    /// Write a skeleton tree: the normalized manifest only, for reuse as an
    /// import source
    pub fn write_skeleton(&self, package: &ZarfPackage) -> Result<()> {
        let mut skeleton = package.clone();
        skeleton.build = None;
        self.write_manifests(&skeleton)?;
        self.finalize_checksums()?;
        Ok(())
    }
}

/// Extract a package archive (zstd-compressed or plain tar) into a directory
pub fn extract_package(archive_path: &Path, dest: &Path) -> Result<PackageLayout> {
    let mut file = File::open(archive_path)?;
    let mut magic = [0u8; 4];
    let n = file.read(&mut magic)?;
    drop(file);

    std::fs::create_dir_all(dest)?;
    let file = File::open(archive_path)?;
    if n == 4 && magic == ZSTD_MAGIC {
        let decoder = zstd::stream::read::Decoder::new(file).map_err(|e| CoreError::Archive {
            message: format!("zstd decoder: {e}"),
        })?;
        Archive::new(decoder).unpack(dest)?;
    } else {
        Archive::new(file).unpack(dest)?;
    }
    Ok(PackageLayout::new(dest))
}

/// Tar a directory into a single file with reproducible headers
pub fn tar_directory(src: &Path, dest: &Path) -> Result<()> {
    let file = File::create(dest)?;
    let mut builder = Builder::new(file);
    append_tree(&mut builder, src)?;
    builder.into_inner()?;
    Ok(())
}

fn append_tree<W: std::io::Write>(builder: &mut Builder<W>, root: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| CoreError::Archive {
            message: format!("failed to walk {}: {e}", root.display()),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        let content = std::fs::read(entry.path())?;

        let mut header = Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0); // Reproducible builds: use epoch time
        header.set_cksum();
        builder.append_data(&mut header, rel, content.as_slice())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_package() -> ZarfPackage {
        ZarfPackage::from_yaml(
            br#"
apiVersion: zarf.dev/v1
kind: ZarfPackageConfig
metadata:
  name: sample
  version: 1.0.0
components:
  - name: web
    required: true
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_write_manifests_emits_both_views_at_v1() {
        let temp = TempDir::new().unwrap();
        let layout = PackageLayout::new(temp.path());
        layout.write_manifests(&sample_package()).unwrap();

        assert!(temp.path().join(LAYOUT_ZARF_YAML).is_file());
        assert!(temp.path().join(LAYOUT_ZARF_V1_YAML).is_file());

        let legacy = std::fs::read_to_string(temp.path().join(LAYOUT_ZARF_YAML)).unwrap();
        assert!(legacy.contains("zarf.dev/v1alpha1"));
    }

    #[test]
    fn test_seal_and_open_component() {
        let temp = TempDir::new().unwrap();
        let layout = PackageLayout::new(temp.path());
        let staged = layout.components_dir().join("web");
        std::fs::create_dir_all(staged.join("files")).unwrap();
        std::fs::write(staged.join("files/index.html"), "<html/>").unwrap();

        layout.seal_component("web").unwrap();
        assert!(layout.components_dir().join("web.tar").is_file());
        assert!(!layout.components_dir().join("web").exists());

        let opened = layout.open_component("web").unwrap();
        assert_eq!(
            std::fs::read_to_string(opened.join("files/index.html")).unwrap(),
            "<html/>"
        );
    }

    #[test]
    fn test_archive_roundtrip() {
        let temp = TempDir::new().unwrap();
        let package = sample_package();

        let tree = temp.path().join("tree");
        let layout = PackageLayout::new(&tree);
        layout.write_manifests(&package).unwrap();
        let aggregate = layout.finalize_checksums().unwrap();

        let archive = layout.archive(&temp.path().join("out"), &package).unwrap();
        assert_eq!(
            archive.file_name().unwrap().to_str().unwrap(),
            "zarf-package-sample-amd64-1.0.0.tar.zst"
        );

        let extracted = temp.path().join("extracted");
        let loaded = extract_package(&archive, &extracted).unwrap();
        loaded.verify_checksums(&aggregate).unwrap();

        let migrated = loaded.read_package().unwrap();
        assert_eq!(migrated.package.metadata.name, "sample");
        assert!(migrated.applied.is_empty(), "v1 view loads without migration");
    }

    #[test]
    fn test_tampered_component_fails_verification() {
        let temp = TempDir::new().unwrap();
        let package = sample_package();

        let tree = temp.path().join("tree");
        let layout = PackageLayout::new(&tree);
        layout.write_manifests(&package).unwrap();
        let staged = layout.components_dir().join("web");
        std::fs::create_dir_all(&staged).unwrap();
        std::fs::write(staged.join("data.bin"), b"payload").unwrap();
        layout.seal_component("web").unwrap();
        let aggregate = layout.finalize_checksums().unwrap();

        // Flip one byte of the component tar.
        let tar_path = layout.components_dir().join("web.tar");
        let mut bytes = std::fs::read(&tar_path).unwrap();
        let last = bytes.len() - 600;
        bytes[last] ^= 0xff;
        std::fs::write(&tar_path, bytes).unwrap();

        assert!(matches!(
            layout.verify_checksums(&aggregate),
            Err(CoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_uncompressed_archive_is_plain_tar() {
        let temp = TempDir::new().unwrap();
        let mut package = sample_package();
        package.metadata.uncompressed = true;

        let tree = temp.path().join("tree");
        let layout = PackageLayout::new(&tree);
        layout.write_manifests(&package).unwrap();
        layout.finalize_checksums().unwrap();

        let archive = layout.archive(&temp.path().join("out"), &package).unwrap();
        let extracted = temp.path().join("extracted");
        extract_package(&archive, &extracted).unwrap();
        assert!(extracted.join(LAYOUT_ZARF_YAML).is_file());
    }

    #[test]
    fn test_skeleton_has_manifest_only() {
        let temp = TempDir::new().unwrap();
        let layout = PackageLayout::new(temp.path());
        let mut package = sample_package();
        package.build = Some(Default::default());
        layout.write_skeleton(&package).unwrap();

        let migrated = layout.read_package().unwrap();
        assert!(migrated.package.build.is_none());
        assert!(!layout.images_dir().exists());
    }
}
