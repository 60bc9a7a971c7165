//! Checksum manifest for package integrity verification
//!
//! `checksums.txt` lists every file in the package tree except itself and the
//! signature, sorted by path, one `<sha256> <path>` line per file. The
//! aggregate checksum recorded in build provenance is the SHA-256 of the
//! `checksums.txt` bytes.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{CoreError, Result};

/// Filename of the checksum manifest within a package
pub const CHECKSUMS_TXT: &str = "checksums.txt";

/// Filename of the detached signature over checksums.txt
pub const SIGNATURE_FILE: &str = "signature";

/// A single checksum line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Relative path within the package tree
    pub path: String,
    /// SHA-256 of the file contents
    pub sha256: String,
}

/// The parsed checksum manifest
#[derive(Debug, Clone, Default)]
pub struct Checksums {
    /// Entries sorted by path
    pub files: Vec<FileEntry>,
}

impl Checksums {
    /// Walk a package tree and hash every file except the manifest itself
    /// and the signature
    pub fn generate(root: &Path) -> Result<Self> {
        let mut files = BTreeMap::new();
        for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|e| CoreError::Archive {
                message: format!("failed to walk package tree: {e}"),
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
            // The manifest views carry the aggregate checksum, so they stay
            // outside the checksum set along with the manifest itself and
            // the signature.
            if matches!(
                rel.as_str(),
                CHECKSUMS_TXT | SIGNATURE_FILE | "zarf.yaml" | "zarfv1.yaml"
            ) {
                continue;
            }
            files.insert(rel, hash_file(entry.path())?);
        }
        Ok(Self {
            files: files
                .into_iter()
                .map(|(path, sha256)| FileEntry { path, sha256 })
                .collect(),
        })
    }

    /// Parse checksums.txt content
    pub fn parse(content: &str) -> Result<Self> {
        let mut files = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (sha256, path) = line.split_once(' ').ok_or_else(|| CoreError::Archive {
                message: format!("malformed checksum line: {line:?}"),
            })?;
            files.push(FileEntry {
                path: path.trim().to_string(),
                sha256: sha256.to_string(),
            });
        }
        Ok(Self { files })
    }

    /// Render the canonical checksums.txt content
    pub fn to_string(&self) -> String {
        let mut out = String::new();
        for entry in &self.files {
            out.push_str(&entry.sha256);
            out.push(' ');
            out.push_str(&entry.path);
            out.push('\n');
        }
        out
    }

    /// SHA-256 of the canonical checksums.txt bytes
    pub fn aggregate(&self) -> String {
        hash_bytes(self.to_string().as_bytes())
    }

    /// Verify every listed file below the given root; the first divergence
    /// or missing file fails
    pub fn verify(&self, root: &Path) -> Result<()> {
        for entry in &self.files {
            let path = root.join(&entry.path);
            if !path.is_file() {
                return Err(CoreError::ChecksumMismatch {
                    path: entry.path.clone(),
                    expected: entry.sha256.clone(),
                    actual: "<missing>".into(),
                });
            }
            let actual = hash_file(&path)?;
            if actual != entry.sha256 {
                return Err(CoreError::ChecksumMismatch {
                    path: entry.path.clone(),
                    expected: entry.sha256.clone(),
                    actual,
                });
            }
        }
        Ok(())
    }
}

/// Stream-hash a file
pub fn hash_file(path: &Path) -> Result<String> {
    let file = std::fs::File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex_encode(&hasher.finalize()))
}

/// SHA-256 of a byte slice
pub fn hash_bytes(data: &[u8]) -> String {
    hex_encode(&Sha256::digest(data))
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("zarf.yaml"), "kind: ZarfPackageConfig\n").unwrap();
        std::fs::create_dir_all(dir.path().join("components")).unwrap();
        std::fs::write(dir.path().join("components/web.tar"), b"tar bytes").unwrap();
        std::fs::create_dir_all(dir.path().join("images")).unwrap();
        std::fs::write(dir.path().join("images/index.json"), b"{}").unwrap();
        dir
    }

    #[test]
    fn test_generate_sorted_and_excludes_manifests() {
        let dir = tree();
        std::fs::write(dir.path().join(CHECKSUMS_TXT), "stale").unwrap();
        std::fs::write(dir.path().join(SIGNATURE_FILE), "sig").unwrap();

        let checksums = Checksums::generate(dir.path()).unwrap();
        let paths: Vec<_> = checksums.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["components/web.tar", "images/index.json"]);
    }

    #[test]
    fn test_roundtrip_and_aggregate_stability() {
        let dir = tree();
        let checksums = Checksums::generate(dir.path()).unwrap();
        let text = checksums.to_string();
        let parsed = Checksums::parse(&text).unwrap();
        assert_eq!(parsed.files, checksums.files);
        assert_eq!(parsed.aggregate(), checksums.aggregate());
        assert_eq!(checksums.aggregate(), hash_bytes(text.as_bytes()));
    }

    #[test]
    fn test_verify_detects_single_byte_change() {
        let dir = tree();
        let checksums = Checksums::generate(dir.path()).unwrap();
        checksums.verify(dir.path()).unwrap();

        std::fs::write(dir.path().join("components/web.tar"), b"tar Bytes").unwrap();
        assert!(matches!(
            checksums.verify(dir.path()),
            Err(CoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_verify_detects_missing_file() {
        let dir = tree();
        let checksums = Checksums::generate(dir.path()).unwrap();
        std::fs::remove_file(dir.path().join("components/web.tar")).unwrap();
        assert!(checksums.verify(dir.path()).is_err());
    }

    #[test]
    fn test_known_hash() {
        assert_eq!(
            hash_bytes(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }
}
