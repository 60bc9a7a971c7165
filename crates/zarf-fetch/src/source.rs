//! Artifact source resolution
//!
//! Resolves a source reference (local path, HTTP URL, git URL, OCI URL) to
//! bytes on disk inside the scratch directory, verifying checksums and
//! honoring `extractPath` for archive sources.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::error::{FetchError, Result};
use crate::git;
use crate::http::HttpFetcher;
use crate::oci::OciFetcher;

/// What kind of source a reference names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Local,
    Http,
    Git,
    Oci,
}

/// Classify a source reference
pub fn classify(source: &str) -> SourceKind {
    if source.starts_with("oci://") {
        return SourceKind::Oci;
    }
    if source.starts_with("http://") || source.starts_with("https://") {
        let (url, reference) = git::split_ref(source);
        if url.ends_with(".git") || reference.is_some() {
            return SourceKind::Git;
        }
        return SourceKind::Http;
    }
    if source.starts_with("git@") {
        return SourceKind::Git;
    }
    SourceKind::Local
}

/// A fetch request for one artifact
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    pub source: String,
    /// Expected SHA-256 for file sources
    pub shasum: Option<String>,
    /// Subtree to keep when the source is an archive
    pub extract_path: Option<String>,
}

/// A fetched artifact on disk
#[derive(Debug, Clone)]
pub struct Fetched {
    pub path: PathBuf,
    /// SHA-256 for file artifacts; empty for directories
    pub sha256: String,
}

/// Resolves source references into a scratch directory
#[derive(Debug, Default)]
pub struct Fetcher {
    http: HttpFetcher,
    oci: OciFetcher,
}

impl Fetcher {
    pub fn new(http: HttpFetcher, oci: OciFetcher) -> Self {
        Self { http, oci }
    }

    /// Fetch one artifact into `scratch`. Local sources inside the package
    /// root are hashed in place; everything else lands in scratch under a
    /// collision-free name.
    pub async fn fetch(
        &self,
        request: &FetchRequest,
        scratch: &Path,
        package_root: &Path,
    ) -> Result<Fetched> {
        let dest = scratch.join(artifact_dir_name(&request.source));
        tokio::fs::create_dir_all(&dest).await?;

        let fetched = match classify(&request.source) {
            SourceKind::Local => self.fetch_local(request, &dest, package_root)?,
            SourceKind::Http => {
                let file = dest.join(url_file_name(&request.source));
                let sha256 = self
                    .http
                    .download(&request.source, &file, request.shasum.as_deref())
                    .await?;
                Fetched { path: file, sha256 }
            }
            SourceKind::Git => {
                let repo_dir = dest.join("repo");
                git::shallow_clone(&request.source, &repo_dir).await?;
                Fetched {
                    path: repo_dir,
                    sha256: String::new(),
                }
            }
            SourceKind::Oci => {
                let file = dest.join(url_file_name(&request.source));
                let sha256 = self.oci.pull_blob_to(&request.source, &file).await?;
                verify_shasum(&request.source, request.shasum.as_deref(), &sha256)?;
                Fetched { path: file, sha256 }
            }
        };

        match &request.extract_path {
            Some(extract_path) => self.extract(request, fetched, extract_path, &dest),
            None => Ok(fetched),
        }
    }

    fn fetch_local(
        &self,
        request: &FetchRequest,
        dest: &Path,
        package_root: &Path,
    ) -> Result<Fetched> {
        let source = package_root.join(&request.source);
        if !source.exists() {
            return Err(FetchError::UnsupportedSource {
                path: request.source.clone(),
                message: "local path does not exist".into(),
            });
        }

        if source.is_dir() {
            let copied = dest.join(source.file_name().unwrap_or_default());
            copy_dir(&source, &copied)?;
            return Ok(Fetched {
                path: copied,
                sha256: String::new(),
            });
        }

        // Files inside the package root are used in place.
        let inside = source
            .canonicalize()
            .ok()
            .zip(package_root.canonicalize().ok())
            .map(|(s, r)| s.starts_with(r))
            .unwrap_or(false);
        let path = if inside {
            source.clone()
        } else {
            let copied = dest.join(source.file_name().unwrap_or_default());
            std::fs::copy(&source, &copied)?;
            copied
        };

        let sha256 = zarf_core::hash_file(&path)?;
        verify_shasum(&request.source, request.shasum.as_deref(), &sha256)?;
        Ok(Fetched { path, sha256 })
    }

    /// Unpack an archive artifact and keep only the named subtree
    fn extract(
        &self,
        request: &FetchRequest,
        fetched: Fetched,
        extract_path: &str,
        dest: &Path,
    ) -> Result<Fetched> {
        let unpacked = dest.join("unpacked");
        std::fs::create_dir_all(&unpacked)?;
        unpack_archive(&fetched.path, &unpacked)?;

        let subtree = unpacked.join(extract_path);
        if !subtree.exists() {
            return Err(FetchError::ExtractPathMissing {
                path: extract_path.to_string(),
                archive: request.source.clone(),
            });
        }
        let sha256 = if subtree.is_file() {
            zarf_core::hash_file(&subtree)?
        } else {
            String::new()
        };
        Ok(Fetched {
            path: subtree,
            sha256,
        })
    }
}

fn verify_shasum(source: &str, expected: Option<&str>, actual: &str) -> Result<()> {
    if let Some(expected) = expected {
        if expected != actual {
            return Err(FetchError::ChecksumMismatch {
                path: source.to_string(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
    }
    Ok(())
}

/// Unpack tar, tar.gz/tgz, or zip archives
pub fn unpack_archive(archive: &Path, dest: &Path) -> Result<()> {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let file = std::fs::File::open(archive)?;

    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        let decoder = flate2::read::GzDecoder::new(file);
        tar::Archive::new(decoder).unpack(dest)?;
    } else if name.ends_with(".tar") {
        tar::Archive::new(file).unpack(dest)?;
    } else if name.ends_with(".zip") {
        let mut zip = zip::ZipArchive::new(file).map_err(|e| FetchError::UnsupportedSource {
            path: archive.display().to_string(),
            message: e.to_string(),
        })?;
        zip.extract(dest).map_err(|e| FetchError::UnsupportedSource {
            path: archive.display().to_string(),
            message: e.to_string(),
        })?;
    } else {
        return Err(FetchError::UnsupportedSource {
            path: archive.display().to_string(),
            message: "extractPath requires a tar, tar.gz, or zip source".into(),
        });
    }
    Ok(())
}

/// Recursive directory copy
pub fn copy_dir(src: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Per-artifact scratch directory name: a short hash of the source keeps
/// parallel workers on unique paths
fn artifact_dir_name(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    let mut out = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn url_file_name(source: &str) -> String {
    source
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .map(|name| name.split(['?', '#']).next().unwrap_or(name))
        .filter(|name| !name.is_empty())
        .unwrap_or("artifact")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_classify() {
        assert_eq!(classify("files/config.yaml"), SourceKind::Local);
        assert_eq!(classify("https://example.com/f.tar.gz"), SourceKind::Http);
        assert_eq!(
            classify("https://github.com/acme/app.git"),
            SourceKind::Git
        );
        assert_eq!(
            classify("https://github.com/acme/app.git@v1.0.0"),
            SourceKind::Git
        );
        assert_eq!(classify("oci://ghcr.io/acme/blob:1.0"), SourceKind::Oci);
        assert_eq!(classify("git@github.com:acme/app.git"), SourceKind::Git);
    }

    #[test]
    fn test_url_file_name() {
        assert_eq!(url_file_name("https://example.com/a/b/app.tgz"), "app.tgz");
        assert_eq!(
            url_file_name("https://example.com/app.zip?token=x"),
            "app.zip"
        );
        assert_eq!(url_file_name("https://example.com/"), "artifact");
    }

    #[tokio::test]
    async fn test_local_file_inside_root_used_in_place() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("config.yaml"), "a: 1\n").unwrap();
        let scratch = TempDir::new().unwrap();

        let fetcher = Fetcher::default();
        let request = FetchRequest {
            source: "config.yaml".into(),
            ..Default::default()
        };
        let fetched = fetcher
            .fetch(&request, scratch.path(), root.path())
            .await
            .unwrap();
        assert_eq!(fetched.path, root.path().join("config.yaml"));
        assert_eq!(fetched.sha256.len(), 64);
    }

    #[tokio::test]
    async fn test_local_file_outside_root_copied() {
        let elsewhere = TempDir::new().unwrap();
        let file = elsewhere.path().join("data.bin");
        std::fs::write(&file, b"outside").unwrap();

        let root = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let fetcher = Fetcher::default();
        let request = FetchRequest {
            source: file.display().to_string(),
            ..Default::default()
        };
        let fetched = fetcher
            .fetch(&request, scratch.path(), root.path())
            .await
            .unwrap();
        assert!(fetched.path.starts_with(scratch.path()));
        assert_eq!(std::fs::read(&fetched.path).unwrap(), b"outside");
    }

    #[tokio::test]
    async fn test_local_shasum_mismatch() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("f"), b"payload").unwrap();
        let scratch = TempDir::new().unwrap();

        let fetcher = Fetcher::default();
        let request = FetchRequest {
            source: "f".into(),
            shasum: Some("deadbeef".into()),
            ..Default::default()
        };
        let err = fetcher
            .fetch(&request, scratch.path(), root.path())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::ChecksumMismatch { .. }));
    }

    #[tokio::test]
    async fn test_extract_path_from_tar() {
        let root = TempDir::new().unwrap();
        let inner = root.path().join("tree/bin");
        std::fs::create_dir_all(&inner).unwrap();
        std::fs::write(inner.join("tool"), b"#!/bin/sh\n").unwrap();
        zarf_core::tar_directory(&root.path().join("tree"), &root.path().join("bundle.tar"))
            .unwrap();

        let scratch = TempDir::new().unwrap();
        let fetcher = Fetcher::default();
        let request = FetchRequest {
            source: "bundle.tar".into(),
            extract_path: Some("bin/tool".into()),
            ..Default::default()
        };
        let fetched = fetcher
            .fetch(&request, scratch.path(), root.path())
            .await
            .unwrap();
        assert_eq!(std::fs::read(&fetched.path).unwrap(), b"#!/bin/sh\n");
    }

    #[tokio::test]
    async fn test_extract_path_missing() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("tree")).unwrap();
        std::fs::write(root.path().join("tree/readme"), b"x").unwrap();
        zarf_core::tar_directory(&root.path().join("tree"), &root.path().join("bundle.tar"))
            .unwrap();

        let scratch = TempDir::new().unwrap();
        let fetcher = Fetcher::default();
        let request = FetchRequest {
            source: "bundle.tar".into(),
            extract_path: Some("no/such/path".into()),
            ..Default::default()
        };
        let err = fetcher
            .fetch(&request, scratch.path(), root.path())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::ExtractPathMissing { .. }));
    }
}
