//! Image transport: OCI layout storage at create, registry pushes at deploy
//!
//! Create pulls every image reference into a shared `images/` directory laid
//! out per the OCI Image Layout spec:
//!
//! ```text
//! images/
//! ├── oci-layout
//! ├── index.json        entries annotated with the original reference
//! └── blobs/sha256/     manifests, configs, and layers - deduplicated
//! ```
//!
//! Deploy reads the layout back and pushes each image to the in-cluster
//! registry under its deterministic rewritten reference.

use futures::stream::{self, StreamExt};
use oci_distribution::client::{Client, ClientConfig, Config, ImageLayer};
use oci_distribution::manifest::{
    ImageIndexEntry, OciDescriptor, OciImageIndex, OciImageManifest, OciManifest,
    IMAGE_MANIFEST_LIST_MEDIA_TYPE, IMAGE_MANIFEST_MEDIA_TYPE, OCI_IMAGE_INDEX_MEDIA_TYPE,
    OCI_IMAGE_MEDIA_TYPE,
};
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::Reference;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{FetchError, Result};
use crate::oci::{classify_oci, AnonymousCredentials, CredentialResolver};
use crate::retry::Backoff;

/// Annotation carrying the original manifest reference in index.json
pub const REF_NAME_ANNOTATION: &str = "org.opencontainers.image.ref.name";

/// Maximum concurrent image pulls/pushes
pub const DEFAULT_CONCURRENCY: usize = 4;

const ACCEPTED_MANIFEST_TYPES: &[&str] = &[
    OCI_IMAGE_MEDIA_TYPE,
    OCI_IMAGE_INDEX_MEDIA_TYPE,
    IMAGE_MANIFEST_MEDIA_TYPE,
    IMAGE_MANIFEST_LIST_MEDIA_TYPE,
];

/// Pulls images into a package and pushes them to the in-cluster registry
pub struct ImageTransport {
    client: Client,
    credentials: Box<dyn CredentialResolver>,
    backoff: Backoff,
    concurrency: usize,
}

impl Default for ImageTransport {
    fn default() -> Self {
        Self::new(Box::new(AnonymousCredentials))
    }
}

impl ImageTransport {
    pub fn new(credentials: Box<dyn CredentialResolver>) -> Self {
        Self {
            client: Client::new(ClientConfig::default()),
            credentials,
            backoff: Backoff::default(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    // ========== Create: pull into the layout ==========

    /// Pull every reference into the layout, preferring the target
    /// architecture for multi-arch images
    pub async fn pull_images(
        &self,
        images: &[String],
        layout_dir: &Path,
        architecture: &str,
    ) -> Result<()> {
        ensure_layout(layout_dir)?;
        let results: Vec<Result<(String, ImageIndexEntry)>> = stream::iter(images)
            .map(|image| self.pull_image(image, layout_dir, architecture))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut entries = Vec::with_capacity(results.len());
        for result in results {
            entries.push(result?);
        }
        // Index order follows the manifest's image order, not completion
        // order.
        entries.sort_by_key(|(original, _)| {
            images
                .iter()
                .position(|i| i == original)
                .unwrap_or(usize::MAX)
        });
        let mut index = read_index(layout_dir)?;
        for (original, entry) in entries {
            index
                .manifests
                .retain(|m| annotation_ref(m) != Some(original.as_str()));
            index.manifests.push(entry);
        }
        write_index(layout_dir, &index)
    }

    async fn pull_image(
        &self,
        original: &str,
        layout_dir: &Path,
        architecture: &str,
    ) -> Result<(String, ImageIndexEntry)> {
        let parsed = zarf_core::ImageRef::parse(original)?;
        let reference = to_oci_reference(&parsed);
        let auth = self.credentials.resolve(reference.registry());
        info!(image = original, "pulling image");

        let (manifest_bytes, manifest) = self
            .resolve_manifest(&reference, &auth, original, architecture)
            .await?;

        // Config blob, then layers, deduplicated across images by digest.
        self.pull_blob_if_missing(&reference, &auth, original, &manifest.config, layout_dir)
            .await?;
        for layer in &manifest.layers {
            self.pull_blob_if_missing(&reference, &auth, original, layer, layout_dir)
                .await?;
        }

        let digest = write_blob(layout_dir, &manifest_bytes)?;
        let mut annotations = BTreeMap::new();
        annotations.insert(REF_NAME_ANNOTATION.to_string(), original.to_string());
        Ok((
            original.to_string(),
            ImageIndexEntry {
                media_type: manifest
                    .media_type
                    .clone()
                    .unwrap_or_else(|| OCI_IMAGE_MEDIA_TYPE.to_string()),
                digest,
                size: manifest_bytes.len() as i64,
                platform: None,
                annotations: Some(annotations.into_iter().collect()),
            },
        ))
    }

    /// Fetch the image manifest, descending through a multi-arch index to
    /// the entry matching the package architecture
    async fn resolve_manifest(
        &self,
        reference: &Reference,
        auth: &RegistryAuth,
        original: &str,
        architecture: &str,
    ) -> Result<(Vec<u8>, OciImageManifest)> {
        let (bytes, _digest) = self
            .backoff
            .run(original, || async {
                self.client
                    .pull_manifest_raw(reference, auth, ACCEPTED_MANIFEST_TYPES)
                    .await
                    .map_err(|e| classify_oci(original, e))
            })
            .await?;

        let manifest: OciManifest =
            serde_json::from_slice(&bytes).map_err(|e| FetchError::Oci {
                reference: original.to_string(),
                message: format!("unparseable manifest: {e}"),
            })?;

        match manifest {
            OciManifest::Image(image) => Ok((bytes, image)),
            OciManifest::ImageIndex(index) => {
                let entry = index
                    .manifests
                    .iter()
                    .find(|m| {
                        m.platform
                            .as_ref()
                            .map(|p| p.architecture == architecture && p.os == "linux")
                            .unwrap_or(false)
                    })
                    .or_else(|| index.manifests.first())
                    .ok_or_else(|| FetchError::Oci {
                        reference: original.to_string(),
                        message: "image index has no manifests".into(),
                    })?;
                debug!(
                    image = original,
                    digest = %entry.digest,
                    architecture,
                    "selected platform manifest"
                );
                let pinned = Reference::with_digest(
                    reference.registry().to_string(),
                    reference.repository().to_string(),
                    entry.digest.clone(),
                );
                let (bytes, _digest) = self
                    .backoff
                    .run(original, || async {
                        self.client
                            .pull_manifest_raw(&pinned, auth, ACCEPTED_MANIFEST_TYPES)
                            .await
                            .map_err(|e| classify_oci(original, e))
                    })
                    .await?;
                let image: OciImageManifest =
                    serde_json::from_slice(&bytes).map_err(|e| FetchError::Oci {
                        reference: original.to_string(),
                        message: format!("unparseable platform manifest: {e}"),
                    })?;
                Ok((bytes, image))
            }
        }
    }

    async fn pull_blob_if_missing(
        &self,
        reference: &Reference,
        auth: &RegistryAuth,
        original: &str,
        layer: &OciDescriptor,
        layout_dir: &Path,
    ) -> Result<()> {
        let digest = layer.digest.as_str();
        let path = blob_path(layout_dir, digest);
        if path.is_file() {
            debug!(digest, "blob already in layout");
            return Ok(());
        }
        // Images sharing a layer may race here; each worker stages into its
        // own partial file and the last rename wins with identical content.
        let worker = zarf_core::hash_bytes(original.as_bytes());
        let partial = path.with_extension(format!("partial-{}", &worker[..8]));
        self.backoff
            .run(original, || async {
                let mut file = tokio::fs::File::create(&partial).await?;
                self.client
                    .pull_blob(reference, layer, &mut file)
                    .await
                    .map_err(|e| classify_oci(original, e))
            })
            .await?;
        tokio::fs::rename(&partial, &path).await?;
        Ok(())
    }

    // ========== Deploy: push to the in-cluster registry ==========

    /// Push every image in the layout to the registry under its rewritten
    /// reference. Returns the original-to-rewritten mapping for the
    /// admission mutator.
    pub async fn push_images(
        &self,
        layout_dir: &Path,
        registry: &str,
    ) -> Result<BTreeMap<String, String>> {
        let index = read_index(layout_dir)?;
        let results: Vec<Result<(String, String)>> = stream::iter(&index.manifests)
            .map(|entry| self.push_image(entry, layout_dir, registry))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut mapping = BTreeMap::new();
        for result in results {
            let (original, pushed) = result?;
            mapping.insert(original, pushed);
        }
        Ok(mapping)
    }

    async fn push_image(
        &self,
        entry: &ImageIndexEntry,
        layout_dir: &Path,
        registry: &str,
    ) -> Result<(String, String)> {
        let original = annotation_ref(entry).ok_or_else(|| FetchError::Oci {
            reference: entry.digest.clone(),
            message: "layout index entry is missing its reference annotation".into(),
        })?;
        let rewritten = zarf_core::mutate_reference(registry, original)?;

        let manifest_bytes = read_blob(layout_dir, &entry.digest)?;
        let manifest: OciImageManifest =
            serde_json::from_slice(&manifest_bytes).map_err(|e| FetchError::Oci {
                reference: original.to_string(),
                message: format!("unparseable stored manifest: {e}"),
            })?;

        let config_bytes = read_blob(layout_dir, &manifest.config.digest)?;
        let config = Config {
            data: config_bytes,
            media_type: manifest.config.media_type.clone(),
            annotations: None,
        };
        let mut layers = Vec::with_capacity(manifest.layers.len());
        for descriptor in &manifest.layers {
            layers.push(ImageLayer {
                data: read_blob(layout_dir, &descriptor.digest)?,
                media_type: descriptor.media_type.clone(),
                annotations: None,
            });
        }

        let target = Reference::try_from(rewritten.as_str()).map_err(|e| FetchError::Oci {
            reference: rewritten.clone(),
            message: e.to_string(),
        })?;
        let auth = self.credentials.resolve(target.registry());

        info!(image = original, target = %rewritten, "pushing image");
        self.backoff
            .run(&rewritten, || async {
                self.client
                    .push(&target, &layers, config.clone(), &auth, Some(manifest.clone()))
                    .await
                    .map(|_| ())
                    .map_err(|e| match classify_oci(&rewritten, e) {
                        err @ FetchError::NetworkTransient { .. } => err,
                        err => FetchError::RegistryPush {
                            reference: rewritten.clone(),
                            message: err.to_string(),
                        },
                    })
            })
            .await?;

        Ok((original.to_string(), rewritten))
    }
}

fn to_oci_reference(parsed: &zarf_core::ImageRef) -> Reference {
    match (&parsed.digest, &parsed.tag) {
        (Some(digest), _) => Reference::with_digest(
            parsed.host.clone(),
            parsed.path.clone(),
            digest.clone(),
        ),
        (None, Some(tag)) => {
            Reference::with_tag(parsed.host.clone(), parsed.path.clone(), tag.clone())
        }
        (None, None) => Reference::with_tag(
            parsed.host.clone(),
            parsed.path.clone(),
            "latest".to_string(),
        ),
    }
}

// ========== OCI image layout plumbing ==========

fn ensure_layout(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir.join("blobs/sha256"))?;
    let marker = dir.join("oci-layout");
    if !marker.is_file() {
        std::fs::write(&marker, "{\"imageLayoutVersion\":\"1.0.0\"}\n")?;
    }
    if !dir.join("index.json").is_file() {
        write_index(
            dir,
            &OciImageIndex {
                schema_version: 2,
                media_type: Some(OCI_IMAGE_INDEX_MEDIA_TYPE.to_string()),
                manifests: Vec::new(),
                annotations: None,
            },
        )?;
    }
    Ok(())
}

fn read_index(dir: &Path) -> Result<OciImageIndex> {
    let data = std::fs::read(dir.join("index.json"))?;
    serde_json::from_slice(&data).map_err(|e| FetchError::Oci {
        reference: dir.display().to_string(),
        message: format!("unparseable index.json: {e}"),
    })
}

fn write_index(dir: &Path, index: &OciImageIndex) -> Result<()> {
    let data = serde_json::to_vec_pretty(index).map_err(|e| FetchError::Oci {
        reference: dir.display().to_string(),
        message: e.to_string(),
    })?;
    std::fs::write(dir.join("index.json"), data)?;
    Ok(())
}

fn blob_path(dir: &Path, digest: &str) -> PathBuf {
    dir.join("blobs/sha256")
        .join(digest.trim_start_matches("sha256:"))
}

fn read_blob(dir: &Path, digest: &str) -> Result<Vec<u8>> {
    Ok(std::fs::read(blob_path(dir, digest))?)
}

fn write_blob(dir: &Path, data: &[u8]) -> Result<String> {
    let digest = format!("sha256:{:x}", Sha256::digest(data));
    let path = blob_path(dir, &digest);
    if !path.is_file() {
        std::fs::write(&path, data)?;
    }
    Ok(digest)
}

fn annotation_ref(entry: &ImageIndexEntry) -> Option<&str> {
    entry
        .annotations
        .as_ref()?
        .get(REF_NAME_ANNOTATION)
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_scaffolding() {
        let temp = TempDir::new().unwrap();
        ensure_layout(temp.path()).unwrap();
        assert!(temp.path().join("oci-layout").is_file());
        assert!(temp.path().join("blobs/sha256").is_dir());
        let index = read_index(temp.path()).unwrap();
        assert_eq!(index.schema_version, 2);
        assert!(index.manifests.is_empty());
    }

    #[test]
    fn test_blob_dedup_by_digest() {
        let temp = TempDir::new().unwrap();
        ensure_layout(temp.path()).unwrap();
        let first = write_blob(temp.path(), b"layer-bytes").unwrap();
        let second = write_blob(temp.path(), b"layer-bytes").unwrap();
        assert_eq!(first, second);

        let blobs: Vec<_> = std::fs::read_dir(temp.path().join("blobs/sha256"))
            .unwrap()
            .collect();
        assert_eq!(blobs.len(), 1, "identical content stored once");
        assert_eq!(read_blob(temp.path(), &first).unwrap(), b"layer-bytes");
    }

    #[test]
    fn test_index_entries_keyed_by_reference() {
        let temp = TempDir::new().unwrap();
        ensure_layout(temp.path()).unwrap();
        let mut index = read_index(temp.path()).unwrap();
        index.manifests.push(ImageIndexEntry {
            media_type: OCI_IMAGE_MEDIA_TYPE.to_string(),
            digest: "sha256:abc".into(),
            size: 3,
            platform: None,
            annotations: Some(
                [(REF_NAME_ANNOTATION.to_string(), "nginx:1.27".to_string())]
                    .into_iter()
                    .collect(),
            ),
        });
        write_index(temp.path(), &index).unwrap();

        let reloaded = read_index(temp.path()).unwrap();
        assert_eq!(annotation_ref(&reloaded.manifests[0]), Some("nginx:1.27"));
    }

    #[test]
    fn test_to_oci_reference_normalizes_docker_library() {
        let parsed = zarf_core::ImageRef::parse("nginx").unwrap();
        let reference = to_oci_reference(&parsed);
        assert_eq!(reference.registry(), "docker.io");
        assert_eq!(reference.repository(), "library/nginx");
        assert_eq!(reference.tag(), Some("latest"));
    }
}
