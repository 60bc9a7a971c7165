//! Image reference parsing and deterministic in-cluster rewriting
//!
//! Deploy rewrites every image reference to point at the in-cluster registry
//! as `<registry>/<path>:<tag>-zarf-<crc32>`, where the CRC-32 (IEEE) is
//! computed over the normalized name (host plus path, no tag). The same input
//! reference always produces the same rewritten reference, so packages built
//! from identical inputs deploy byte-identical image references.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

const DOCKER_HOST: &str = "docker.io";
const DEFAULT_TAG: &str = "latest";

/// A parsed OCI image reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Registry host (with port when present)
    pub host: String,
    /// Repository path below the host, e.g. `library/nginx`
    pub path: String,
    /// Tag, when the reference carries one
    pub tag: Option<String>,
    /// Digest, when the reference is pinned
    pub digest: Option<String>,
    /// The reference as written in the manifest
    pub reference: String,
}

impl ImageRef {
    /// Parse a reference, normalizing bare names onto docker.io/library
    pub fn parse(reference: &str) -> Result<Self> {
        if reference.is_empty() || reference.contains(char::is_whitespace) {
            return Err(CoreError::ManifestInvalid {
                path: ".images".into(),
                message: format!("invalid image reference {reference:?}"),
            });
        }

        let (rest, digest) = match reference.split_once('@') {
            Some((r, d)) => (r, Some(d.to_string())),
            None => (reference, None),
        };

        // The first segment is a registry host only if it can't be a plain
        // repository name.
        let (host, remainder) = match rest.split_once('/') {
            Some((first, tail))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_string(), tail)
            }
            _ => (DOCKER_HOST.to_string(), rest),
        };

        // A tag colon can only appear in the final path segment.
        let (path, tag) = match remainder.rsplit_once(':') {
            Some((p, t)) if !t.contains('/') => (p.to_string(), Some(t.to_string())),
            _ => (remainder.to_string(), None),
        };
        if path.is_empty() {
            return Err(CoreError::ManifestInvalid {
                path: ".images".into(),
                message: format!("invalid image reference {reference:?}"),
            });
        }

        let path = if host == DOCKER_HOST && !path.contains('/') {
            format!("library/{path}")
        } else {
            path
        };

        let tag = match (&tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            _ => tag,
        };

        Ok(Self {
            host,
            path,
            tag,
            digest,
            reference: reference.to_string(),
        })
    }

    /// The normalized name: host plus path, no tag or digest
    pub fn name(&self) -> String {
        format!("{}/{}", self.host, self.path)
    }

    /// Deterministic rewrite onto the in-cluster registry
    pub fn mutated(&self, registry: &str) -> String {
        if let Some(digest) = &self.digest {
            // Digest-pinned references are already content addressed.
            return format!("{registry}/{}@{digest}", self.path);
        }
        let tag = self.tag.as_deref().unwrap_or(DEFAULT_TAG);
        format!(
            "{registry}/{}:{tag}-zarf-{}",
            self.path,
            crc32::checksum(self.name().as_bytes())
        )
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reference)
    }
}

/// Rewrite a raw reference string onto the in-cluster registry
pub fn mutate_reference(registry: &str, reference: &str) -> Result<String> {
    Ok(ImageRef::parse(reference)?.mutated(registry))
}

// Reflected CRC-32 (IEEE 802.3) - kept inline to avoid another dependency.
mod crc32 {
    const POLY: u32 = 0xEDB8_8320;

    pub fn checksum(data: &[u8]) -> u32 {
        let mut crc = 0xFFFF_FFFF_u32;
        for &byte in data {
            crc ^= u32::from(byte);
            for _ in 0..8 {
                let mask = (crc & 1).wrapping_neg();
                crc = (crc >> 1) ^ (POLY & mask);
            }
        }
        !crc
    }
}
