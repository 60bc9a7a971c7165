//! OCI registry access: credentials and generic blob pulls

use oci_distribution::client::{Client, ClientConfig};
use oci_distribution::errors::OciDistributionError;
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::Reference;
use std::path::Path;

use crate::error::{FetchError, Result};
use crate::retry::Backoff;

/// Media types accepted for generic zarf blobs
pub mod media_types {
    /// A raw file layer in a zarf OCI artifact
    pub const ZARF_BLOB: &str = "application/vnd.zarf.layer.v1.blob";
    /// Fallback for artifacts pushed by generic tooling
    pub const OCTET_STREAM: &str = "application/octet-stream";
    /// Helm chart content layer (OCI-hosted charts)
    pub const HELM_CONTENT: &str = "application/vnd.cncf.helm.chart.content.v1.tar+gzip";
}

/// Resolves credentials for a registry host. The real credential store is an
/// external collaborator; the default implementation is anonymous.
pub trait CredentialResolver: Send + Sync {
    fn resolve(&self, registry: &str) -> RegistryAuth;
}

/// Anonymous access to every registry
#[derive(Debug, Default)]
pub struct AnonymousCredentials;

impl CredentialResolver for AnonymousCredentials {
    fn resolve(&self, _registry: &str) -> RegistryAuth {
        RegistryAuth::Anonymous
    }
}

/// A fixed username/password for one registry host
#[derive(Debug)]
pub struct StaticCredentials {
    pub registry: String,
    pub username: String,
    pub password: String,
}

impl CredentialResolver for StaticCredentials {
    fn resolve(&self, registry: &str) -> RegistryAuth {
        if registry == self.registry {
            RegistryAuth::Basic(self.username.clone(), self.password.clone())
        } else {
            RegistryAuth::Anonymous
        }
    }
}

/// Pulls generic OCI blobs (charts, files) from `oci://` sources
pub struct OciFetcher {
    client: Client,
    credentials: Box<dyn CredentialResolver>,
    backoff: Backoff,
}

impl Default for OciFetcher {
    fn default() -> Self {
        Self::new(Box::new(AnonymousCredentials))
    }
}

impl std::fmt::Debug for OciFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OciFetcher").finish_non_exhaustive()
    }
}

impl OciFetcher {
    pub fn new(credentials: Box<dyn CredentialResolver>) -> Self {
        Self {
            client: Client::new(ClientConfig::default()),
            credentials,
            backoff: Backoff::default(),
        }
    }

    /// Pull the first layer of an `oci://` artifact to a file, returning its
    /// SHA-256
    pub async fn pull_blob_to(&self, source: &str, dest: &Path) -> Result<String> {
        let reference = parse_oci_url(source)?;
        let auth = self.credentials.resolve(reference.registry());

        let image = self
            .backoff
            .run(source, || async {
                self.client
                    .pull(
                        &reference,
                        &auth,
                        vec![
                            media_types::ZARF_BLOB,
                            media_types::OCTET_STREAM,
                            media_types::HELM_CONTENT,
                        ],
                    )
                    .await
                    .map_err(|e| classify_oci(source, e))
            })
            .await?;

        let layer = image
            .layers
            .first()
            .ok_or_else(|| FetchError::Oci {
                reference: source.to_string(),
                message: "artifact has no layers".into(),
            })?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(dest, &layer.data)?;
        zarf_core::hash_file(dest).map_err(FetchError::from)
    }
}

/// Parse an `oci://` URL into a registry reference
pub fn parse_oci_url(source: &str) -> Result<Reference> {
    let clean = source.trim_start_matches("oci://");
    Reference::try_from(clean).map_err(|e| FetchError::Oci {
        reference: source.to_string(),
        message: e.to_string(),
    })
}

/// Map registry errors onto the retry policy: 5xx and 429 retry, auth and
/// client errors fail immediately, connection-level failures retry.
pub fn classify_oci(reference: &str, err: OciDistributionError) -> FetchError {
    match err {
        OciDistributionError::ServerError { code, .. } if code >= 500 || code == 429 => {
            FetchError::NetworkTransient {
                url: reference.to_string(),
                message: format!("registry returned {code}"),
            }
        }
        OciDistributionError::ServerError { code, .. } => FetchError::HttpStatus {
            url: reference.to_string(),
            status: code,
        },
        OciDistributionError::UnauthorizedError { .. }
        | OciDistributionError::AuthenticationFailure(_) => FetchError::Oci {
            reference: reference.to_string(),
            message: err.to_string(),
        },
        other => FetchError::NetworkTransient {
            url: reference.to_string(),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_oci_url() {
        let reference = parse_oci_url("oci://ghcr.io/acme/charts/app:1.2.3").unwrap();
        assert_eq!(reference.registry(), "ghcr.io");
        assert_eq!(reference.repository(), "acme/charts/app");
        assert_eq!(reference.tag(), Some("1.2.3"));
    }

    #[test]
    fn test_static_credentials_scoped_to_registry() {
        let credentials = StaticCredentials {
            registry: "127.0.0.1:31999".into(),
            username: "zarf-push".into(),
            password: "hunter2".into(),
        };
        assert!(matches!(
            credentials.resolve("127.0.0.1:31999"),
            RegistryAuth::Basic(..)
        ));
        assert!(matches!(
            credentials.resolve("ghcr.io"),
            RegistryAuth::Anonymous
        ));
    }
}
