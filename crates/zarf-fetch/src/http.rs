//! Streaming HTTP downloads with checksum verification

use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncWriteExt;

use crate::error::{FetchError, Result};
use crate::retry::Backoff;

/// HTTP client wrapper that streams downloads to disk
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    backoff: Backoff,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
            backoff: Backoff::default(),
        }
    }
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            backoff: Backoff::default(),
        }
    }

    /// Download a URL to the destination path, returning the SHA-256 of the
    /// body. When an expected shasum is given, a mismatch removes the file
    /// and fails.
    pub async fn download(
        &self,
        url: &str,
        dest: &Path,
        expected_shasum: Option<&str>,
    ) -> Result<String> {
        let sha256 = self
            .backoff
            .run(url, || self.download_once(url, dest))
            .await?;

        if let Some(expected) = expected_shasum {
            if sha256 != expected {
                let _ = std::fs::remove_file(dest);
                return Err(FetchError::ChecksumMismatch {
                    path: url.to_string(),
                    expected: expected.to_string(),
                    actual: sha256,
                });
            }
        }
        Ok(sha256)
    }

    async fn download_once(&self, url: &str, dest: &Path) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(dest).await?;
        let mut hasher = Sha256::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| classify_reqwest(url, e))?;
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        let digest = hasher.finalize();
        let mut out = String::with_capacity(64);
        for byte in digest {
            out.push_str(&format!("{byte:02x}"));
        }
        tracing::debug!(url, sha256 = %out, "downloaded");
        Ok(out)
    }
}

/// Connection-level reqwest failures are transient; everything else is not
fn classify_reqwest(url: &str, err: reqwest::Error) -> FetchError {
    if err.is_connect() || err.is_timeout() || err.is_request() || err.is_body() {
        FetchError::NetworkTransient {
            url: url.to_string(),
            message: err.to_string(),
        }
    } else {
        FetchError::UnsupportedSource {
            path: url.to_string(),
            message: err.to_string(),
        }
    }
}
