//! Fetch error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("transient network failure fetching {url}: {message}")]
    NetworkTransient { url: String, message: String },

    #[error("network retries exhausted for {url} after {attempts} attempts: {message}")]
    NetworkExhausted {
        url: String,
        attempts: u32,
        message: String,
    },

    #[error("HTTP {status} fetching {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("git operation failed for {url}: {message}")]
    Git { url: String, message: String },

    #[error("OCI operation failed for {reference}: {message}")]
    Oci { reference: String, message: String },

    #[error("registry push failed for {reference}: {message}")]
    RegistryPush { reference: String, message: String },

    #[error("source {path} is not fetchable: {message}")]
    UnsupportedSource { path: String, message: String },

    #[error("extractPath {path} not found inside {archive}")]
    ExtractPathMissing { path: String, archive: String },

    #[error(transparent)]
    Core(#[from] zarf_core::CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Errors worth retrying with backoff: DNS and connection failures,
    /// resets, HTTP 5xx, and 429.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::NetworkTransient { .. } => true,
            FetchError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;
