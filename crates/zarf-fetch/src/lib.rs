//! Zarf Fetch - resolving remote artifacts into packages
//!
//! Two concerns live here:
//! - The artifact fetcher: local paths, HTTP(S) URLs, git refs, and OCI
//!   blobs resolved to bytes on disk with checksum verification
//! - Image transport: OCI images pulled into the package's shared image
//!   layout at create, and pushed to the in-cluster registry at deploy
//!
//! All network operations retry transient failures with exponential backoff
//! (base 1s, doubling, capped at 30s, four attempts).

pub mod error;
pub mod git;
pub mod http;
pub mod images;
pub mod oci;
pub mod retry;
pub mod source;

pub use error::{FetchError, Result};
pub use http::HttpFetcher;
pub use images::{ImageTransport, DEFAULT_CONCURRENCY, REF_NAME_ANNOTATION};
pub use oci::{AnonymousCredentials, CredentialResolver, OciFetcher, StaticCredentials};
pub use retry::Backoff;
pub use source::{classify, copy_dir, unpack_archive, FetchRequest, Fetched, Fetcher, SourceKind};
