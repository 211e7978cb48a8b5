//! Storage collaborator abstraction for backup destinations.

pub mod local;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Configuration of an open storage handle.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageConf {
    pub uri: String,
}

/// A handle on one backup destination URI.
///
/// Handles are scoped resources: acquired immediately before use and
/// released when dropped, on success and error paths alike. Any retry policy
/// belongs to the implementation; callers perform a single best-effort pass.
#[async_trait]
pub trait ExternalStorage: Send + Sync {
    /// Read the full contents of `path`; `BackupError::NotFound` when the
    /// file does not exist.
    async fn read_file(&self, path: &str) -> Result<Bytes>;

    async fn write_file(&self, path: &str, contents: Bytes) -> Result<()>;

    /// List file paths matching a glob pattern, relative to the destination
    /// root. Backends that cannot list return
    /// `BackupError::ListingUnsupported`; order is unspecified, callers sort
    /// for determinism.
    async fn list_files(&self, pattern: &str) -> Result<Vec<String>>;

    async fn delete(&self, path: &str) -> Result<()>;

    fn conf(&self) -> StorageConf;
}

/// Opens storage handles from destination URIs.
#[async_trait]
pub trait StorageFactory: Send + Sync {
    async fn open(&self, uri: &str) -> Result<Box<dyn ExternalStorage>>;
}

/// Rewrite a destination URI to point at `subdir` beneath its path,
/// preserving scheme, authority and query string.
pub fn append_path_to_uri(uri: &str, subdir: &str) -> String {
    let (base, query) = match uri.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (uri, None),
    };
    let joined = format!("{}/{}", base.trim_end_matches('/'), subdir.trim_matches('/'));
    match query {
        Some(query) => format!("{joined}?{query}"),
        None => joined,
    }
}
