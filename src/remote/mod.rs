//! Remote cloud-folder access
//!
//! The engine depends only on the [`RemoteClient`] trait: a recursive
//! listing, an incremental change feed, transfers and deletion. The
//! share-link Graph implementation lives in [`graph`]; tests substitute an
//! in-memory fake.

pub mod graph;

pub use graph::{GraphClient, GraphClientBuilder};

use crate::progress::ProgressCallback;
use crate::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Metadata for one remote file, keyed by its path relative to the shared
/// folder root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// `/`-separated relative path, no leading slash
    pub path: String,
    pub size: u64,
    /// Server-reported modification time, stored and compared verbatim
    pub mtime: String,
    /// Server-provided content hash (SHA-256 or an opaque token)
    pub remote_hash: Option<String>,
}

/// One entry from the incremental change feed
#[derive(Debug, Clone)]
pub struct RemoteChange {
    pub path: String,
    pub size: u64,
    pub mtime: String,
    pub remote_hash: Option<String>,
    pub deleted: bool,
    pub is_folder: bool,
}

/// Supplies bearer tokens on demand. OAuth lives entirely behind this seam;
/// share links with anonymous access need no provider at all.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current token, or a fresh one when `force_refresh` is set
    async fn access_token(&self, force_refresh: bool) -> Result<Option<String>>;
}

/// Everything the sync engine needs from the cloud side
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Whether the configured share is reachable
    async fn validate(&self) -> Result<bool>;

    /// Full recursive listing of the shared folder
    async fn list_tree(&self) -> Result<Vec<RemoteEntry>>;

    /// Changes since `cursor` (everything, when `None`) plus the next
    /// cursor. An absent next cursor means the feed did not terminate and
    /// the caller must treat the delta as failed.
    async fn list_changes(
        &self,
        cursor: Option<&str>,
    ) -> Result<(Vec<RemoteChange>, Option<String>)>;

    /// Download a remote file to `local_path`, creating parent directories.
    /// Returns false when the server refused without a transport error.
    async fn download(
        &self,
        remote_path: &str,
        local_path: &Path,
        progress: Option<Arc<dyn ProgressCallback>>,
    ) -> Result<bool>;

    /// Upload a local file, switching transparently to a chunked session
    /// for large files. Returns the server's metadata, or None when the
    /// server refused without a transport error.
    async fn upload(
        &self,
        remote_path: &str,
        local_path: &Path,
        progress: Option<Arc<dyn ProgressCallback>>,
    ) -> Result<Option<RemoteEntry>>;

    /// Delete a remote file; an already-missing file counts as success
    async fn delete(&self, remote_path: &str) -> Result<bool>;
}
