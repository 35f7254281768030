//! Persistent sync state: the durable shadow of every tracked file, the
//! retry queue and the delta cursor, stored as one JSON document.
//!
//! All mutation goes through [`StateStore`], which owns the in-memory state
//! behind a mutex. Writes are atomic: serialize to a temp file in the same
//! directory, then rename over the target, so readers never observe a
//! half-written document.

use crate::util::{now_iso, unix_now};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

/// Longest allowed retry backoff, in seconds
const MAX_RETRY_DELAY_SECS: u64 = 1800;

/// One sync operation, as recorded in the retry queue and history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    UploadNew,
    DownloadNew,
    LocalDeleted,
    RemoteDeleted,
    SyncExisting,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::UploadNew => "upload_new",
            SyncAction::DownloadNew => "download_new",
            SyncAction::LocalDeleted => "local_deleted",
            SyncAction::RemoteDeleted => "remote_deleted",
            SyncAction::SyncExisting => "sync_existing",
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of one synced file, keyed by its relative path
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Size in bytes
    pub size: u64,

    /// Modification time observed after the last successful local-side write
    pub local_mtime: String,

    /// Server-reported modification time at last sync
    pub remote_mtime: String,

    /// When this entry was last written
    pub synced_at: String,

    /// SHA-256 of the local content, when it was computed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_hash: Option<String>,

    /// Server-provided content hash (SHA-256 or an opaque token)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_hash: Option<String>,
}

/// A failed operation waiting for its next attempt
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetryItem {
    pub path: String,
    pub action: SyncAction,
    pub attempts: u32,
    /// Unix seconds of the earliest next attempt
    pub next_retry: u64,
    pub error: String,
}

/// The persisted document
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct SyncState {
    #[serde(default)]
    pub files: HashMap<String, FileEntry>,

    #[serde(default)]
    pub retry_queue: Vec<RetryItem>,

    #[serde(default)]
    pub delta_link: Option<String>,

    #[serde(default)]
    pub last_poll: Option<String>,
}

/// Owner of the in-memory [`SyncState`]; every mutation goes through here
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    inner: Mutex<SyncState>,
}

impl StateStore {
    /// Load state from disk. A missing file yields empty state; an
    /// unparseable file is renamed aside as a `.corrupt.{stamp}` backup and
    /// replaced with empty state.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = Self::read_state(&path);
        Self {
            path,
            inner: Mutex::new(state),
        }
    }

    fn read_state(path: &Path) -> SyncState {
        if !path.exists() {
            return SyncState::default();
        }

        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warn!("Cannot read state file {}: {}", path.display(), e);
                return SyncState::default();
            }
        };

        let deserializer = &mut serde_json::Deserializer::from_str(&contents);
        match serde_path_to_error::deserialize::<_, SyncState>(deserializer) {
            Ok(state) => state,
            Err(e) => {
                error!(
                    "State file corrupt at {}: {} — backing up and starting fresh",
                    e.path(),
                    e
                );
                let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
                let backup = PathBuf::from(format!("{}.corrupt.{}", path.display(), stamp));
                if let Err(e) = std::fs::rename(path, &backup) {
                    warn!("Could not back up corrupt state: {}", e);
                } else {
                    info!("Corrupt state backed up to {}", backup.display());
                }
                SyncState::default()
            }
        }
    }

    /// Atomically persist the current state: temp file in the same
    /// directory, then rename over the target. The temp file is unlinked if
    /// serialization or the write fails.
    pub fn save(&self) -> Result<()> {
        let serialized = {
            let state = self.inner.lock().unwrap();
            serde_json::to_string_pretty(&*state)?
        };

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(serialized.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| crate::SyncError::Io(e.error))?;
        Ok(())
    }

    /// Path of the on-disk document
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a closure against the locked state
    pub fn with<T>(&self, f: impl FnOnce(&SyncState) -> T) -> T {
        f(&self.inner.lock().unwrap())
    }

    pub fn get(&self, rel_path: &str) -> Option<FileEntry> {
        self.inner.lock().unwrap().files.get(rel_path).cloned()
    }

    pub fn contains(&self, rel_path: &str) -> bool {
        self.inner.lock().unwrap().files.contains_key(rel_path)
    }

    /// Create or update the entry for a file
    pub fn set_entry(
        &self,
        rel_path: &str,
        size: u64,
        local_mtime: String,
        remote_mtime: String,
        local_hash: Option<String>,
        remote_hash: Option<String>,
    ) {
        let entry = FileEntry {
            size,
            local_mtime,
            remote_mtime,
            synced_at: now_iso(),
            local_hash,
            remote_hash,
        };
        self.inner
            .lock()
            .unwrap()
            .files
            .insert(rel_path.to_string(), entry);
    }

    pub fn remove_entry(&self, rel_path: &str) {
        self.inner.lock().unwrap().files.remove(rel_path);
    }

    pub fn file_count(&self) -> usize {
        self.inner.lock().unwrap().files.len()
    }

    pub fn files_snapshot(&self) -> HashMap<String, FileEntry> {
        self.inner.lock().unwrap().files.clone()
    }

    /// Upsert a retry item keyed by `(path, action)`, bumping its attempt
    /// count and recomputing the backoff deadline.
    pub fn add_retry(&self, rel_path: &str, action: SyncAction, error: &str) {
        let mut state = self.inner.lock().unwrap();
        for item in state.retry_queue.iter_mut() {
            if item.path == rel_path && item.action == action {
                item.attempts += 1;
                item.error = error.to_string();
                item.next_retry = next_retry_time(item.attempts);
                return;
            }
        }
        state.retry_queue.push(RetryItem {
            path: rel_path.to_string(),
            action,
            attempts: 1,
            next_retry: next_retry_time(1),
            error: error.to_string(),
        });
    }

    /// Drop the retry item matching `(path, action)`, if any
    pub fn remove_retry(&self, rel_path: &str, action: SyncAction) {
        self.inner
            .lock()
            .unwrap()
            .retry_queue
            .retain(|item| !(item.path == rel_path && item.action == action));
    }

    pub fn retry_queue_snapshot(&self) -> Vec<RetryItem> {
        self.inner.lock().unwrap().retry_queue.clone()
    }

    pub fn set_retry_queue(&self, queue: Vec<RetryItem>) {
        self.inner.lock().unwrap().retry_queue = queue;
    }

    pub fn retry_count(&self) -> usize {
        self.inner.lock().unwrap().retry_queue.len()
    }

    pub fn delta_link(&self) -> Option<String> {
        self.inner.lock().unwrap().delta_link.clone()
    }

    /// Record a new delta cursor. Only called after a delta query completed
    /// successfully and yielded a terminal token.
    pub fn set_delta_link(&self, link: Option<String>) {
        self.inner.lock().unwrap().delta_link = link;
    }

    pub fn last_poll(&self) -> Option<String> {
        self.inner.lock().unwrap().last_poll.clone()
    }

    pub fn set_last_poll_now(&self) {
        self.inner.lock().unwrap().last_poll = Some(now_iso());
    }
}

/// Backoff deadline for attempt `n`: `now + min(2^n * 30, 1800)` seconds
pub fn next_retry_time(attempts: u32) -> u64 {
    unix_now() + retry_delay_secs(attempts)
}

/// Backoff delay for attempt `n`, capped at 30 minutes
pub fn retry_delay_secs(attempts: u32) -> u64 {
    let exp = 1u64 << attempts.min(16);
    (exp * 30).min(MAX_RETRY_DELAY_SECS)
}
