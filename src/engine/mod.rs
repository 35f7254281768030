//! The sync engine
//!
//! One [`SyncEngine`] owns a reconciliation pass end to end: it reads the
//! remote listing, walks the local tree, consults the state store, executes
//! the resulting actions and commits. Full and delta passes serialize on the
//! engine mutex; the watcher's single-file paths bypass it and touch only
//! the state mutex.

mod conflict;
mod delta;
mod reconcile;
mod retry;

pub use delta::DeltaOutcome;

use crate::config::Config;
use crate::debounce::DebounceSet;
use crate::history::{EventStatus, HistoryLog};
use crate::notify::Notifier;
use crate::progress::ProgressTracker;
use crate::remote::RemoteClient;
use crate::scope::ScopeFilter;
use crate::state::StateStore;
use crate::util::{local_mtime_iso, mtime_to_iso, sha256_file};
use crate::{Result, SyncError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Counts from one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub synced: usize,
    pub errors: usize,
}

/// Size and formatted mtime of one local file
#[derive(Debug, Clone)]
pub(crate) struct LocalInfo {
    pub size: u64,
    pub mtime: String,
}

/// Bi-directional reconciliation between the local root and the remote
pub struct SyncEngine {
    remote: Arc<dyn RemoteClient>,
    local_root: PathBuf,
    max_workers: usize,
    scope: ScopeFilter,
    store: Arc<StateStore>,
    debounce: Arc<DebounceSet>,
    progress: Arc<ProgressTracker>,
    history: Arc<HistoryLog>,
    notifier: Notifier,
    /// Serializes reconciliation passes: scheduled, triggered and initial
    sync_lock: Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        remote: Arc<dyn RemoteClient>,
        config: &Config,
        store: Arc<StateStore>,
        history: Arc<HistoryLog>,
    ) -> Self {
        Self {
            remote,
            local_root: config.local_folder.clone(),
            max_workers: config.max_workers.max(1),
            scope: ScopeFilter::new(
                &config.ignore_patterns,
                &config.sync_folders,
                &config.exclude_folders,
            ),
            store,
            debounce: Arc::new(DebounceSet::new()),
            progress: Arc::new(ProgressTracker::new()),
            history,
            notifier: Notifier::new(config.notifications_enabled),
            sync_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.progress
    }

    pub fn debounce(&self) -> &Arc<DebounceSet> {
        &self.debounce
    }

    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    pub(crate) fn scope(&self) -> &ScopeFilter {
        &self.scope
    }

    pub(crate) fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub(crate) fn history(&self) -> &Arc<HistoryLog> {
        &self.history
    }

    pub(crate) fn remote(&self) -> &Arc<dyn RemoteClient> {
        &self.remote
    }

    /// Run one full reconciliation pass under the engine mutex
    pub async fn full_sync(&self) -> Result<SyncStats> {
        let _guard = self.sync_lock.lock().await;
        self.full_sync_locked().await
    }

    /// Run one delta pass under the engine mutex, falling back to a full
    /// pass when the cursor is missing or rejected
    pub async fn delta_sync(&self) -> Result<SyncStats> {
        let _guard = self.sync_lock.lock().await;
        match self.try_delta().await? {
            DeltaOutcome::Applied(stats) => Ok(stats),
            DeltaOutcome::Fallback => {
                let stats = self.full_sync_locked().await?;
                if self.store.delta_link().is_none() {
                    self.init_delta_link().await;
                }
                Ok(stats)
            }
        }
    }

    /// Fetch an initial delta cursor so later polls can go incremental.
    /// Best-effort: without a cursor the next poll simply falls back.
    pub async fn init_delta_link(&self) {
        if self.store.delta_link().is_some() {
            return;
        }
        match self.remote.list_changes(None).await {
            Ok((_, Some(cursor))) => {
                self.store.set_delta_link(Some(cursor));
                if let Err(e) = self.store.save() {
                    warn!("Could not persist delta cursor: {}", e);
                }
                info!("Delta cursor initialized for incremental sync");
            }
            Ok((_, None)) => debug!("Server returned no terminal delta cursor"),
            Err(e) => debug!("Could not initialize delta cursor: {}", e),
        }
    }

    /// Absolute path of a relative sync path
    pub(crate) fn abs_path(&self, rel_path: &str) -> PathBuf {
        self.local_root.join(rel_path)
    }

    /// Walk the local tree into a map of in-scope files
    pub(crate) fn walk_local_tree(&self) -> HashMap<String, LocalInfo> {
        let mut local_files = HashMap::new();
        for entry in walkdir::WalkDir::new(&self.local_root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let rel_path = match entry.path().strip_prefix(&self.local_root) {
                Ok(rel) => rel.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/"),
                Err(_) => continue,
            };
            if !self.scope.should_sync(&rel_path) {
                continue;
            }
            match entry.metadata() {
                Ok(metadata) => {
                    let mtime = metadata
                        .modified()
                        .map(mtime_to_iso)
                        .unwrap_or_default();
                    local_files.insert(
                        rel_path,
                        LocalInfo {
                            size: metadata.len(),
                            mtime,
                        },
                    );
                }
                Err(e) => warn!("Cannot stat {}: {}", entry.path().display(), e),
            }
        }
        local_files
    }

    /// Watcher path: a local file was created or modified. Takes only the
    /// state mutex, never the engine mutex.
    pub async fn handle_local_change(&self, rel_path: &str) {
        if self.debounce.recently_synced(rel_path) {
            debug!("Skipping watcher event (recently synced): {}", rel_path);
            return;
        }

        let local_path = self.abs_path(rel_path);
        if !local_path.is_file() {
            return;
        }
        if !self.scope.should_sync(rel_path) {
            return;
        }

        info!("Local change detected, uploading: {}", rel_path);
        let t0 = Instant::now();
        let result = self.upload_and_record(rel_path, &local_path).await;
        let duration = t0.elapsed().as_millis() as u64;
        match result {
            Ok(size) => {
                self.history.log_event(
                    "upload",
                    rel_path,
                    EventStatus::Ok,
                    Some(size),
                    Some(duration),
                    None,
                );
            }
            Err(e) => {
                error!("Failed to upload {} on local change: {}", rel_path, e);
                self.history.log_event(
                    "upload",
                    rel_path,
                    EventStatus::Error,
                    None,
                    Some(duration),
                    Some(&e.to_string()),
                );
            }
        }
    }

    /// Watcher path: a local file was deleted
    pub async fn handle_local_delete(&self, rel_path: &str) {
        if self.debounce.recently_synced(rel_path) {
            debug!("Skipping watcher delete event (recently synced): {}", rel_path);
            return;
        }
        if !self.scope.should_sync(rel_path) {
            return;
        }

        info!("Local delete detected, removing from remote: {}", rel_path);
        let t0 = Instant::now();
        let result: Result<()> = async {
            if !self.remote.delete(rel_path).await? {
                return Err(SyncError::Transfer(format!(
                    "remote delete refused for {rel_path}"
                )));
            }
            self.store.remove_entry(rel_path);
            self.store.save()?;
            Ok(())
        }
        .await;

        let duration = t0.elapsed().as_millis() as u64;
        match result {
            Ok(()) => {
                self.history
                    .log_event("delete", rel_path, EventStatus::Ok, None, Some(duration), None);
            }
            Err(e) => {
                error!("Failed to delete remote {}: {}", rel_path, e);
                self.history.log_event(
                    "delete",
                    rel_path,
                    EventStatus::Error,
                    None,
                    Some(duration),
                    Some(&e.to_string()),
                );
            }
        }
    }

    async fn upload_and_record(&self, rel_path: &str, local_path: &Path) -> Result<u64> {
        let meta = self
            .remote
            .upload(rel_path, local_path, None)
            .await?
            .ok_or_else(|| SyncError::Transfer(format!("upload refused for {rel_path}")))?;

        let metadata = tokio::fs::metadata(local_path).await?;
        let size = metadata.len();
        let local_mtime = local_mtime_iso(local_path).await?;
        let local_hash = sha256_file(local_path).await.ok();
        self.store.set_entry(
            rel_path,
            size,
            local_mtime,
            meta.mtime,
            local_hash,
            meta.remote_hash,
        );
        self.store.save()?;
        Ok(size)
    }
}
