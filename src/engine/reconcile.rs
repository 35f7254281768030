//! Full reconciliation: the three-way diff between remote, local and state
//!
//! Each path in the union of the three maps gets exactly one action per
//! pass. Actions run in a bounded pool; a failing action records history,
//! enqueues a retry item and never blocks the rest of the pass.

use super::{LocalInfo, SyncEngine, SyncStats};
use crate::history::EventStatus;
use crate::progress::{OpProgress, TransferKind};
use crate::remote::RemoteEntry;
use crate::state::SyncAction;
use crate::util::{local_mtime_iso, sha256_file};
use crate::{Result, SyncError};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;
use tracing::{debug, error, info};

/// One planned action for one path
struct Planned {
    path: String,
    action: SyncAction,
    remote: Option<RemoteEntry>,
    local: Option<LocalInfo>,
}

impl SyncEngine {
    /// One full pass. Callers hold the engine mutex.
    pub(crate) async fn full_sync_locked(&self) -> Result<SyncStats> {
        info!("Starting full sync");
        self.debounce().prune();

        self.process_retry_queue().await;

        let remote_list = self.remote().list_tree().await.map_err(|e| {
            error!("Failed to list remote files: {}", e);
            e
        })?;
        let remote_files: HashMap<String, RemoteEntry> = remote_list
            .into_iter()
            .filter(|f| self.scope().should_sync(&f.path))
            .map(|f| (f.path.clone(), f))
            .collect();

        let local_files = self.walk_local_tree();

        let state_files: HashMap<String, _> = self
            .store()
            .files_snapshot()
            .into_iter()
            .filter(|(p, _)| self.scope().should_sync(p))
            .collect();

        let mut all_paths = BTreeSet::new();
        all_paths.extend(remote_files.keys().cloned());
        all_paths.extend(local_files.keys().cloned());
        all_paths.extend(state_files.keys().cloned());

        let mut actions = Vec::new();
        for path in all_paths {
            let in_remote = remote_files.contains_key(&path);
            let in_local = local_files.contains_key(&path);
            let in_state = state_files.contains_key(&path);

            let action = match (in_remote, in_local, in_state) {
                (true, true, true) => SyncAction::SyncExisting,
                (true, false, true) => SyncAction::LocalDeleted,
                (false, true, true) => SyncAction::RemoteDeleted,
                (true, false, false) => SyncAction::DownloadNew,
                (false, true, false) => SyncAction::UploadNew,
                // Untracked on both sides: the local copy wins and
                // overwrites the remote one.
                (true, true, false) => SyncAction::UploadNew,
                (false, false, true) => {
                    debug!("Dropping stale state entry: {}", path);
                    self.store().remove_entry(&path);
                    continue;
                }
                (false, false, false) => continue,
            };

            actions.push(Planned {
                remote: remote_files.get(&path).cloned(),
                local: local_files.get(&path).cloned(),
                path,
                action,
            });
        }

        let mut stats = SyncStats::default();
        if actions.len() <= 1 {
            for planned in actions {
                if self.exec_action(planned).await {
                    stats.synced += 1;
                } else {
                    stats.errors += 1;
                }
            }
        } else {
            let results: Vec<bool> = stream::iter(
                actions.into_iter().map(|planned| self.exec_action(planned)),
            )
            .buffer_unordered(self.max_workers)
            .collect()
            .await;
            for ok in results {
                if ok {
                    stats.synced += 1;
                } else {
                    stats.errors += 1;
                }
            }
        }

        self.store().set_last_poll_now();
        self.store().save()?;
        self.progress().clear();
        info!(
            "Full sync complete: {} processed, {} errors",
            stats.synced, stats.errors
        );
        Ok(stats)
    }

    /// Run one action, record history, enqueue a retry on failure
    async fn exec_action(&self, planned: Planned) -> bool {
        let t0 = Instant::now();
        let result = match planned.action {
            SyncAction::SyncExisting => {
                match (&planned.remote, &planned.local) {
                    (Some(remote), Some(local)) => {
                        self.sync_existing(&planned.path, remote, local).await
                    }
                    _ => Ok(()),
                }
            }
            SyncAction::LocalDeleted => self.propagate_local_delete(&planned.path).await,
            SyncAction::RemoteDeleted => self.propagate_remote_delete(&planned.path).await,
            SyncAction::DownloadNew => match &planned.remote {
                Some(remote) => self.download_new(&planned.path, remote).await,
                None => Ok(()),
            },
            SyncAction::UploadNew => match &planned.local {
                Some(local) => self.upload_new(&planned.path, local).await,
                None => Ok(()),
            },
        };

        let duration = t0.elapsed().as_millis() as u64;
        match result {
            Ok(()) => {
                self.store().remove_retry(&planned.path, planned.action);
                self.history().log_event(
                    planned.action.as_str(),
                    &planned.path,
                    EventStatus::Ok,
                    None,
                    Some(duration),
                    None,
                );
                true
            }
            Err(e) => {
                error!("Error syncing {}: {}", planned.path, e);
                self.history().log_event(
                    planned.action.as_str(),
                    &planned.path,
                    EventStatus::Error,
                    None,
                    Some(duration),
                    Some(&e.to_string()),
                );
                self.store()
                    .add_retry(&planned.path, planned.action, &e.to_string());
                false
            }
        }
    }

    /// A file known on all three sides: decide touch, pull, push or conflict
    async fn sync_existing(
        &self,
        rel_path: &str,
        remote: &RemoteEntry,
        local: &LocalInfo,
    ) -> Result<()> {
        let Some(entry) = self.store().get(rel_path) else {
            // Entry vanished since planning; treat the local copy as fresh.
            return self.upload_new(rel_path, local).await;
        };

        let remote_changed = remote.mtime != entry.remote_mtime;
        let local_changed = local.mtime != entry.local_mtime;

        if !remote_changed && !local_changed {
            return Ok(());
        }

        // A single-sided mtime change with unchanged content is a touch:
        // refresh the recorded mtimes and skip the transfer.
        if remote_changed != local_changed {
            if let (Some(remote_hash), Some(known_remote)) =
                (&remote.remote_hash, &entry.remote_hash)
            {
                if remote_hash == known_remote {
                    let local_path = self.abs_path(rel_path);
                    if let Ok(local_hash) = sha256_file(&local_path).await {
                        if entry.local_hash.as_deref() == Some(local_hash.as_str()) {
                            debug!("Hash match, skipping transfer: {}", rel_path);
                            self.store().set_entry(
                                rel_path,
                                remote.size,
                                local.mtime.clone(),
                                remote.mtime.clone(),
                                Some(local_hash),
                                Some(remote_hash.clone()),
                            );
                            return Ok(());
                        }
                    }
                }
            }
        }

        if remote_changed && local_changed {
            return self.handle_conflict(rel_path, remote).await;
        }

        if remote_changed {
            // Pull: the remote copy advanced
            let local_path = self.abs_path(rel_path);
            self.debounce().mark(rel_path);
            let cb = OpProgress::new(self.progress().clone(), rel_path, TransferKind::Download);
            if !self.remote().download(rel_path, &local_path, Some(cb)).await? {
                return Err(SyncError::Transfer(format!(
                    "download refused for {rel_path}"
                )));
            }
            let new_local_mtime = local_mtime_iso(&local_path).await?;
            let local_hash = sha256_file(&local_path).await.ok();
            self.store().set_entry(
                rel_path,
                remote.size,
                new_local_mtime,
                remote.mtime.clone(),
                local_hash,
                remote.remote_hash.clone(),
            );
            info!("Pulled remote change: {}", rel_path);
        } else {
            // Push: the local copy advanced
            let local_path = self.abs_path(rel_path);
            self.debounce().mark(rel_path);
            let cb = OpProgress::new(self.progress().clone(), rel_path, TransferKind::Upload);
            let meta = self
                .remote()
                .upload(rel_path, &local_path, Some(cb))
                .await?
                .ok_or_else(|| {
                    SyncError::Transfer(format!("upload refused for {rel_path}"))
                })?;
            let new_remote_mtime = if meta.mtime.is_empty() {
                remote.mtime.clone()
            } else {
                meta.mtime
            };
            let local_hash = sha256_file(&local_path).await.ok();
            self.store().set_entry(
                rel_path,
                local.size,
                local.mtime.clone(),
                new_remote_mtime,
                local_hash,
                meta.remote_hash,
            );
            info!("Pushed local change: {}", rel_path);
        }
        self.progress().clear();
        Ok(())
    }

    /// Tracked file missing locally: the user deleted it here
    pub(crate) async fn propagate_local_delete(&self, rel_path: &str) -> Result<()> {
        info!("Local delete detected, removing remote: {}", rel_path);
        if !self.remote().delete(rel_path).await? {
            return Err(SyncError::Transfer(format!(
                "remote delete refused for {rel_path}"
            )));
        }
        self.store().remove_entry(rel_path);
        Ok(())
    }

    /// Tracked file missing remotely: it was deleted on the cloud side
    pub(crate) async fn propagate_remote_delete(&self, rel_path: &str) -> Result<()> {
        let local_path = self.abs_path(rel_path);
        info!("Remote delete detected, removing local: {}", rel_path);
        match tokio::fs::remove_file(&local_path).await {
            Ok(()) => self.prune_empty_parents(&local_path).await,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!("Failed to delete local file {}: {}", local_path.display(), e)
            }
        }
        self.store().remove_entry(rel_path);
        Ok(())
    }

    /// Remove now-empty directories up to (not including) the local root
    async fn prune_empty_parents(&self, local_path: &std::path::Path) {
        let mut parent = local_path.parent().map(|p| p.to_path_buf());
        while let Some(dir) = parent {
            if dir == self.local_root() {
                break;
            }
            if tokio::fs::remove_dir(&dir).await.is_err() {
                break;
            }
            parent = dir.parent().map(|p| p.to_path_buf());
        }
    }

    /// A remote file we have never seen: bring it down
    pub(crate) async fn download_new(&self, rel_path: &str, remote: &RemoteEntry) -> Result<()> {
        let local_path = self.abs_path(rel_path);
        self.debounce().mark(rel_path);
        let cb = OpProgress::new(self.progress().clone(), rel_path, TransferKind::Download);
        if !self.remote().download(rel_path, &local_path, Some(cb)).await? {
            return Err(SyncError::Transfer(format!(
                "download refused for {rel_path}"
            )));
        }
        let new_local_mtime = local_mtime_iso(&local_path).await?;
        let local_hash = sha256_file(&local_path).await.ok();
        self.store().set_entry(
            rel_path,
            remote.size,
            new_local_mtime,
            remote.mtime.clone(),
            local_hash,
            remote.remote_hash.clone(),
        );
        info!("New remote file downloaded: {}", rel_path);
        self.progress().clear();
        Ok(())
    }

    /// A local file the remote has never seen (or shadows untracked): push it
    pub(crate) async fn upload_new(&self, rel_path: &str, local: &LocalInfo) -> Result<()> {
        let local_path = self.abs_path(rel_path);
        let cb = OpProgress::new(self.progress().clone(), rel_path, TransferKind::Upload);
        let meta = self
            .remote()
            .upload(rel_path, &local_path, Some(cb))
            .await?
            .ok_or_else(|| SyncError::Transfer(format!("upload refused for {rel_path}")))?;

        let local_hash = sha256_file(&local_path).await.ok();
        self.store().set_entry(
            rel_path,
            local.size,
            local.mtime.clone(),
            meta.mtime,
            local_hash,
            meta.remote_hash,
        );
        info!("New local file uploaded: {}", rel_path);
        self.progress().clear();
        Ok(())
    }
}
