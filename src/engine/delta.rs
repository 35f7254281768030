//! Incremental sync driven by the server's change feed
//!
//! A delta pass applies only what changed since the stored cursor. Anything
//! that invalidates the feed (no cursor, a query error, a response without
//! a terminal cursor) surfaces as [`DeltaOutcome::Fallback`] and the caller
//! runs a full reconciliation instead.

use super::{SyncEngine, SyncStats};
use crate::history::EventStatus;
use crate::progress::{OpProgress, TransferKind};
use crate::remote::{RemoteChange, RemoteEntry};
use crate::util::local_mtime_iso;
use crate::{Result, SyncError};
use std::time::Instant;
use tracing::{error, info, warn};

/// Result of attempting a delta pass
#[derive(Debug)]
pub enum DeltaOutcome {
    /// The change feed was applied
    Applied(SyncStats),
    /// The feed could not be used; run a full reconciliation
    Fallback,
}

impl SyncEngine {
    /// Attempt one delta pass. Callers hold the engine mutex.
    pub(crate) async fn try_delta(&self) -> Result<DeltaOutcome> {
        let Some(delta_link) = self.store().delta_link() else {
            info!("No delta cursor — falling back to full sync");
            return Ok(DeltaOutcome::Fallback);
        };

        let (changes, new_cursor) = match self.remote.list_changes(Some(&delta_link)).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Delta query failed ({}) — falling back to full sync", e);
                return Ok(DeltaOutcome::Fallback);
            }
        };

        let Some(new_cursor) = new_cursor else {
            warn!("Delta returned no new cursor — falling back to full sync");
            return Ok(DeltaOutcome::Fallback);
        };

        info!("Delta sync: {} changes", changes.len());
        self.debounce().prune();

        let mut stats = SyncStats::default();
        for change in changes {
            if change.path.is_empty() || change.is_folder {
                continue;
            }
            if !self.scope().should_sync(&change.path) {
                continue;
            }

            let t0 = Instant::now();
            match self.apply_delta_change(&change).await {
                Ok(applied) => {
                    // The conflict path writes its own history event
                    if applied != "conflict" {
                        self.history().log_event(
                            applied,
                            &change.path,
                            EventStatus::Ok,
                            (applied == "download").then_some(change.size),
                            Some(t0.elapsed().as_millis() as u64),
                            None,
                        );
                    }
                    stats.synced += 1;
                }
                Err(e) => {
                    error!("Delta sync error for {}: {}", change.path, e);
                    self.history().log_event(
                        "delta_error",
                        &change.path,
                        EventStatus::Error,
                        None,
                        Some(t0.elapsed().as_millis() as u64),
                        Some(&e.to_string()),
                    );
                    stats.errors += 1;
                }
            }
        }

        self.store().set_delta_link(Some(new_cursor));
        self.store().set_last_poll_now();
        self.store().save()?;
        self.progress().clear();
        info!(
            "Delta sync complete: {} processed, {} errors",
            stats.synced, stats.errors
        );
        Ok(DeltaOutcome::Applied(stats))
    }

    /// Apply one change from the feed; returns the history label
    async fn apply_delta_change(&self, change: &RemoteChange) -> Result<&'static str> {
        let local_path = self.abs_path(&change.path);

        if change.deleted {
            match tokio::fs::remove_file(&local_path).await {
                Ok(()) => info!("Delta: remote delete → removed local: {}", change.path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            self.store().remove_entry(&change.path);
            return Ok("delete");
        }

        // Created or modified remotely. If the local copy also moved since
        // the last sync, both sides changed: preserve the local one.
        if let Some(entry) = self.store().get(&change.path) {
            if local_path.exists() {
                let local_mtime = local_mtime_iso(&local_path).await?;
                if local_mtime != entry.local_mtime {
                    let remote = RemoteEntry {
                        path: change.path.clone(),
                        size: change.size,
                        mtime: change.mtime.clone(),
                        remote_hash: change.remote_hash.clone(),
                    };
                    self.handle_conflict(&change.path, &remote).await?;
                    return Ok("conflict");
                }
            }
        }

        self.debounce().mark(&change.path);
        let cb = OpProgress::new(self.progress().clone(), &change.path, TransferKind::Download);
        if !self
            .remote()
            .download(&change.path, &local_path, Some(cb))
            .await?
        {
            return Err(SyncError::Transfer(format!(
                "download refused for {}",
                change.path
            )));
        }
        let new_local_mtime = local_mtime_iso(&local_path).await?;
        self.store().set_entry(
            &change.path,
            change.size,
            new_local_mtime,
            change.mtime.clone(),
            None,
            change.remote_hash.clone(),
        );
        self.progress().clear();
        Ok("download")
    }
}
