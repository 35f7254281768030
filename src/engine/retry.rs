//! Retry queue processing
//!
//! Runs at the start of each full pass. Items past their backoff deadline
//! are re-attempted; an item that keeps failing is dropped after five
//! attempts with a terminal history event.

use super::SyncEngine;
use crate::history::EventStatus;
use crate::state::{next_retry_time, RetryItem, SyncAction};
use crate::util::{local_mtime_iso, sha256_file, unix_now};
use crate::{Result, SyncError};
use tracing::{info, warn};

/// Attempts after which an item is dropped for good
const MAX_ATTEMPTS: u32 = 5;

impl SyncEngine {
    pub(crate) async fn process_retry_queue(&self) {
        let queue = self.store().retry_queue_snapshot();
        if queue.is_empty() {
            return;
        }

        let now = unix_now();
        let mut remaining = Vec::new();
        for mut item in queue {
            if item.attempts >= MAX_ATTEMPTS {
                warn!(
                    "Retry queue: giving up on {} ({}) after {} attempts",
                    item.path, item.action, item.attempts
                );
                self.history().log_event(
                    item.action.as_str(),
                    &item.path,
                    EventStatus::RetryFailed,
                    None,
                    None,
                    Some(&item.error),
                );
                continue;
            }
            if item.next_retry > now {
                remaining.push(item);
                continue;
            }

            info!(
                "Retry queue: retrying {} ({}), attempt {}",
                item.path,
                item.action,
                item.attempts + 1
            );
            match self.attempt_retry(&item).await {
                Ok(()) => {}
                Err(e) => {
                    warn!("Retry failed for {}: {}", item.path, e);
                    item.attempts += 1;
                    item.error = e.to_string();
                    item.next_retry = next_retry_time(item.attempts);
                    remaining.push(item);
                }
            }
        }
        self.store().set_retry_queue(remaining);
    }

    async fn attempt_retry(&self, item: &RetryItem) -> Result<()> {
        let local_path = self.abs_path(&item.path);
        match item.action {
            SyncAction::UploadNew | SyncAction::SyncExisting if local_path.is_file() => {
                let meta = self
                    .remote()
                    .upload(&item.path, &local_path, None)
                    .await?
                    .ok_or_else(|| {
                        SyncError::Transfer(format!("upload refused for {}", item.path))
                    })?;
                let metadata = tokio::fs::metadata(&local_path).await?;
                let local_mtime = local_mtime_iso(&local_path).await?;
                let local_hash = sha256_file(&local_path).await.ok();
                self.store().set_entry(
                    &item.path,
                    metadata.len(),
                    local_mtime,
                    meta.mtime,
                    local_hash,
                    meta.remote_hash,
                );
                info!("Retry succeeded: uploaded {}", item.path);
                self.history().log_event(
                    "retry_upload",
                    &item.path,
                    EventStatus::Ok,
                    Some(metadata.len()),
                    None,
                    None,
                );
                Ok(())
            }
            SyncAction::DownloadNew | SyncAction::SyncExisting => {
                if !self.remote().download(&item.path, &local_path, None).await? {
                    return Err(SyncError::Transfer(format!(
                        "download refused for {}",
                        item.path
                    )));
                }
                let metadata = tokio::fs::metadata(&local_path).await?;
                let local_mtime = local_mtime_iso(&local_path).await?;
                let local_hash = sha256_file(&local_path).await.ok();
                // The server's mtime is unknown here; the next pass
                // observes it and refreshes the entry.
                self.store().set_entry(
                    &item.path,
                    metadata.len(),
                    local_mtime,
                    String::new(),
                    local_hash,
                    None,
                );
                info!("Retry succeeded: downloaded {}", item.path);
                self.history().log_event(
                    "retry_download",
                    &item.path,
                    EventStatus::Ok,
                    Some(metadata.len()),
                    None,
                    None,
                );
                Ok(())
            }
            SyncAction::LocalDeleted => {
                if !self.remote().delete(&item.path).await? {
                    return Err(SyncError::Transfer(format!(
                        "remote delete refused for {}",
                        item.path
                    )));
                }
                self.store().remove_entry(&item.path);
                info!("Retry succeeded: deleted remote {}", item.path);
                self.history().log_event(
                    "retry_delete",
                    &item.path,
                    EventStatus::Ok,
                    None,
                    None,
                    None,
                );
                Ok(())
            }
            SyncAction::UploadNew => Err(SyncError::Transfer(format!(
                "local file missing for {}",
                item.path
            ))),
            SyncAction::RemoteDeleted => {
                match tokio::fs::remove_file(&local_path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                self.store().remove_entry(&item.path);
                info!("Retry succeeded: removed local {}", item.path);
                self.history().log_event(
                    "retry_delete",
                    &item.path,
                    EventStatus::Ok,
                    None,
                    None,
                    None,
                );
                Ok(())
            }
        }
    }
}
