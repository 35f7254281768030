//! Conflict handling
//!
//! When both sides of a file diverged from the last synced state, the local
//! copy is preserved under a stamped conflict name and the remote version
//! takes the original path.

use super::SyncEngine;
use crate::history::EventStatus;
use crate::progress::{OpProgress, TransferKind};
use crate::remote::RemoteEntry;
use crate::util::{local_mtime_iso, sha256_file};
use crate::{Result, SyncError};
use chrono::{DateTime, Utc};
use tracing::warn;

/// Conflict name for a relative path: `{base}_CONFLICT_{YYYYMMDD_HHMMSS}{ext}`
pub(crate) fn conflict_rel_path(rel_path: &str, now: DateTime<Utc>) -> String {
    let stamp = now.format("%Y%m%d_%H%M%S");
    let (dir, basename) = match rel_path.rsplit_once('/') {
        Some((dir, base)) => (Some(dir), base),
        None => (None, rel_path),
    };

    // Extension split on the basename only; a leading dot is part of the
    // stem, not an extension.
    let (stem, ext) = if basename.len() > 1 {
        match basename[1..].rfind('.') {
            Some(idx) => basename.split_at(idx + 1),
            None => (basename, ""),
        }
    } else {
        (basename, "")
    };

    let renamed = format!("{stem}_CONFLICT_{stamp}{ext}");
    match dir {
        Some(dir) => format!("{dir}/{renamed}"),
        None => renamed,
    }
}

impl SyncEngine {
    /// Preserve the local copy under a conflict name, then pull the remote
    /// version into the original path and record the new state.
    pub(crate) async fn handle_conflict(
        &self,
        rel_path: &str,
        remote: &RemoteEntry,
    ) -> Result<()> {
        let local_path = self.abs_path(rel_path);
        let conflict_rel = conflict_rel_path(rel_path, Utc::now());
        let conflict_path = self.abs_path(&conflict_rel);

        if let Some(parent) = conflict_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&local_path, &conflict_path).await?;
        warn!(
            "CONFLICT: {} — local version saved as {}",
            rel_path, conflict_rel
        );
        self.history()
            .log_event("conflict", rel_path, EventStatus::Ok, None, None, None);
        self.notifier().notify_conflict(rel_path);

        self.debounce().mark(rel_path);
        let cb = OpProgress::new(self.progress().clone(), rel_path, TransferKind::Download);
        if !self.remote().download(rel_path, &local_path, Some(cb)).await? {
            return Err(SyncError::Transfer(format!(
                "download refused for {rel_path} after conflict rename"
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
        self.progress().clear();
        Ok(())
    }
}
