//! Progress tracking for transfers
//!
//! Two pieces: the [`ProgressCallback`] trait that streaming uploads and
//! downloads report through, and the [`ProgressTracker`] holding the single
//! current-operation record that status queries embed.

use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Immutable snapshot of transfer progress
#[derive(Debug, Clone)]
pub struct Progress {
    /// Bytes transferred so far
    pub bytes_transferred: u64,
    /// Total bytes to transfer, when known
    pub total_bytes: Option<u64>,
}

impl Progress {
    pub fn new(bytes_transferred: u64, total_bytes: Option<u64>) -> Self {
        Self {
            bytes_transferred,
            total_bytes,
        }
    }

    /// Progress percentage (0-100), or None when the total is unknown
    pub fn percentage(&self) -> Option<f64> {
        self.total_bytes.map(|total| {
            if total == 0 {
                100.0
            } else {
                (self.bytes_transferred as f64 / total as f64) * 100.0
            }
        })
    }
}

/// Receives updates while a transfer is in flight
pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, progress: &Progress);
}

/// Direction of the transfer currently in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    Upload,
    Download,
}

/// The operation the engine is running right now
#[derive(Debug, Clone, Serialize)]
pub struct CurrentOp {
    pub file: String,
    pub action: TransferKind,
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub progress_pct: u8,
}

/// Single current-operation record behind a mutex
#[derive(Debug, Default)]
pub struct ProgressTracker {
    inner: Mutex<Option<CurrentOp>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a transfer as started
    pub fn begin(&self, file: &str, action: TransferKind) {
        *self.inner.lock().unwrap() = Some(CurrentOp {
            file: file.to_string(),
            action,
            bytes_done: 0,
            bytes_total: 0,
            progress_pct: 0,
        });
    }

    /// Update byte counts for the transfer in flight
    pub fn update(&self, file: &str, action: TransferKind, bytes_done: u64, bytes_total: u64) {
        let pct = if bytes_total > 0 {
            ((bytes_done as f64 / bytes_total as f64) * 100.0) as u8
        } else {
            0
        };
        *self.inner.lock().unwrap() = Some(CurrentOp {
            file: file.to_string(),
            action,
            bytes_done,
            bytes_total,
            progress_pct: pct.min(100),
        });
    }

    /// Clear the record once the path completes
    pub fn clear(&self) {
        *self.inner.lock().unwrap() = None;
    }

    /// Snapshot for status queries
    pub fn current(&self) -> Option<CurrentOp> {
        self.inner.lock().unwrap().clone()
    }
}

/// Adapter wiring a transfer's progress stream into the tracker
pub struct OpProgress {
    tracker: Arc<ProgressTracker>,
    file: String,
    action: TransferKind,
}

impl OpProgress {
    pub fn new(tracker: Arc<ProgressTracker>, file: &str, action: TransferKind) -> Arc<Self> {
        tracker.begin(file, action);
        Arc::new(Self {
            tracker,
            file: file.to_string(),
            action,
        })
    }
}

impl ProgressCallback for OpProgress {
    fn on_progress(&self, progress: &Progress) {
        self.tracker.update(
            &self.file,
            self.action,
            progress.bytes_transferred,
            progress.total_bytes.unwrap_or(0),
        );
    }
}
