//! Local filesystem watching
//!
//! Wraps a debounced notify watcher and surfaces file-level events on an
//! async channel. Directory events never leave this module; a rename is
//! reported as a move so the caller can treat it as delete-old plus
//! create-new.

use crate::{Result, SyncError};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, FileIdMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Filesystem event, already reduced to files
#[derive(Debug, Clone)]
pub enum FileEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
    Moved { from: PathBuf, to: PathBuf },
}

/// Debounced recursive watcher over the local root
pub struct FileWatcher {
    _debouncer: Debouncer<RecommendedWatcher, FileIdMap>,
    receiver: mpsc::Receiver<FileEvent>,
}

impl FileWatcher {
    pub fn new(watch_path: &Path) -> Result<Self> {
        let (tx, rx) = mpsc::channel(100);

        let tx_clone = tx.clone();
        let mut debouncer = new_debouncer(
            Duration::from_millis(500),
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    for event in events {
                        if let Some(file_event) = process_event(event.event) {
                            if let Err(e) = tx_clone.blocking_send(file_event) {
                                error!("Failed to send file event: {}", e);
                            }
                        }
                    }
                }
                Err(errors) => {
                    for error in errors {
                        error!("Watch error: {:?}", error);
                    }
                }
            },
        )
        .map_err(|e| SyncError::Config(format!("failed to create file watcher: {e}")))?;

        debouncer
            .watcher()
            .watch(watch_path, RecursiveMode::Recursive)
            .map_err(|e| {
                SyncError::Config(format!(
                    "failed to watch {}: {e}",
                    watch_path.display()
                ))
            })?;

        info!("Started watching: {}", watch_path.display());

        Ok(Self {
            _debouncer: debouncer,
            receiver: rx,
        })
    }

    /// Next file event, or None once the watcher shut down
    pub async fn next_event(&mut self) -> Option<FileEvent> {
        self.receiver.recv().await
    }
}

/// Reduce a notify event to a file-level [`FileEvent`]
fn process_event(event: Event) -> Option<FileEvent> {
    debug!("Processing event: {:?}", event);

    match event.kind {
        EventKind::Create(_) => {
            let path = event.paths.first()?;
            if path.is_file() {
                return Some(FileEvent::Created(path.clone()));
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if let [from, to] = event.paths.as_slice() {
                return Some(FileEvent::Moved {
                    from: from.clone(),
                    to: to.clone(),
                });
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            let path = event.paths.first()?;
            return Some(FileEvent::Deleted(path.clone()));
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            let path = event.paths.first()?;
            if path.is_file() {
                return Some(FileEvent::Created(path.clone()));
            }
        }
        EventKind::Modify(_) => {
            let path = event.paths.first()?;
            if path.is_file() {
                return Some(FileEvent::Modified(path.clone()));
            }
        }
        EventKind::Remove(_) => {
            let path = event.paths.first()?;
            return Some(FileEvent::Deleted(path.clone()));
        }
        _ => {}
    }

    None
}
