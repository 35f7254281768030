//! Append-only sync history
//!
//! One JSON object per line. After each append the file is trimmed back to
//! the newest 1000 lines so it never grows without bound.

use crate::util::now_iso;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::debug;

/// Lines kept after rotation
const MAX_ENTRIES: usize = 1000;

/// Outcome recorded for a sync event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Ok,
    Error,
    RetryFailed,
}

/// One line of the history file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub timestamp: String,
    pub action: String,
    pub path: String,
    pub status: EventStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Serialized appends and rotation over one JSONL file
#[derive(Debug)]
pub struct HistoryLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl HistoryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Append one event. History failures never fail the sync that produced
    /// them; they are logged at debug and dropped.
    pub fn log_event(
        &self,
        action: &str,
        path: &str,
        status: EventStatus,
        size: Option<u64>,
        duration_ms: Option<u64>,
        error: Option<&str>,
    ) {
        let event = HistoryEvent {
            timestamp: now_iso(),
            action: action.to_string(),
            path: path.to_string(),
            status,
            size,
            duration_ms,
            error: error.map(|e| e.to_string()),
        };

        let _guard = self.lock.lock().unwrap();
        if let Err(e) = self.append_and_rotate(&event) {
            debug!("Failed to write history: {}", e);
        }
    }

    fn append_and_rotate(&self, event: &HistoryEvent) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(event).map_err(std::io::Error::other)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        drop(file);

        let contents = std::fs::read_to_string(&self.path)?;
        let lines: Vec<&str> = contents.lines().collect();
        if lines.len() > MAX_ENTRIES {
            let tail = lines[lines.len() - MAX_ENTRIES..].join("\n");
            std::fs::write(&self.path, format!("{tail}\n"))?;
        }
        Ok(())
    }

    /// Newest-first tail of the history
    pub fn get_history(&self, limit: usize, offset: usize) -> Vec<HistoryEvent> {
        let _guard = self.lock.lock().unwrap();
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };

        contents
            .lines()
            .rev()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .skip(offset)
            .take(limit)
            .collect()
    }
}
