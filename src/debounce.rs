//! Watcher feedback suppression
//!
//! When the engine itself writes, renames or deletes a local file, the
//! watcher sees the same change a moment later. Paths touched by the engine
//! are marked here first, and the watcher drops events for any path marked
//! within the fresh window.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Events within this window after an engine write are echoes
const FRESH_WINDOW: Duration = Duration::from_secs(3);

/// Entries older than this are pruned at the start of each full pass
const EXPIRY: Duration = Duration::from_secs(5);

/// Map of recently engine-touched paths
#[derive(Debug, Default)]
pub struct DebounceSet {
    inner: Mutex<HashMap<String, Instant>>,
}

impl DebounceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the engine is about to touch this path
    pub fn mark(&self, rel_path: &str) {
        self.inner
            .lock()
            .unwrap()
            .insert(rel_path.to_string(), Instant::now());
    }

    /// Whether the path was marked within the fresh window
    pub fn recently_synced(&self, rel_path: &str) -> bool {
        let map = self.inner.lock().unwrap();
        match map.get(rel_path) {
            Some(ts) => ts.elapsed() < FRESH_WINDOW,
            None => false,
        }
    }

    /// Drop entries past the expiry window
    pub fn prune(&self) {
        self.inner
            .lock()
            .unwrap()
            .retain(|_, ts| ts.elapsed() <= EXPIRY);
    }

    #[cfg(test)]
    fn mark_at(&self, rel_path: &str, ts: Instant) {
        self.inner.lock().unwrap().insert(rel_path.to_string(), ts);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}
