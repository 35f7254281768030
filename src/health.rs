//! Engine health: rolling API-call outcomes, sync recency, disk headroom
//!
//! The remote client records the status of every HTTP attempt here (0 for
//! transport-level failures). Reports aggregate a five-minute window.

use serde::Serialize;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use sysinfo::Disks;

/// Width of the rolling sample window
const API_WINDOW: Duration = Duration::from_secs(300);

/// Aggregated health snapshot
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub api_calls_5min: usize,
    pub api_error_rate_5min: f64,
    pub last_successful_sync: Option<u64>,
    pub disk_free_bytes: Option<u64>,
    pub uptime_seconds: u64,
}

#[derive(Debug)]
struct HealthInner {
    api_calls: VecDeque<(Instant, u16)>,
    last_successful_sync: Option<u64>,
}

/// In-memory health metrics, shared between the remote client and the
/// status surface
#[derive(Debug)]
pub struct HealthMetrics {
    started: Instant,
    inner: Mutex<HealthInner>,
}

impl Default for HealthMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthMetrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            inner: Mutex::new(HealthInner {
                api_calls: VecDeque::new(),
                last_successful_sync: None,
            }),
        }
    }

    /// Record one API call outcome; status 0 means the request never got a
    /// response.
    pub fn record_api_call(&self, status: u16) {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        inner.api_calls.push_back((now, status));
        while let Some((ts, _)) = inner.api_calls.front() {
            if now.duration_since(*ts) > API_WINDOW {
                inner.api_calls.pop_front();
            } else {
                break;
            }
        }
    }

    /// Record that a reconciliation pass completed successfully
    pub fn record_successful_sync(&self) {
        self.inner.lock().unwrap().last_successful_sync = Some(crate::util::unix_now());
    }

    /// Aggregate the window into a report; disk stats come from the
    /// filesystem holding the local root.
    pub fn report(&self, local_root: &Path) -> HealthReport {
        let now = Instant::now();
        let (total, errors, last_successful_sync) = {
            let inner = self.inner.lock().unwrap();
            let recent: Vec<u16> = inner
                .api_calls
                .iter()
                .filter(|(ts, _)| now.duration_since(*ts) <= API_WINDOW)
                .map(|(_, code)| *code)
                .collect();
            let errors = recent.iter().filter(|&&code| code >= 400).count();
            (recent.len(), errors, inner.last_successful_sync)
        };

        let error_rate = if total > 0 {
            (errors as f64 / total as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };

        HealthReport {
            api_calls_5min: total,
            api_error_rate_5min: error_rate,
            last_successful_sync,
            disk_free_bytes: disk_free(local_root),
            uptime_seconds: self.started.elapsed().as_secs(),
        }
    }
}

/// Free space on the filesystem holding `path`, picked by the longest
/// matching mount point
fn disk_free(path: &Path) -> Option<u64> {
    let target = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|d| target.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| d.available_space())
}
