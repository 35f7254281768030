//! Sync lifecycle: start, stop, trigger, status
//!
//! The manager owns the background poll loop and the watcher pump and is
//! the only place that transitions between STOPPED and RUNNING. Lifecycle
//! transitions serialize on their own async mutex; status snapshots come
//! from a short-lived std mutex.

use crate::config::Config;
use crate::engine::SyncEngine;
use crate::health::HealthMetrics;
use crate::history::HistoryLog;
use crate::notify::Notifier;
use crate::progress::CurrentOp;
use crate::remote::{GraphClient, RemoteClient};
use crate::state::StateStore;
use crate::watcher::{FileEvent, FileWatcher};
use crate::{Result, SyncError};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Consecutive poll failures before the error notification fires
const FAILURE_NOTIFY_THRESHOLD: u32 = 3;

/// Snapshot returned by [`SyncManager::status`]
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub running: bool,
    pub connected: bool,
    pub last_sync: Option<String>,
    pub next_sync: Option<String>,
    pub file_count: usize,
    pub retry_count: usize,
    pub poll_interval: u64,
    pub local_folder: String,
    pub share_link_set: bool,
    pub error: Option<String>,
    pub current_op: Option<CurrentOp>,
}

#[derive(Default)]
struct ManagerState {
    running: bool,
    connected: bool,
    engine: Option<Arc<SyncEngine>>,
    stop_flag: Option<Arc<AtomicBool>>,
    poll_task: Option<JoinHandle<()>>,
    watcher_task: Option<JoinHandle<()>>,
    last_sync: Option<DateTime<Utc>>,
    next_sync: Option<DateTime<Utc>>,
    error: Option<String>,
}

/// Manages the sync engine's lifecycle
pub struct SyncManager {
    config_path: PathBuf,
    health: Arc<HealthMetrics>,
    history: Arc<HistoryLog>,
    state: Arc<Mutex<ManagerState>>,
    /// Serializes start/stop transitions
    lifecycle: tokio::sync::Mutex<()>,
}

impl SyncManager {
    pub fn new(
        config_path: PathBuf,
        health: Arc<HealthMetrics>,
        history: Arc<HistoryLog>,
    ) -> Self {
        Self {
            config_path,
            health,
            history,
            state: Arc::new(Mutex::new(ManagerState::default())),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn running(&self) -> bool {
        self.state.lock().unwrap().running
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn health(&self) -> &Arc<HealthMetrics> {
        &self.health
    }

    pub fn history(&self) -> &Arc<HistoryLog> {
        &self.history
    }

    /// Start syncing: validate the remote, run the initial full pass,
    /// initialize the delta cursor, then launch the watcher and poll loop.
    pub async fn start(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.running() {
            return Err(SyncError::Config("Already running".to_string()));
        }

        let config = Config::load(&self.config_path)?;
        if config.share_link.is_empty() {
            return Err(SyncError::Config("No share link configured".to_string()));
        }

        let remote: Arc<dyn RemoteClient> = Arc::new(
            GraphClient::builder()
                .share_link(&config.share_link)
                .health(self.health.clone())
                .build()?,
        );

        info!("Validating share link...");
        if !remote.validate().await? {
            let message = "Share link validation failed".to_string();
            self.state.lock().unwrap().error = Some(message.clone());
            return Err(SyncError::Config(message));
        }

        tokio::fs::create_dir_all(&config.local_folder).await?;

        // Make sure the state document exists on disk before anything else
        // runs against it.
        let store = Arc::new(StateStore::load(Config::state_db_path()?));
        store.save()?;

        let notifier = Notifier::new(config.notifications_enabled);
        let engine = Arc::new(SyncEngine::new(
            remote,
            &config,
            store,
            self.history.clone(),
        ));

        info!("Running initial full sync...");
        match engine.full_sync().await {
            Ok(stats) => {
                self.state.lock().unwrap().last_sync = Some(Utc::now());
                self.health.record_successful_sync();
                engine.init_delta_link().await;
                notifier.notify_sync_complete(stats.synced);
            }
            Err(e) => error!("Initial sync failed: {}", e),
        }

        let watcher = FileWatcher::new(&config.local_folder)?;
        let watcher_task = tokio::spawn(pump_watcher(engine.clone(), watcher));

        let stop_flag = Arc::new(AtomicBool::new(false));
        let poll_task = tokio::spawn(poll_loop(
            engine.clone(),
            self.state.clone(),
            self.health.clone(),
            notifier,
            stop_flag.clone(),
            config.poll_interval,
        ));

        {
            let mut state = self.state.lock().unwrap();
            state.running = true;
            state.connected = true;
            state.error = None;
            state.engine = Some(engine);
            state.stop_flag = Some(stop_flag);
            state.poll_task = Some(poll_task);
            state.watcher_task = Some(watcher_task);
        }
        info!("Sync engine started");
        Ok(())
    }

    /// Stop syncing: signal the poll loop, stop the watcher, join the loop
    /// with a ten-second timeout.
    pub async fn stop(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        let (stop_flag, poll_task, watcher_task) = {
            let mut state = self.state.lock().unwrap();
            if !state.running {
                return Err(SyncError::Config("Not running".to_string()));
            }
            (
                state.stop_flag.take(),
                state.poll_task.take(),
                state.watcher_task.take(),
            )
        };

        if let Some(flag) = stop_flag {
            flag.store(true, Ordering::SeqCst);
        }
        if let Some(task) = watcher_task {
            task.abort();
        }
        if let Some(task) = poll_task {
            if tokio::time::timeout(Duration::from_secs(10), task)
                .await
                .is_err()
            {
                warn!("Poll loop did not stop within 10s");
            }
        }

        {
            let mut state = self.state.lock().unwrap();
            state.running = false;
            state.connected = false;
            state.next_sync = None;
            state.engine = None;
        }
        info!("Sync engine stopped");
        Ok(())
    }

    /// Kick off one full reconciliation in the background. Serialized on
    /// the engine mutex with any pass already in flight.
    pub fn trigger(&self) -> Result<()> {
        let engine = {
            let state = self.state.lock().unwrap();
            if !state.running {
                return Err(SyncError::Config("Sync engine not running".to_string()));
            }
            state.engine.clone()
        };

        let Some(engine) = engine else {
            return Err(SyncError::Config("Sync engine not running".to_string()));
        };
        let shared = self.state.clone();
        let health = self.health.clone();
        tokio::spawn(async move {
            match engine.full_sync().await {
                Ok(_) => {
                    shared.lock().unwrap().last_sync = Some(Utc::now());
                    health.record_successful_sync();
                }
                Err(e) => error!("Manual sync failed: {}", e),
            }
        });
        Ok(())
    }

    /// Current status snapshot
    pub fn status(&self) -> Status {
        let config = Config::load(&self.config_path).unwrap_or_default();

        let state = self.state.lock().unwrap();
        let (file_count, retry_count, current_op) = match &state.engine {
            Some(engine) => (
                engine.store().file_count(),
                engine.store().retry_count(),
                engine.progress().current(),
            ),
            None => {
                let counts = Config::state_db_path()
                    .map(|path| {
                        let store = StateStore::load(path);
                        (store.file_count(), store.retry_count())
                    })
                    .unwrap_or((0, 0));
                (counts.0, counts.1, None)
            }
        };

        Status {
            running: state.running,
            connected: state.connected,
            last_sync: state.last_sync.map(iso),
            next_sync: state.next_sync.map(iso),
            file_count,
            retry_count,
            poll_interval: config.poll_interval,
            local_folder: config.local_folder.display().to_string(),
            share_link_set: !config.share_link.is_empty(),
            error: state.error.clone(),
            current_op,
        }
    }
}

fn iso(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Translate watcher events into single-file engine calls
async fn pump_watcher(engine: Arc<SyncEngine>, mut watcher: FileWatcher) {
    let root = engine.local_root().to_path_buf();
    while let Some(event) = watcher.next_event().await {
        match event {
            FileEvent::Created(path) | FileEvent::Modified(path) => {
                if let Some(rel) = rel_of(&root, &path) {
                    engine.handle_local_change(&rel).await;
                }
            }
            FileEvent::Deleted(path) => {
                if let Some(rel) = rel_of(&root, &path) {
                    engine.handle_local_delete(&rel).await;
                }
            }
            FileEvent::Moved { from, to } => {
                if let Some(rel) = rel_of(&root, &from) {
                    engine.handle_local_delete(&rel).await;
                }
                if let Some(rel) = rel_of(&root, &to) {
                    engine.handle_local_change(&rel).await;
                }
            }
        }
    }
}

fn rel_of(root: &Path, path: &Path) -> Option<String> {
    path.strip_prefix(root)
        .ok()
        .map(|rel| rel.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/"))
}

/// Background loop: sleep in one-second steps for responsive shutdown,
/// then run a delta pass under the engine mutex.
async fn poll_loop(
    engine: Arc<SyncEngine>,
    shared: Arc<Mutex<ManagerState>>,
    health: Arc<HealthMetrics>,
    notifier: Notifier,
    stop_flag: Arc<AtomicBool>,
    poll_interval: u64,
) {
    let mut consecutive_failures: u32 = 0;

    while !stop_flag.load(Ordering::SeqCst) {
        shared.lock().unwrap().next_sync =
            Some(Utc::now() + chrono::Duration::seconds(poll_interval as i64));

        for _ in 0..poll_interval {
            if stop_flag.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        if stop_flag.load(Ordering::SeqCst) {
            return;
        }

        match engine.delta_sync().await {
            Ok(stats) => {
                shared.lock().unwrap().last_sync = Some(Utc::now());
                health.record_successful_sync();
                notifier.notify_sync_complete(stats.synced);
                consecutive_failures = 0;
            }
            Err(e) => {
                error!("Poll sync failed: {}", e);
                consecutive_failures += 1;
                if consecutive_failures == FAILURE_NOTIFY_THRESHOLD {
                    notifier.notify_error(&format!("Sync failing repeatedly: {e}"));
                }
            }
        }
    }
}
