//! drivesync
//!
//! Keeps a local directory tree in bi-directional sync with a cloud shared
//! folder reached through a share link. Local changes are pushed as the
//! filesystem watcher sees them; remote changes are pulled by a background
//! delta poll; a three-way diff against the last-known state reconciles the
//! rest without losing data.
//!
//! ## Layout
//!
//! - [`engine`]: the reconciler, with full and delta passes, the conflict
//!   policy and the retry queue
//! - [`state`]: the persistent state document with atomic commits
//! - [`remote`]: the cloud-side contract and the Graph share-link client
//! - [`manager`]: start/stop/trigger lifecycle around the engine
//! - [`watcher`] and [`debounce`]: local change detection with echo
//!   suppression
//! - [`history`], [`health`], [`loghub`] and [`progress`]: observability
//!   fed into the local control surface ([`server`])
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use drivesync::{Config, HealthMetrics, HistoryLog, SyncManager};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> drivesync::Result<()> {
//! let manager = SyncManager::new(
//!     Config::config_path()?,
//!     Arc::new(HealthMetrics::new()),
//!     Arc::new(HistoryLog::new(Config::history_path()?)),
//! );
//! manager.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod health;
pub mod history;
pub mod loghub;
pub mod manager;
pub mod notify;
pub mod progress;
pub mod remote;
pub mod scope;
pub mod server;
pub mod state;
pub mod util;
pub mod watcher;

pub use config::Config;
pub use engine::{DeltaOutcome, SyncEngine, SyncStats};
pub use error::{Result, SyncError};
pub use health::{HealthMetrics, HealthReport};
pub use history::{EventStatus, HistoryEvent, HistoryLog};
pub use loghub::{LogEntry, LogHub, LogHubLayer};
pub use manager::{Status, SyncManager};
pub use progress::{CurrentOp, Progress, ProgressCallback, ProgressTracker};
pub use remote::{GraphClient, RemoteChange, RemoteClient, RemoteEntry, TokenProvider};
pub use scope::ScopeFilter;
pub use state::{FileEntry, RetryItem, StateStore, SyncAction, SyncState};
