//! Log streaming hub
//!
//! A `tracing` layer that keeps the most recent formatted records and fans
//! live ones out to subscribers. New subscribers get the history replayed
//! into their queue first; a subscriber that falls behind loses the newest
//! records rather than blocking the logger.

use serde::Serialize;
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Records kept for backfill on subscribe
const HISTORY_CAP: usize = 100;

/// Per-subscriber queue capacity
const SUBSCRIBER_CAP: usize = 200;

/// One captured log record
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub formatted: String,
}

#[derive(Debug, Default)]
struct HubInner {
    history: VecDeque<LogEntry>,
    subscribers: Vec<mpsc::Sender<LogEntry>>,
}

/// Shared ring of recent log records plus live subscriber queues
#[derive(Debug, Default)]
pub struct LogHub {
    inner: Mutex<HubInner>,
}

impl LogHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to history and fan out to every live subscriber. A full queue
    /// drops this (newest) record for that subscriber; a closed queue is
    /// detached.
    pub fn publish(&self, entry: LogEntry) {
        let mut inner = self.inner.lock().unwrap();
        if inner.history.len() == HISTORY_CAP {
            inner.history.pop_front();
        }
        inner.history.push_back(entry.clone());

        inner.subscribers.retain(|tx| {
            match tx.try_send(entry.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => true,
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Register a subscriber; its queue starts with the history replayed
    pub fn subscribe(&self) -> mpsc::Receiver<LogEntry> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAP);
        let mut inner = self.inner.lock().unwrap();
        for entry in &inner.history {
            if tx.try_send(entry.clone()).is_err() {
                break;
            }
        }
        inner.subscribers.push(tx);
        rx
    }

    /// Live subscriber count (closed queues are detached on next publish)
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().unwrap().subscribers.len()
    }

    /// Snapshot of the history ring
    pub fn history(&self) -> Vec<LogEntry> {
        self.inner.lock().unwrap().history.iter().cloned().collect()
    }
}

/// `tracing` layer publishing every event into a [`LogHub`]
pub struct LogHubLayer {
    hub: Arc<LogHub>,
}

impl LogHubLayer {
    pub fn new(hub: Arc<LogHub>) -> Self {
        Self { hub }
    }
}

impl<S: Subscriber> Layer<S> for LogHubLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let meta = event.metadata();
        let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let level = meta.level().to_string();
        let target = meta.target().to_string();
        let formatted = format!("{timestamp} [{level}] {target}: {}", visitor.message);

        self.hub.publish(LogEntry {
            timestamp,
            level,
            target,
            message: visitor.message,
            formatted,
        });
    }
}

/// Collects the `message` field; other fields are appended `key=value`
#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            if !self.message.is_empty() {
                self.message.push(' ');
            }
            let _ = write!(self.message, "{}={:?}", field.name(), value);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            if !self.message.is_empty() {
                self.message.push(' ');
            }
            let _ = write!(self.message, "{}={}", field.name(), value);
        }
    }
}
