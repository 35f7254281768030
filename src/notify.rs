//! Desktop notifications
//!
//! Best-effort: failures are logged and swallowed, and nothing here blocks
//! the async runtime. Notification display is synchronous on some
//! platforms, so each send runs on the blocking thread pool.

use tracing::debug;

/// Sends desktop notifications for sync milestones
#[derive(Debug, Clone)]
pub struct Notifier {
    enabled: bool,
}

impl Notifier {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// A sync cycle finished
    pub fn notify_sync_complete(&self, count: usize) {
        self.send("DriveSync", format!("Sync complete — {count} file(s) processed."));
    }

    /// Both sides of a file diverged; the local copy was preserved
    pub fn notify_conflict(&self, path: &str) {
        self.send("DriveSync — Conflict", format!("Conflict detected: {path}"));
    }

    /// Sync is failing repeatedly
    pub fn notify_error(&self, message: &str) {
        self.send("DriveSync — Error", message.to_string());
    }

    fn send(&self, title: &'static str, message: String) {
        if !self.enabled {
            return;
        }
        // Fire-and-forget on the blocking pool; show() can block on
        // platform notification daemons.
        let spawn = tokio::runtime::Handle::try_current().map(|handle| {
            handle.spawn_blocking(move || {
                if let Err(e) = notify_rust::Notification::new()
                    .summary(title)
                    .body(&message)
                    .show()
                {
                    debug!("Notification failed: {}", e);
                }
            })
        });
        if spawn.is_err() {
            debug!("Notification skipped: no runtime");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_notifier_is_silent() {
        let notifier = Notifier::new(false);
        notifier.notify_sync_complete(3);
        notifier.notify_conflict("a.txt");
        notifier.notify_error("boom");
    }

    #[test]
    fn test_send_without_runtime_does_not_panic() {
        let notifier = Notifier::new(true);
        notifier.notify_error("no runtime here");
    }
}
