//! End-to-end engine scenarios against an in-memory remote

mod common;

use common::FakeRemote;
use drivesync::engine::SyncEngine;
use drivesync::history::EventStatus;
use drivesync::remote::RemoteClient;
use drivesync::state::{RetryItem, StateStore, SyncAction};
use drivesync::{Config, HistoryLog};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

struct Harness {
    _dir: TempDir,
    remote: Arc<FakeRemote>,
    engine: SyncEngine,
    local: PathBuf,
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let remote = FakeRemote::new();

    let mut config = Config::default();
    config.local_folder = dir.path().join("local");
    config.notifications_enabled = false;
    std::fs::create_dir_all(&config.local_folder).unwrap();

    let store = Arc::new(StateStore::load(dir.path().join("sync_state.json")));
    let history = Arc::new(HistoryLog::new(dir.path().join("history.jsonl")));
    let client: Arc<dyn RemoteClient> = remote.clone();
    let engine = SyncEngine::new(client, &config, store, history);

    Harness {
        local: config.local_folder,
        _dir: dir,
        remote,
        engine,
    }
}

fn read_local(h: &Harness, rel: &str) -> Option<String> {
    std::fs::read_to_string(h.local.join(rel)).ok()
}

fn write_local(h: &Harness, rel: &str, content: &str) {
    let path = h.local.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

/// Push a file's mtime into the future so second-granularity comparisons
/// see it as changed
fn bump_mtime(path: &Path, secs_forward: u64) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(secs_forward))
        .unwrap();
}

fn history_events(h: &Harness, action: &str, status: EventStatus) -> usize {
    h.engine
        .store()
        .path()
        .parent()
        .map(|dir| HistoryLog::new(dir.join("history.jsonl")))
        .map(|log| {
            log.get_history(1000, 0)
                .into_iter()
                .filter(|e| e.action == action && e.status == status)
                .count()
        })
        .unwrap_or(0)
}

// First sync pulls the remote tree down and seeds the delta cursor
#[tokio::test]
async fn first_sync_downloads_remote_tree() {
    let h = harness();
    h.remote.insert("a.txt", b"hello");
    h.remote.insert("d/b.txt", b"world");

    let stats = h.engine.delta_sync().await.unwrap();
    assert_eq!(stats.synced, 2);
    assert_eq!(stats.errors, 0);

    assert_eq!(read_local(&h, "a.txt").as_deref(), Some("hello"));
    assert_eq!(read_local(&h, "d/b.txt").as_deref(), Some("world"));

    let store = h.engine.store();
    assert_eq!(store.get("a.txt").unwrap().size, 5);
    assert_eq!(store.get("d/b.txt").unwrap().size, 5);
    assert!(store.delta_link().is_some());
    assert!(store.last_poll().is_some());
}

// A watcher-reported local create uploads within one event
#[tokio::test]
async fn local_create_propagates_to_remote() {
    let h = harness();
    write_local(&h, "c.txt", "x");

    h.engine.handle_local_change("c.txt").await;

    assert_eq!(h.remote.content("c.txt").as_deref(), Some(b"x".as_slice()));
    assert_eq!(h.engine.store().get("c.txt").unwrap().size, 1);
}

// A remote deletion arrives through the delta feed
#[tokio::test]
async fn remote_delete_propagates_locally() {
    let h = harness();
    h.remote.insert("a.txt", b"hello");
    h.engine.delta_sync().await.unwrap();
    assert!(read_local(&h, "a.txt").is_some());

    h.remote.remove("a.txt");
    h.engine.delta_sync().await.unwrap();

    assert!(read_local(&h, "a.txt").is_none());
    assert!(h.engine.store().get("a.txt").is_none());
}

// Both sides edited between passes; the local copy is preserved as a
// conflict file and the remote version wins the original path
#[tokio::test]
async fn two_side_edit_creates_conflict_file() {
    let h = harness();
    h.remote.insert("x.txt", b"base");
    h.engine.full_sync().await.unwrap();

    write_local(&h, "x.txt", "L");
    bump_mtime(&h.local.join("x.txt"), 5);
    h.remote.insert("x.txt", b"R");

    h.engine.full_sync().await.unwrap();

    assert_eq!(read_local(&h, "x.txt").as_deref(), Some("R"));

    let conflict: Vec<PathBuf> = std::fs::read_dir(&h.local)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().contains("_CONFLICT_"))
                .unwrap_or(false)
        })
        .collect();
    assert_eq!(conflict.len(), 1, "expected exactly one conflict file");
    assert_eq!(
        std::fs::read_to_string(&conflict[0]).unwrap(),
        "L",
        "conflict file must preserve the local content"
    );
    assert_eq!(history_events(&h, "conflict", EventStatus::Ok), 1);
}

// Divergence detected while applying a delta change also conflicts
#[tokio::test]
async fn delta_change_with_local_edit_conflicts() {
    let h = harness();
    h.remote.insert("x.txt", b"base");
    h.engine.delta_sync().await.unwrap();

    write_local(&h, "x.txt", "L");
    bump_mtime(&h.local.join("x.txt"), 5);
    h.remote.insert("x.txt", b"R");

    h.engine.delta_sync().await.unwrap();

    assert_eq!(read_local(&h, "x.txt").as_deref(), Some("R"));
    let conflicts = std::fs::read_dir(&h.local)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains("_CONFLICT_"))
        .count();
    assert_eq!(conflicts, 1);
}

// An upload that fails twice recovers on the third pass and leaves an
// empty retry queue
#[tokio::test]
async fn retry_queue_recovers_after_failures() {
    let h = harness();
    write_local(&h, "big.bin", "data");
    h.remote.fail_uploads("big.bin", 2);

    let stats = h.engine.full_sync().await.unwrap();
    assert_eq!(stats.errors, 1);
    let queue = h.engine.store().retry_queue_snapshot();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].attempts, 1);
    assert_eq!(queue[0].action, SyncAction::UploadNew);

    let stats = h.engine.full_sync().await.unwrap();
    assert_eq!(stats.errors, 1);
    assert_eq!(h.engine.store().retry_queue_snapshot()[0].attempts, 2);

    let stats = h.engine.full_sync().await.unwrap();
    assert_eq!(stats.errors, 0);
    assert!(h.engine.store().retry_queue_snapshot().is_empty());
    assert_eq!(
        h.remote.content("big.bin").as_deref(),
        Some(b"data".as_slice())
    );

    assert_eq!(history_events(&h, "upload_new", EventStatus::Error), 2);
    assert_eq!(history_events(&h, "upload_new", EventStatus::Ok), 1);
}

// An item at five attempts is dropped for good, not re-queued
#[tokio::test]
async fn retry_terminates_after_five_attempts() {
    let h = harness();
    h.engine.store().set_retry_queue(vec![RetryItem {
        path: "gone.txt".to_string(),
        action: SyncAction::UploadNew,
        attempts: 5,
        next_retry: 0,
        error: "500 from server".to_string(),
    }]);

    h.engine.full_sync().await.unwrap();

    assert!(h.engine.store().retry_queue_snapshot().is_empty());
    assert_eq!(history_events(&h, "upload_new", EventStatus::RetryFailed), 1);
}

// Ignored paths cross neither direction and never enter state
#[tokio::test]
async fn ignored_paths_never_sync() {
    let h = harness();
    write_local(&h, ".DS_Store", "junk");
    h.remote.insert("cache.tmp", b"junk");

    h.engine.full_sync().await.unwrap();

    assert_eq!(h.remote.upload_count(), 0);
    assert!(!h.remote.contains(".DS_Store"));
    assert!(read_local(&h, "cache.tmp").is_none());
    assert!(h.engine.store().get(".DS_Store").is_none());
    assert!(h.engine.store().get("cache.tmp").is_none());
}

// A pass over an unchanged world leaves the file map identical
#[tokio::test]
async fn reconciliation_is_idempotent() {
    let h = harness();
    h.remote.insert("a.txt", b"hello");
    write_local(&h, "c.txt", "x");

    h.engine.full_sync().await.unwrap();
    let first = h.engine.store().files_snapshot();

    h.engine.full_sync().await.unwrap();
    let second = h.engine.store().files_snapshot();

    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
}

// Every tracked path exists on both sides after a successful pass
#[tokio::test]
async fn state_is_closed_over_both_sides() {
    let h = harness();
    h.remote.insert("a.txt", b"hello");
    h.remote.insert("d/b.txt", b"world");
    write_local(&h, "c.txt", "x");

    h.engine.full_sync().await.unwrap();

    for path in h.engine.store().files_snapshot().keys() {
        assert!(
            h.local.join(path).is_file(),
            "{path} tracked but missing locally"
        );
        assert!(
            h.remote.contains(path),
            "{path} tracked but missing remotely"
        );
    }
}

// The engine's own download suppresses the watcher echo
#[tokio::test]
async fn engine_write_suppresses_watcher_echo() {
    let h = harness();
    h.remote.insert("a.txt", b"hello");
    h.engine.full_sync().await.unwrap();

    h.engine.handle_local_change("a.txt").await;

    assert_eq!(h.remote.upload_count(), 0);
}

// A touch that changes only the mtime moves no bytes
#[tokio::test]
async fn hash_short_circuit_skips_touch() {
    let h = harness();
    write_local(&h, "t.txt", "stable");
    h.engine.full_sync().await.unwrap();
    assert_eq!(h.remote.upload_count(), 1);

    bump_mtime(&h.local.join("t.txt"), 5);
    let old_entry = h.engine.store().get("t.txt").unwrap();

    h.engine.full_sync().await.unwrap();

    assert_eq!(h.remote.upload_count(), 1, "touch must not re-upload");
    assert_eq!(h.remote.download_count(), 0);
    let entry = h.engine.store().get("t.txt").unwrap();
    assert_ne!(entry.local_mtime, old_entry.local_mtime);
    assert_eq!(entry.local_hash, old_entry.local_hash);
}

// Present on both sides but untracked: the local copy overwrites the
// remote one
#[tokio::test]
async fn untracked_both_sides_uploads_local() {
    let h = harness();
    h.remote.insert("x.txt", b"REMOTE");
    write_local(&h, "x.txt", "LOCAL");

    h.engine.full_sync().await.unwrap();

    assert_eq!(
        h.remote.content("x.txt").as_deref(),
        Some(b"LOCAL".as_slice())
    );
    assert_eq!(read_local(&h, "x.txt").as_deref(), Some("LOCAL"));
}

// Local deletion between passes removes the remote copy
#[tokio::test]
async fn local_delete_propagates_on_poll() {
    let h = harness();
    h.remote.insert("a.txt", b"hello");
    h.engine.full_sync().await.unwrap();

    std::fs::remove_file(h.local.join("a.txt")).unwrap();
    h.engine.full_sync().await.unwrap();

    assert!(!h.remote.contains("a.txt"));
    assert!(h.engine.store().get("a.txt").is_none());
}

// A watcher-reported delete takes the single-file path
#[tokio::test]
async fn watcher_delete_removes_remote() {
    let h = harness();
    write_local(&h, "c.txt", "x");
    h.engine.handle_local_change("c.txt").await;
    assert!(h.remote.contains("c.txt"));

    std::fs::remove_file(h.local.join("c.txt")).unwrap();
    h.engine.handle_local_delete("c.txt").await;

    assert!(!h.remote.contains("c.txt"));
    assert!(h.engine.store().get("c.txt").is_none());
}

// A stale delta cursor falls back to a full pass without losing changes
#[tokio::test]
async fn stale_cursor_falls_back_to_full_sync() {
    let h = harness();
    h.remote.insert("a.txt", b"hello");
    h.engine.delta_sync().await.unwrap();
    assert!(h.engine.store().delta_link().is_some());

    h.remote.insert("new.txt", b"fresh");
    h.remote.fail_list_changes(true);

    let stats = h.engine.delta_sync().await.unwrap();
    assert_eq!(stats.errors, 0);
    assert_eq!(read_local(&h, "new.txt").as_deref(), Some("fresh"));
}

// A remote edit with an unchanged local copy pulls the new content
#[tokio::test]
async fn remote_edit_pulls_new_content() {
    let h = harness();
    h.remote.insert("a.txt", b"v1");
    h.engine.full_sync().await.unwrap();

    h.remote.insert("a.txt", b"v2 with more bytes");
    h.engine.full_sync().await.unwrap();

    assert_eq!(
        read_local(&h, "a.txt").as_deref(),
        Some("v2 with more bytes")
    );
    let entry = h.engine.store().get("a.txt").unwrap();
    assert_eq!(entry.size, 18);
}

// A local edit with an unchanged remote copy pushes the new content
#[tokio::test]
async fn local_edit_pushes_new_content() {
    let h = harness();
    write_local(&h, "doc.txt", "v1");
    h.engine.full_sync().await.unwrap();

    write_local(&h, "doc.txt", "v2!");
    bump_mtime(&h.local.join("doc.txt"), 5);
    h.engine.full_sync().await.unwrap();

    assert_eq!(
        h.remote.content("doc.txt").as_deref(),
        Some(b"v2!".as_slice())
    );
    assert_eq!(h.engine.store().get("doc.txt").unwrap().size, 3);
}

// Emptied parent directories disappear with a remote delete
#[tokio::test]
async fn remote_delete_prunes_empty_parents() {
    let h = harness();
    h.remote.insert("deep/nested/file.txt", b"x");
    h.engine.full_sync().await.unwrap();
    assert!(h.local.join("deep/nested/file.txt").is_file());

    h.remote.remove("deep/nested/file.txt");
    h.engine.full_sync().await.unwrap();

    assert!(!h.local.join("deep/nested").exists());
    assert!(!h.local.join("deep").exists());
    assert!(h.local.exists());
}
