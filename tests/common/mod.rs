//! Shared test support: an in-memory remote with failure and delta
//! injection, plus engine assembly over temp directories.

use async_trait::async_trait;
use drivesync::progress::{Progress, ProgressCallback};
use drivesync::remote::{RemoteChange, RemoteClient, RemoteEntry};
use drivesync::{Result, SyncError};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct FakeFile {
    content: Vec<u8>,
    mtime: String,
}

#[derive(Debug)]
struct ChangeRecord {
    seq: u64,
    change: RemoteChange,
}

#[derive(Debug, Default)]
struct Inner {
    files: BTreeMap<String, FakeFile>,
    changes: Vec<ChangeRecord>,
    seq: u64,
    mtime_counter: u64,
    fail_uploads: HashMap<String, u32>,
    fail_list_changes: bool,
    valid: bool,
    upload_count: u32,
    download_count: u32,
    delete_count: u32,
}

/// In-memory stand-in for the cloud side
#[derive(Debug)]
pub struct FakeRemote {
    inner: Mutex<Inner>,
}

fn hex_sha256(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                valid: true,
                ..Default::default()
            }),
        })
    }

    /// Create or replace a remote file, advancing its mtime and appending
    /// to the change feed
    pub fn insert(&self, path: &str, content: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        inner.mtime_counter += 1;
        let mtime = format!("2026-08-01T00:00:00Z#{}", inner.mtime_counter);
        inner.files.insert(
            path.to_string(),
            FakeFile {
                content: content.to_vec(),
                mtime: mtime.clone(),
            },
        );
        let change = RemoteChange {
            path: path.to_string(),
            size: content.len() as u64,
            mtime,
            remote_hash: Some(hex_sha256(content)),
            deleted: false,
            is_folder: false,
        };
        inner.seq += 1;
        let seq = inner.seq;
        inner.changes.push(ChangeRecord { seq, change });
    }

    /// Delete a remote file, appending a deletion to the change feed
    pub fn remove(&self, path: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.files.remove(path);
        let change = RemoteChange {
            path: path.to_string(),
            size: 0,
            mtime: String::new(),
            remote_hash: None,
            deleted: true,
            is_folder: false,
        };
        inner.seq += 1;
        let seq = inner.seq;
        inner.changes.push(ChangeRecord { seq, change });
    }

    /// Make the next `n` uploads of `path` fail with a 500
    pub fn fail_uploads(&self, path: &str, n: u32) {
        self.inner
            .lock()
            .unwrap()
            .fail_uploads
            .insert(path.to_string(), n);
    }

    /// Make every change query fail, as a stale cursor would
    pub fn fail_list_changes(&self, fail: bool) {
        self.inner.lock().unwrap().fail_list_changes = fail;
    }

    pub fn content(&self, path: &str) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .unwrap()
            .files
            .get(path)
            .map(|f| f.content.clone())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.inner.lock().unwrap().files.contains_key(path)
    }

    pub fn paths(&self) -> Vec<String> {
        self.inner.lock().unwrap().files.keys().cloned().collect()
    }

    pub fn upload_count(&self) -> u32 {
        self.inner.lock().unwrap().upload_count
    }

    pub fn download_count(&self) -> u32 {
        self.inner.lock().unwrap().download_count
    }

    pub fn delete_count(&self) -> u32 {
        self.inner.lock().unwrap().delete_count
    }
}

#[async_trait]
impl RemoteClient for FakeRemote {
    async fn validate(&self) -> Result<bool> {
        Ok(self.inner.lock().unwrap().valid)
    }

    async fn list_tree(&self) -> Result<Vec<RemoteEntry>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .files
            .iter()
            .map(|(path, file)| RemoteEntry {
                path: path.clone(),
                size: file.content.len() as u64,
                mtime: file.mtime.clone(),
                remote_hash: Some(hex_sha256(&file.content)),
            })
            .collect())
    }

    async fn list_changes(
        &self,
        cursor: Option<&str>,
    ) -> Result<(Vec<RemoteChange>, Option<String>)> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_list_changes {
            return Err(SyncError::api(410, "cursor expired"));
        }

        let since: u64 = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let changes = inner
            .changes
            .iter()
            .filter(|r| r.seq > since)
            .map(|r| r.change.clone())
            .collect();
        Ok((changes, Some(inner.seq.to_string())))
    }

    async fn download(
        &self,
        remote_path: &str,
        local_path: &Path,
        progress: Option<Arc<dyn ProgressCallback>>,
    ) -> Result<bool> {
        let content = {
            let mut inner = self.inner.lock().unwrap();
            inner.download_count += 1;
            match inner.files.get(remote_path) {
                Some(file) => file.content.clone(),
                None => return Ok(false),
            }
        };

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(local_path, &content).await?;
        if let Some(cb) = progress {
            cb.on_progress(&Progress::new(
                content.len() as u64,
                Some(content.len() as u64),
            ));
        }
        Ok(true)
    }

    async fn upload(
        &self,
        remote_path: &str,
        local_path: &Path,
        progress: Option<Arc<dyn ProgressCallback>>,
    ) -> Result<Option<RemoteEntry>> {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.upload_count += 1;
            if let Some(remaining) = inner.fail_uploads.get_mut(remote_path) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(SyncError::api(500, "injected upload failure"));
                }
            }
        }

        let content = tokio::fs::read(local_path).await?;
        self.insert(remote_path, &content);
        if let Some(cb) = progress {
            cb.on_progress(&Progress::new(
                content.len() as u64,
                Some(content.len() as u64),
            ));
        }

        let inner = self.inner.lock().unwrap();
        let file = inner.files.get(remote_path).unwrap();
        Ok(Some(RemoteEntry {
            path: remote_path.to_string(),
            size: file.content.len() as u64,
            mtime: file.mtime.clone(),
            remote_hash: Some(hex_sha256(&file.content)),
        }))
    }

    async fn delete(&self, remote_path: &str) -> Result<bool> {
        let existed = self.inner.lock().unwrap().files.contains_key(remote_path);
        {
            self.inner.lock().unwrap().delete_count += 1;
        }
        if existed {
            self.remove(remote_path);
        }
        // A missing remote file still counts as a successful delete
        Ok(true)
    }
}
