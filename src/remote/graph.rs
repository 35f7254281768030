//! Microsoft Graph share-link client
//!
//! Reaches a shared folder through `/shares/{token}` and, once resolved,
//! through the underlying `/drives/{id}/items/{id}` base for path
//! addressing. Every request goes through one retry loop that injects the
//! bearer token, refreshes it once on 401, honors `Retry-After` on 429,
//! backs off exponentially on 5xx and transport errors, and records each
//! outcome with the health metrics.

use crate::health::HealthMetrics;
use crate::progress::{Progress, ProgressCallback};
use crate::remote::{RemoteChange, RemoteClient, RemoteEntry, TokenProvider};
use crate::util::encode_path;
use crate::{Result, SyncError};
use async_trait::async_trait;
use base64::Engine as _;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, error, info, warn};

/// Default Graph API root
const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";

/// Largest upload sent as a single PUT
const SIMPLE_UPLOAD_MAX: u64 = 4 * 1024 * 1024;

/// Chunk size for upload sessions
const UPLOAD_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Builder for a [`GraphClient`]
#[derive(Clone)]
pub struct GraphClientBuilder {
    share_link: Option<String>,
    base_url: String,
    timeout: Duration,
    max_retries: u32,
    retry_base_delay: Duration,
    token_provider: Option<Arc<dyn TokenProvider>>,
    health: Option<Arc<HealthMetrics>>,
}

impl Default for GraphClientBuilder {
    fn default() -> Self {
        Self {
            share_link: None,
            base_url: GRAPH_API_BASE.to_string(),
            timeout: Duration::from_secs(60),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            token_provider: None,
            health: None,
        }
    }
}

impl GraphClientBuilder {
    /// Sets the shared-folder URL (required)
    pub fn share_link<S: Into<String>>(mut self, share_link: S) -> Self {
        self.share_link = Some(share_link.into());
        self
    }

    /// Overrides the API root (used by tests against a local server)
    pub fn base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sets the per-request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the retry budget for transient errors
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the base delay for exponential backoff
    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Wires an OAuth token source; without one, requests go out anonymous
    pub fn token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    /// Wires API-call outcome recording
    pub fn health(mut self, health: Arc<HealthMetrics>) -> Self {
        self.health = Some(health);
        self
    }

    /// Builds the client
    pub fn build(self) -> Result<GraphClient> {
        let share_link = self
            .share_link
            .ok_or_else(|| SyncError::Config("share link is required".to_string()))?;
        if share_link.is_empty() {
            return Err(SyncError::Config("share link is empty".to_string()));
        }
        url::Url::parse(&share_link)
            .map_err(|e| SyncError::Config(format!("invalid share link: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(GraphClient {
            inner: Arc::new(GraphClientInner {
                share_token: encode_sharing_url(&share_link),
                base_url: self.base_url,
                client,
                max_retries: self.max_retries,
                retry_base_delay: self.retry_base_delay,
                token_provider: self.token_provider,
                health: self.health,
                drive_base: Mutex::new(None),
            }),
        })
    }
}

struct GraphClientInner {
    share_token: String,
    base_url: String,
    client: reqwest::Client,
    max_retries: u32,
    retry_base_delay: Duration,
    token_provider: Option<Arc<dyn TokenProvider>>,
    health: Option<Arc<HealthMetrics>>,
    /// Resolved `/drives/{id}/items/{id}` base, cached after first success
    drive_base: Mutex<Option<String>>,
}

/// Graph share-link client
#[derive(Clone)]
pub struct GraphClient {
    inner: Arc<GraphClientInner>,
}

/// Convert a sharing URL to the Graph `u!` sharing token
fn encode_sharing_url(share_url: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(share_url.as_bytes());
    let encoded = encoded
        .trim_end_matches('=')
        .replace('/', "_")
        .replace('+', "-");
    format!("u!{encoded}")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveItem {
    id: Option<String>,
    name: Option<String>,
    size: Option<u64>,
    last_modified_date_time: Option<String>,
    file: Option<FileFacet>,
    folder: Option<serde_json::Value>,
    deleted: Option<serde_json::Value>,
    parent_reference: Option<ParentReference>,
}

#[derive(Debug, Clone, Deserialize)]
struct FileFacet {
    hashes: Option<Hashes>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Hashes {
    sha256_hash: Option<String>,
    quick_xor_hash: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParentReference {
    drive_id: Option<String>,
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DriveItemPage {
    #[serde(default)]
    value: Vec<DriveItem>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
    #[serde(rename = "@odata.deltaLink")]
    delta_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadSession {
    upload_url: String,
}

impl DriveItem {
    fn content_hash(&self) -> Option<String> {
        let hashes = self.file.as_ref()?.hashes.as_ref()?;
        hashes
            .sha256_hash
            .clone()
            .or_else(|| hashes.quick_xor_hash.clone())
            .filter(|h| !h.is_empty())
    }

    fn into_remote_entry(self, path: String) -> RemoteEntry {
        let remote_hash = self.content_hash();
        RemoteEntry {
            path,
            size: self.size.unwrap_or(0),
            mtime: self.last_modified_date_time.unwrap_or_default(),
            remote_hash,
        }
    }

    /// Relative path under the shared root, reconstructed from
    /// `parentReference.path` (`/drives/{d}/items/{i}:/sub/folder`)
    fn relative_path(&self) -> String {
        let name = self.name.clone().unwrap_or_default();
        let parent_rel = self
            .parent_reference
            .as_ref()
            .and_then(|p| p.path.as_deref())
            .and_then(|p| p.split_once(':').map(|(_, rel)| rel.trim_start_matches('/')))
            .unwrap_or("")
            .to_string();
        if parent_rel.is_empty() {
            name
        } else {
            format!("{parent_rel}/{name}")
        }
    }
}

impl GraphClient {
    /// Creates a new builder
    pub fn builder() -> GraphClientBuilder {
        GraphClientBuilder::default()
    }

    fn shares_base(&self) -> String {
        format!("{}/shares/{}", self.inner.base_url, self.inner.share_token)
    }

    fn record_health(&self, status: u16) {
        if let Some(health) = &self.inner.health {
            health.record_api_call(status);
        }
    }

    /// Resolve the share to its `/drives/{id}/items/{id}` base, needed for
    /// path addressing and the delta feed. Cached after the first success.
    async fn resolve_drive_base(&self) -> Option<String> {
        if let Some(base) = self.inner.drive_base.lock().unwrap().clone() {
            return Some(base);
        }

        let url = format!("{}/driveItem", self.shares_base());
        let resp = match self.request_with_retry(Method::GET, &url, None, None).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!("Could not resolve drive base: {}", e);
                return None;
            }
        };
        if resp.status() != StatusCode::OK {
            warn!("Could not resolve drive base: {}", resp.status());
            return None;
        }

        let item: DriveItem = match resp.json().await {
            Ok(item) => item,
            Err(e) => {
                warn!("Drive base response unreadable: {}", e);
                return None;
            }
        };
        let drive_id = item
            .parent_reference
            .as_ref()
            .and_then(|p| p.drive_id.clone());
        match (drive_id, item.id) {
            (Some(drive_id), Some(item_id)) => {
                let base = format!(
                    "{}/drives/{}/items/{}",
                    self.inner.base_url, drive_id, item_id
                );
                info!("Resolved share to drive base");
                *self.inner.drive_base.lock().unwrap() = Some(base.clone());
                Some(base)
            }
            _ => {
                warn!("Share response carried no drive reference");
                None
            }
        }
    }

    /// URL addressing one file inside the shared folder
    async fn item_url(&self, remote_path: &str, suffix: &str) -> String {
        let encoded = format!(":/{}:", encode_path(remote_path));
        match self.resolve_drive_base().await {
            Some(base) => format!("{base}{encoded}{suffix}"),
            None => format!("{}/driveItem{encoded}{suffix}", self.shares_base()),
        }
    }

    /// One HTTP attempt loop: token injection, single 401 refresh,
    /// Retry-After on 429, exponential backoff on 5xx and transport errors.
    /// Returns the final response even when its status is an error; callers
    /// map statuses to their own outcomes.
    async fn request_with_retry(
        &self,
        method: Method,
        url: &str,
        json_body: Option<serde_json::Value>,
        raw_body: Option<RawBody>,
    ) -> Result<reqwest::Response> {
        let mut did_401_refresh = false;
        let mut token = match &self.inner.token_provider {
            Some(provider) => provider.access_token(false).await.unwrap_or_default(),
            None => None,
        };

        let mut attempt: u32 = 0;
        loop {
            let mut req = self.inner.client.request(method.clone(), url);
            if let Some(t) = &token {
                req = req.bearer_auth(t);
            }
            if let Some(body) = &json_body {
                req = req.json(body);
            }
            if let Some(raw) = &raw_body {
                req = req.header("Content-Type", raw.content_type);
                req = req.header("Content-Length", raw.data.len().to_string());
                if let Some(range) = &raw.content_range {
                    req = req.header("Content-Range", range);
                }
                req = req.body(raw.data.clone());
            }

            match req.send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    self.record_health(status);

                    if status == 401 && !did_401_refresh {
                        did_401_refresh = true;
                        if let Some(provider) = &self.inner.token_provider {
                            if let Ok(Some(fresh)) = provider.access_token(true).await {
                                info!("Token refreshed on 401, retrying");
                                token = Some(fresh);
                                continue;
                            }
                        }
                        return Ok(resp);
                    }

                    if status == 429 {
                        if attempt >= self.inner.max_retries {
                            return Ok(resp);
                        }
                        let wait = resp
                            .headers()
                            .get("Retry-After")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .map(Duration::from_secs)
                            .unwrap_or_else(|| self.backoff_delay(attempt));
                        warn!("Rate limited, retrying in {}s", wait.as_secs());
                        tokio::time::sleep(wait).await;
                        attempt += 1;
                        continue;
                    }

                    if status < 500 {
                        return Ok(resp);
                    }

                    if attempt >= self.inner.max_retries {
                        return Ok(resp);
                    }
                    debug!("Server error {}, retrying", status);
                }
                Err(e) => {
                    self.record_health(0);
                    if attempt >= self.inner.max_retries {
                        error!(
                            "Request failed after {} retries: {} {} — {}",
                            self.inner.max_retries, method, url, e
                        );
                        return Err(e.into());
                    }
                    warn!(
                        "Request error (attempt {}/{}): {}",
                        attempt + 1,
                        self.inner.max_retries + 1,
                        e
                    );
                }
            }

            let wait = self.backoff_delay(attempt);
            debug!("Retrying in {}s", wait.as_secs());
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        self.inner.retry_base_delay * 2u32.saturating_pow(attempt.min(16))
    }

    async fn fetch_page(&self, url: &str) -> Result<DriveItemPage> {
        let resp = self.request_with_retry(Method::GET, url, None, None).await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(map_status(status.as_u16(), &body));
        }
        Ok(resp.json().await?)
    }
}

/// Body for raw (non-JSON) uploads
struct RawBody {
    data: Vec<u8>,
    content_type: &'static str,
    content_range: Option<String>,
}

/// Map a non-success status to the error taxonomy
fn map_status(status: u16, body: &str) -> SyncError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.get("message"))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.chars().take(200).collect());

    match status {
        401 => SyncError::AuthenticationFailed { message },
        404 => SyncError::NotFound {
            message,
            path: None,
        },
        429 => SyncError::RateLimited {
            message,
            retry_after: None,
        },
        code => SyncError::api(code, message),
    }
}

#[async_trait]
impl RemoteClient for GraphClient {
    async fn validate(&self) -> Result<bool> {
        let url = format!("{}/driveItem", self.shares_base());
        let resp = self.request_with_retry(Method::GET, &url, None, None).await?;
        if resp.status() == StatusCode::OK {
            let item: DriveItem = resp.json().await?;
            info!(
                "Connected to shared folder: {}",
                item.name.as_deref().unwrap_or("unknown")
            );
            Ok(true)
        } else {
            error!("Share link validation failed: {}", resp.status());
            Ok(false)
        }
    }

    async fn list_tree(&self) -> Result<Vec<RemoteEntry>> {
        let root_url = match self.resolve_drive_base().await {
            Some(base) => format!("{base}/children"),
            None => format!("{}/driveItem/children", self.shares_base()),
        };

        let mut files = Vec::new();
        // (folder path relative to the shared root, children URL)
        let mut pending = vec![(String::new(), root_url)];

        while let Some((prefix, mut url)) = pending.pop() {
            loop {
                let page = self.fetch_page(&url).await?;
                for item in page.value {
                    let name = match &item.name {
                        Some(name) => name.clone(),
                        None => continue,
                    };
                    let item_path = if prefix.is_empty() {
                        name
                    } else {
                        format!("{prefix}/{name}")
                    };

                    if item.folder.is_some() {
                        let child_url = self.item_url(&item_path, "/children").await;
                        pending.push((item_path, child_url));
                    } else if item.file.is_some() {
                        files.push(item.into_remote_entry(item_path));
                    }
                }

                match page.next_link {
                    Some(next) => url = next,
                    None => break,
                }
            }
        }

        Ok(files)
    }

    async fn list_changes(
        &self,
        cursor: Option<&str>,
    ) -> Result<(Vec<RemoteChange>, Option<String>)> {
        let drive_base = self
            .resolve_drive_base()
            .await
            .ok_or_else(|| SyncError::DeltaInvalid("drive base unresolved".to_string()))?;

        let mut url = match cursor {
            Some(cursor) => cursor.to_string(),
            None => format!("{drive_base}/delta"),
        };

        let mut changes = Vec::new();
        let new_cursor;

        loop {
            let page = self.fetch_page(&url).await?;
            for item in page.value {
                let is_deleted = item.deleted.is_some();
                let is_file = item.file.is_some();
                let is_folder = item.folder.is_some();
                if !is_deleted && !is_file && !is_folder {
                    continue;
                }

                let path = item.relative_path();
                if path.is_empty() {
                    continue;
                }
                changes.push(RemoteChange {
                    path,
                    size: item.size.unwrap_or(0),
                    mtime: item.last_modified_date_time.clone().unwrap_or_default(),
                    remote_hash: item.content_hash(),
                    deleted: is_deleted,
                    is_folder,
                });
            }

            match page.next_link {
                Some(next) => url = next,
                None => {
                    new_cursor = page.delta_link;
                    break;
                }
            }
        }

        Ok((changes, new_cursor))
    }

    async fn download(
        &self,
        remote_path: &str,
        local_path: &Path,
        progress: Option<Arc<dyn ProgressCallback>>,
    ) -> Result<bool> {
        let url = self.item_url(remote_path, "/content").await;
        let mut resp = self.request_with_retry(Method::GET, &url, None, None).await?;
        if !resp.status().is_success() {
            error!("Download failed for {}: {}", remote_path, resp.status());
            return Ok(false);
        }

        let total = resp.content_length();
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::File::create(local_path).await?;
        let mut bytes_done = 0u64;
        while let Some(chunk) = resp.chunk().await? {
            file.write_all(&chunk).await?;
            bytes_done += chunk.len() as u64;
            if let Some(cb) = &progress {
                cb.on_progress(&Progress::new(bytes_done, total));
            }
        }
        file.flush().await?;

        info!("Downloaded: {}", remote_path);
        Ok(true)
    }

    async fn upload(
        &self,
        remote_path: &str,
        local_path: &Path,
        progress: Option<Arc<dyn ProgressCallback>>,
    ) -> Result<Option<RemoteEntry>> {
        let size = tokio::fs::metadata(local_path).await?.len();
        if size <= SIMPLE_UPLOAD_MAX {
            self.simple_upload(remote_path, local_path, size, progress)
                .await
        } else {
            self.chunked_upload(remote_path, local_path, size, progress)
                .await
        }
    }

    async fn delete(&self, remote_path: &str) -> Result<bool> {
        let url = self.item_url(remote_path, "").await;
        let resp = self
            .request_with_retry(Method::DELETE, &url, None, None)
            .await?;
        match resp.status().as_u16() {
            200 | 204 => {
                info!("Deleted remote: {}", remote_path);
                Ok(true)
            }
            404 => {
                warn!("Remote file already gone: {}", remote_path);
                Ok(true)
            }
            status => {
                error!("Delete failed for {}: {}", remote_path, status);
                Ok(false)
            }
        }
    }
}

impl GraphClient {
    /// Single PUT for small files
    async fn simple_upload(
        &self,
        remote_path: &str,
        local_path: &Path,
        size: u64,
        progress: Option<Arc<dyn ProgressCallback>>,
    ) -> Result<Option<RemoteEntry>> {
        let url = self.item_url(remote_path, "/content").await;
        let data = tokio::fs::read(local_path).await?;

        if let Some(cb) = &progress {
            cb.on_progress(&Progress::new(0, Some(size)));
        }

        let resp = self
            .request_with_retry(
                Method::PUT,
                &url,
                None,
                Some(RawBody {
                    data,
                    content_type: "application/octet-stream",
                    content_range: None,
                }),
            )
            .await?;

        match resp.status().as_u16() {
            200 | 201 => {
                if let Some(cb) = &progress {
                    cb.on_progress(&Progress::new(size, Some(size)));
                }
                info!("Uploaded (simple): {}", remote_path);
                let item: DriveItem = resp.json().await?;
                Ok(Some(item.into_remote_entry(remote_path.to_string())))
            }
            status => {
                error!("Simple upload failed for {}: {}", remote_path, status);
                Ok(None)
            }
        }
    }

    /// Upload session with fixed-size chunks for large files
    async fn chunked_upload(
        &self,
        remote_path: &str,
        local_path: &Path,
        size: u64,
        progress: Option<Arc<dyn ProgressCallback>>,
    ) -> Result<Option<RemoteEntry>> {
        let url = self.item_url(remote_path, "/createUploadSession").await;
        let resp = self
            .request_with_retry(
                Method::POST,
                &url,
                Some(json!({
                    "item": {"@microsoft.graph.conflictBehavior": "replace"}
                })),
                None,
            )
            .await?;
        if !matches!(resp.status().as_u16(), 200 | 201) {
            error!(
                "Failed to create upload session for {}: {}",
                remote_path,
                resp.status()
            );
            return Ok(None);
        }
        let session: UploadSession = resp.json().await?;

        let mut file = tokio::fs::File::open(local_path).await?;
        let mut offset = 0u64;
        while offset < size {
            let chunk_len = UPLOAD_CHUNK_SIZE.min(size - offset) as usize;
            let mut chunk = vec![0u8; chunk_len];
            file.read_exact(&mut chunk).await?;
            let chunk_end = offset + chunk_len as u64 - 1;
            let content_range = format!("bytes {offset}-{chunk_end}/{size}");

            let chunk_resp = self
                .request_with_retry(
                    Method::PUT,
                    &session.upload_url,
                    None,
                    Some(RawBody {
                        data: chunk,
                        content_type: "application/octet-stream",
                        content_range: Some(content_range),
                    }),
                )
                .await?;

            match chunk_resp.status().as_u16() {
                200 | 201 => {
                    if let Some(cb) = &progress {
                        cb.on_progress(&Progress::new(size, Some(size)));
                    }
                    info!("Uploaded (chunked): {}", remote_path);
                    let item: DriveItem = chunk_resp.json().await?;
                    return Ok(Some(item.into_remote_entry(remote_path.to_string())));
                }
                202 => {
                    offset = chunk_end + 1;
                    if let Some(cb) = &progress {
                        cb.on_progress(&Progress::new(offset, Some(size)));
                    }
                }
                status => {
                    error!(
                        "Chunked upload failed for {} at offset {}: {}",
                        remote_path, offset, status
                    );
                    let _ = self
                        .request_with_retry(Method::DELETE, &session.upload_url, None, None)
                        .await;
                    return Ok(None);
                }
            }
        }

        Ok(None)
    }
}
