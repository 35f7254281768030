//! Graph client behavior against a mock HTTP server

use async_trait::async_trait;
use drivesync::remote::{GraphClient, RemoteClient, TokenProvider};
use drivesync::Result;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SHARE_LINK: &str = "https://1drv.ms/f/s!shared-folder";

fn client_for(server: &MockServer) -> GraphClient {
    GraphClient::builder()
        .share_link(SHARE_LINK)
        .base_url(server.uri())
        .retry_base_delay(Duration::from_millis(10))
        .build()
        .unwrap()
}

/// Mounts the share→drive resolution that path addressing depends on
async fn mount_drive_base(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path_regex("^/shares/[^/]+/driveItem$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "root1",
            "name": "shared-folder",
            "parentReference": {"driveId": "d1"}
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_validate_success() {
    let server = MockServer::start().await;
    mount_drive_base(&server).await;

    let client = client_for(&server);
    assert!(client.validate().await.unwrap());
}

#[tokio::test]
async fn test_validate_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex("^/shares/[^/]+/driveItem$"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": {"message": "access denied"}
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(!client.validate().await.unwrap());
}

#[tokio::test]
async fn test_list_tree_recurses_and_paginates() {
    let server = MockServer::start().await;
    mount_drive_base(&server).await;

    // Mount the page-2 mock first: mocks match in mount order and the
    // page-1 mock carries no query constraint.
    let next = format!("{}/drives/d1/items/root1/children?page=2", server.uri());
    Mock::given(method("GET"))
        .and(path_regex(r"^/drives/d1/items/root1/children$"))
        .and(wiremock::matchers::query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{
                "name": "z.bin",
                "size": 9,
                "lastModifiedDateTime": "2026-08-01T11:00:00Z",
                "file": {}
            }]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path_regex("^/drives/d1/items/root1/children$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                {
                    "name": "a.txt",
                    "size": 5,
                    "lastModifiedDateTime": "2026-08-01T10:00:00Z",
                    "file": {"hashes": {"sha256Hash": "aaa"}}
                },
                {"name": "docs", "folder": {"childCount": 1}}
            ],
            "@odata.nextLink": next
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path_regex("^/drives/d1/items/root1:/docs:/children$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{
                "name": "b.txt",
                "size": 7,
                "lastModifiedDateTime": "2026-08-01T12:00:00Z",
                "file": {"hashes": {"quickXorHash": "qx"}}
            }]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let mut tree = client.list_tree().await.unwrap();
    tree.sort_by(|a, b| a.path.cmp(&b.path));

    let paths: Vec<&str> = tree.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, vec!["a.txt", "docs/b.txt", "z.bin"]);
    assert_eq!(tree[0].remote_hash.as_deref(), Some("aaa"));
    assert_eq!(tree[1].size, 7);
    assert_eq!(tree[1].remote_hash.as_deref(), Some("qx"));
    assert_eq!(tree[2].remote_hash, None);
}

#[tokio::test]
async fn test_list_changes_follows_pages_to_delta_link() {
    let server = MockServer::start().await;
    mount_drive_base(&server).await;

    let page2 = format!("{}/drives/d1/items/root1/delta?page=2", server.uri());
    let final_cursor = format!("{}/drives/d1/items/root1/delta?token=f9", server.uri());

    Mock::given(method("GET"))
        .and(path_regex("^/drives/d1/items/root1/delta$"))
        .and(wiremock::matchers::query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{
                "name": "old.txt",
                "deleted": {"state": "deleted"},
                "parentReference": {"path": "/drives/d1/items/root1:/docs"}
            }],
            "@odata.deltaLink": final_cursor
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path_regex("^/drives/d1/items/root1/delta$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{
                "name": "a.txt",
                "size": 5,
                "lastModifiedDateTime": "2026-08-01T10:00:00Z",
                "file": {"hashes": {"sha256Hash": "aaa"}},
                "parentReference": {"path": "/drives/d1/items/root1:"}
            }],
            "@odata.nextLink": page2
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let (changes, cursor) = client.list_changes(None).await.unwrap();

    assert_eq!(changes.len(), 2);
    assert_eq!(changes[0].path, "a.txt");
    assert!(!changes[0].deleted);
    assert_eq!(changes[1].path, "docs/old.txt");
    assert!(changes[1].deleted);
    assert!(cursor.unwrap().contains("token=f9"));
}

#[tokio::test]
async fn test_download_streams_to_file() {
    let server = MockServer::start().await;
    mount_drive_base(&server).await;

    Mock::given(method("GET"))
        .and(path_regex("^/drives/d1/items/root1:/a.txt:/content$"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("nested/a.txt");
    let client = client_for(&server);

    assert!(client.download("a.txt", &target, None).await.unwrap());
    assert_eq!(std::fs::read_to_string(&target).unwrap(), "hello");
}

#[tokio::test]
async fn test_simple_upload_returns_metadata() {
    let server = MockServer::start().await;
    mount_drive_base(&server).await;

    Mock::given(method("PUT"))
        .and(path_regex("^/drives/d1/items/root1:/up.txt:/content$"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "name": "up.txt",
            "size": 4,
            "lastModifiedDateTime": "2026-08-01T13:00:00Z",
            "file": {"hashes": {"sha256Hash": "s256"}}
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("up.txt");
    std::fs::write(&source, "data").unwrap();

    let client = client_for(&server);
    let entry = client.upload("up.txt", &source, None).await.unwrap().unwrap();

    assert_eq!(entry.path, "up.txt");
    assert_eq!(entry.size, 4);
    assert_eq!(entry.mtime, "2026-08-01T13:00:00Z");
    assert_eq!(entry.remote_hash.as_deref(), Some("s256"));
}

#[tokio::test]
async fn test_delete_treats_404_as_success() {
    let server = MockServer::start().await;
    mount_drive_base(&server).await;

    Mock::given(method("DELETE"))
        .and(path_regex("^/drives/d1/items/root1:/gone.txt:$"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(client.delete("gone.txt").await.unwrap());
}

#[tokio::test]
async fn test_transient_500_is_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path_regex("^/shares/[^/]+/driveItem$"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/shares/[^/]+/driveItem$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "root1",
            "name": "shared-folder",
            "parentReference": {"driveId": "d1"}
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(client.validate().await.unwrap());
}

#[tokio::test]
async fn test_rate_limit_honors_retry_after() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path_regex("^/shares/[^/]+/driveItem$"))
        .respond_with(
            ResponseTemplate::new(429).insert_header("Retry-After", "0"),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/shares/[^/]+/driveItem$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "root1",
            "name": "shared-folder",
            "parentReference": {"driveId": "d1"}
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(client.validate().await.unwrap());
}

/// Token source whose refresh produces a new value
struct RotatingTokens {
    refreshes: AtomicU32,
}

#[async_trait]
impl TokenProvider for RotatingTokens {
    async fn access_token(&self, force_refresh: bool) -> Result<Option<String>> {
        if force_refresh {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok(Some("fresh-token".to_string()))
        } else {
            Ok(Some("stale-token".to_string()))
        }
    }
}

#[tokio::test]
async fn test_401_triggers_single_token_refresh() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path_regex("^/shares/[^/]+/driveItem$"))
        .and(header("Authorization", "Bearer stale-token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/shares/[^/]+/driveItem$"))
        .and(header("Authorization", "Bearer fresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "root1",
            "name": "shared-folder",
            "parentReference": {"driveId": "d1"}
        })))
        .mount(&server)
        .await;

    let provider = Arc::new(RotatingTokens {
        refreshes: AtomicU32::new(0),
    });
    let client = GraphClient::builder()
        .share_link(SHARE_LINK)
        .base_url(server.uri())
        .retry_base_delay(Duration::from_millis(10))
        .token_provider(provider.clone())
        .build()
        .unwrap();

    assert!(client.validate().await.unwrap());
    assert_eq!(provider.refreshes.load(Ordering::SeqCst), 1);
}
