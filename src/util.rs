//! Small helpers shared across the crate: Graph path encoding, mtime
//! formatting and file hashing.

use crate::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::SystemTime;
use tokio::io::AsyncReadExt;

/// Encodes a remote path for safe use in Graph API URLs
///
/// Splits the path on `/` so the directory structure survives, then
/// percent-encodes each segment (always %20 for spaces, never +).
///
/// # Examples
///
/// ```
/// use drivesync::util::encode_path;
///
/// assert_eq!(encode_path("my folder/file.txt"), "my%20folder/file.txt");
/// assert_eq!(encode_path("data/file[2024].txt"), "data/file%5B2024%5D.txt");
/// ```
pub fn encode_path(path: &str) -> String {
    if path.is_empty() || path == "/" {
        return path.to_string();
    }

    let segments: Vec<String> = path
        .split('/')
        .map(|segment| {
            if segment.is_empty() {
                segment.to_string()
            } else {
                percent_encode(segment)
            }
        })
        .collect();

    segments.join("/")
}

/// Percent-encodes a path segment, leaving RFC 3986 unreserved characters
fn percent_encode(s: &str) -> String {
    let mut encoded = String::new();

    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            }
            _ => {
                encoded.push_str(&format!("%{:02X}", byte));
            }
        }
    }

    encoded
}

/// Format a filesystem timestamp as an ISO-8601 UTC string.
///
/// Truncated to whole seconds so a recorded mtime and a freshly-observed one
/// compare equal as strings. All local mtimes stored in sync state go
/// through here.
pub fn mtime_to_iso(t: SystemTime) -> String {
    let dt: DateTime<Utc> = t.into();
    let secs = dt.timestamp();
    DateTime::<Utc>::from_timestamp(secs, 0)
        .unwrap_or(dt)
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Current time as an ISO-8601 UTC string, second precision
pub fn now_iso() -> String {
    mtime_to_iso(SystemTime::now())
}

/// Current unix time in seconds
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Observed mtime of a local file as an ISO-8601 UTC string
pub async fn local_mtime_iso(path: &Path) -> Result<String> {
    let metadata = tokio::fs::metadata(path).await?;
    let modified = metadata.modified()?;
    Ok(mtime_to_iso(modified))
}

/// Streaming SHA-256 of a local file, as lowercase hex
pub async fn sha256_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 65536];

    loop {
        let bytes_read = file.read(&mut buffer).await?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_encode_simple_path() {
        assert_eq!(encode_path("simple/path.txt"), "simple/path.txt");
    }

    #[test]
    fn test_encode_path_with_spaces() {
        assert_eq!(
            encode_path("my folder/my file.txt"),
            "my%20folder/my%20file.txt"
        );
    }

    #[test]
    fn test_encode_path_with_unicode() {
        assert_eq!(
            encode_path("文档/测试.txt"),
            "%E6%96%87%E6%A1%A3/%E6%B5%8B%E8%AF%95.txt"
        );
    }

    #[test]
    fn test_encode_empty_and_root() {
        assert_eq!(encode_path(""), "");
        assert_eq!(encode_path("/"), "/");
    }

    #[test]
    fn test_mtime_iso_truncates_to_seconds() {
        let t = std::time::UNIX_EPOCH + Duration::new(1_700_000_000, 999_000_000);
        assert_eq!(mtime_to_iso(t), "2023-11-14T22:13:20Z");
    }

    #[test]
    fn test_mtime_iso_stable_across_subsecond_reads() {
        let a = std::time::UNIX_EPOCH + Duration::new(1_700_000_000, 1_000_000);
        let b = std::time::UNIX_EPOCH + Duration::new(1_700_000_000, 500_000_000);
        assert_eq!(mtime_to_iso(a), mtime_to_iso(b));
    }

    #[tokio::test]
    async fn test_sha256_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hash.txt");
        tokio::fs::write(&path, b"hello").await.unwrap();

        let hash = sha256_file(&path).await.unwrap();
        assert_eq!(
            hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
