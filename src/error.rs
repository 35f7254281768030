//! Error types for the sync engine
//!
//! One error enum covers the whole crate, with contextual information so
//! callers can distinguish configuration mistakes, auth failures, transient
//! remote errors and local I/O problems.

use thiserror::Error;

/// Errors that can occur while syncing
#[derive(Error, Debug)]
pub enum SyncError {
    /// HTTP request failed at the transport level
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Authentication failed (401), after the single automatic token refresh
    #[error("Authentication failed (401): {message}")]
    AuthenticationFailed { message: String },

    /// Resource not found (404)
    #[error("Not Found (404): {message}")]
    NotFound {
        message: String,
        /// Remote path of the missing resource
        path: Option<String>,
    },

    /// Rate limited (429)
    #[error("Rate Limited (429): {message}")]
    RateLimited {
        message: String,
        /// Seconds until retry is allowed, from the Retry-After header
        retry_after: Option<u64>,
    },

    /// Any other API error with its status code
    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    /// Configuration error; surfaced synchronously, no state was mutated
    #[error("Configuration error: {0}")]
    Config(String),

    /// A transfer reported failure without a transport or API error
    #[error("Transfer failed: {0}")]
    Transfer(String),

    /// The remote delta cursor was rejected or yielded no terminal token
    #[error("Delta cursor invalid: {0}")]
    DeltaInvalid(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Local filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing error
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl SyncError {
    /// Create a NotFound error for a remote path
    pub fn not_found(message: impl Into<String>, path: impl Into<String>) -> Self {
        SyncError::NotFound {
            message: message.into(),
            path: Some(path.into()),
        }
    }

    /// Create a generic API error
    pub fn api(code: u16, message: impl Into<String>) -> Self {
        SyncError::Api {
            code,
            message: message.into(),
        }
    }

    /// Extract the HTTP status code if this error carries one
    pub fn status_code(&self) -> Option<u16> {
        match self {
            SyncError::AuthenticationFailed { .. } => Some(401),
            SyncError::NotFound { .. } => Some(404),
            SyncError::RateLimited { .. } => Some(429),
            SyncError::Api { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether retrying the same request later could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Request(_) | SyncError::RateLimited { .. } => true,
            SyncError::Api { code, .. } => *code >= 500,
            _ => false,
        }
    }

    /// Seconds the server asked us to wait, if any
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            SyncError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Result type for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_extraction() {
        assert_eq!(
            SyncError::not_found("missing", "/a.txt").status_code(),
            Some(404)
        );
        assert_eq!(SyncError::api(503, "unavailable").status_code(), Some(503));
        assert_eq!(SyncError::Config("bad".into()).status_code(), None);
    }

    #[test]
    fn test_is_retryable() {
        assert!(SyncError::api(500, "boom").is_retryable());
        assert!(SyncError::RateLimited {
            message: "slow down".into(),
            retry_after: Some(30)
        }
        .is_retryable());
        assert!(!SyncError::api(403, "forbidden").is_retryable());
        assert!(!SyncError::not_found("gone", "/x").is_retryable());
    }

    #[test]
    fn test_retry_after() {
        let err = SyncError::RateLimited {
            message: "later".into(),
            retry_after: Some(60),
        };
        assert_eq!(err.retry_after(), Some(60));
        assert_eq!(SyncError::api(500, "boom").retry_after(), None);
    }
}
