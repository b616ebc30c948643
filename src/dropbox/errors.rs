//! Dropbox API Error Types
//!
//! Structured error handling for Dropbox API operations.
//! Maps HTTP status codes to specific error variants so callers can render them.

use serde::Deserialize;

/// Dropbox API error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum DropboxError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Rate limited, try again after backoff")]
    RateLimited,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Endpoint-specific failure (HTTP 409), e.g. `path/not_found/`
    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({0}): {1}")]
    Server(u16, String),

    /// The client gave up waiting; no response was received
    #[error("Request timeout")]
    Timeout,

    /// The server answered 408
    #[error("Upstream request timeout: {0}")]
    UpstreamTimeout(String),

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Request error ({0}): {1}")]
    Request(u16, String),
}

/// Error body returned by the API for endpoint errors and most 4xx responses
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error_summary: Option<String>,
    error_description: Option<String>,
    error: Option<serde_json::Value>,
}

impl DropboxError {
    /// Whether a caller could reasonably retry this request later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DropboxError::RateLimited
                | DropboxError::Timeout
                | DropboxError::UpstreamTimeout(_)
                | DropboxError::Network(_)
                | DropboxError::Server(_, _)
        )
    }

    /// Upstream HTTP status, when the failure came from a response
    pub fn status(&self) -> Option<u16> {
        match self {
            DropboxError::Unauthorized(_) => Some(401),
            DropboxError::BadRequest(_) => Some(400),
            DropboxError::RateLimited => Some(429),
            DropboxError::NotFound(_) => Some(404),
            DropboxError::Forbidden(_) => Some(403),
            DropboxError::Api(_) => Some(409),
            DropboxError::Server(status, _) => Some(*status),
            DropboxError::Request(status, _) => Some(*status),
            DropboxError::UpstreamTimeout(_) => Some(408),
            DropboxError::Timeout | DropboxError::Network(_) | DropboxError::Decode(_) => None,
        }
    }

    /// Create a DropboxError from an HTTP status code and response body
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = summarize_body(body);
        match status {
            400 => DropboxError::BadRequest(detail),
            401 => DropboxError::Unauthorized(detail),
            403 => DropboxError::Forbidden(detail),
            404 => DropboxError::NotFound(detail),
            408 => DropboxError::UpstreamTimeout(detail),
            409 => DropboxError::Api(detail),
            429 => DropboxError::RateLimited,
            500..=599 => DropboxError::Server(status, detail),
            _ => DropboxError::Request(status, detail),
        }
    }
}

impl From<reqwest::Error> for DropboxError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DropboxError::Timeout
        } else if err.is_decode() {
            DropboxError::Decode(err.to_string())
        } else {
            DropboxError::Network(err.to_string())
        }
    }
}

/// Pull the most useful message out of an error body.
///
/// Endpoint errors carry `error_summary`, the OAuth token endpoint uses
/// `error`/`error_description`, anything else is passed through as text.
fn summarize_body(body: &str) -> String {
    let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) else {
        return body.trim().to_string();
    };

    if let Some(summary) = parsed.error_summary {
        return summary;
    }

    match (parsed.error, parsed.error_description) {
        (Some(serde_json::Value::String(code)), Some(description)) => {
            format!("{}: {}", code, description)
        }
        (Some(serde_json::Value::String(code)), None) => code,
        (_, Some(description)) => description,
        _ => body.trim().to_string(),
    }
}
