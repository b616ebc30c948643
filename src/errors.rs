//! Gateway Error Types
//!
//! The error taxonomy surfaced by the credential manager and the file cache.
//! Errors are `Clone` because one in-flight refresh or download may have many waiters.

use crate::dropbox::DropboxError;

/// Errors returned by the gateway core
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// The requested reference is empty or resolves to the root folder
    #[error("Invalid file reference: {reference:?}")]
    InvalidReference { reference: String },

    /// No refresh token configured, or the token endpoint rejected it
    #[error("Authentication failed: {reason}")]
    Authentication { reason: String, status: Option<u16> },

    /// Upstream metadata or download failure
    #[error("Failed to fetch {path}: {message}")]
    Fetch {
        path: String,
        status: Option<u16>,
        message: String,
    },

    /// A shared in-flight task ended without producing a result
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn invalid_reference(reference: impl Into<String>) -> Self {
        GatewayError::InvalidReference {
            reference: reference.into(),
        }
    }

    /// Wrap a failed token exchange, keeping the upstream status
    pub fn authentication(err: &DropboxError) -> Self {
        GatewayError::Authentication {
            reason: err.to_string(),
            status: err.status(),
        }
    }

    /// Wrap a failed upstream call for `path`
    pub fn fetch(path: &str, err: &DropboxError) -> Self {
        GatewayError::Fetch {
            path: path.to_string(),
            status: err.status(),
            message: err.to_string(),
        }
    }

    /// Short machine-readable kind, used in HTTP error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::InvalidReference { .. } => "invalid_reference",
            GatewayError::Authentication { .. } => "authentication",
            GatewayError::Fetch { .. } => "fetch",
            GatewayError::Internal(_) => "internal",
        }
    }

    /// Upstream HTTP status, when one was observed
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            GatewayError::Authentication { status, .. } | GatewayError::Fetch { status, .. } => {
                *status
            }
            _ => None,
        }
    }
}

impl From<tokio::task::JoinError> for GatewayError {
    fn from(err: tokio::task::JoinError) -> Self {
        GatewayError::Internal(format!("in-flight task did not complete: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_keeps_status_and_path() {
        let upstream = DropboxError::from_status(409, r#"{"error_summary": "path/not_found/"}"#);
        let err = GatewayError::fetch("/testing/missing.json", &upstream);

        assert_eq!(err.kind(), "fetch");
        assert_eq!(err.upstream_status(), Some(409));
        match err {
            GatewayError::Fetch { path, message, .. } => {
                assert_eq!(path, "/testing/missing.json");
                assert!(message.contains("path/not_found/"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_authentication_without_status() {
        let err = GatewayError::authentication(&DropboxError::Network("connection reset".into()));
        assert_eq!(err.kind(), "authentication");
        assert_eq!(err.upstream_status(), None);
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_local_timeout_reports_no_upstream_status() {
        let err = GatewayError::fetch("/testing/report.json", &DropboxError::Timeout);
        assert_eq!(err.upstream_status(), None);
    }
}
