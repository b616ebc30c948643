//! Dropbox API types
//!
//! Request and response shapes for the token, metadata and download endpoints.

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};

/// Deserialize a number that might be encoded as a string or null.
/// Some OAuth servers return `expires_in` as a string (e.g. "14400"),
/// and metadata for folders carries no size.
fn deserialize_flexible_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de;

    struct FlexibleU64Visitor;

    impl<'de> de::Visitor<'de> for FlexibleU64Visitor {
        type Value = u64;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a u64, a string containing a u64, or null")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<u64, E> {
            Ok(value)
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<u64, E> {
            u64::try_from(value).map_err(|_| de::Error::custom("negative value for u64"))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<u64, E> {
            value.parse::<u64>().map_err(de::Error::custom)
        }

        fn visit_none<E: de::Error>(self) -> Result<u64, E> {
            Ok(0)
        }

        fn visit_unit<E: de::Error>(self) -> Result<u64, E> {
            Ok(0)
        }
    }

    deserializer.deserialize_any(FlexibleU64Visitor)
}

/// Request argument naming a file, sent as JSON body or `Dropbox-API-Arg` header
#[derive(Debug, Serialize)]
pub struct PathArg<'a> {
    pub path: &'a str,
}

/// Response from the OAuth2 token endpoint
#[derive(Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Lifetime of the access token in seconds
    #[serde(default, deserialize_with = "deserialize_flexible_u64")]
    pub expires_in: u64,
    /// Present only when the server rotates the refresh token
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// File or folder metadata from `files/get_metadata` and `Dropbox-API-Result`
#[derive(Debug, Clone, Deserialize)]
pub struct FileMetadata {
    /// Entry kind: "file", "folder" or "deleted"
    #[serde(rename = ".tag", default)]
    pub tag: Option<String>,
    pub name: String,
    #[serde(default)]
    pub path_display: Option<String>,
    /// Unique identifier of this revision of the file
    #[serde(default)]
    pub rev: Option<String>,
    /// Last modification time on the server (ISO 8601)
    #[serde(default)]
    pub server_modified: Option<String>,
    #[serde(default, deserialize_with = "deserialize_flexible_u64")]
    pub size: u64,
}

impl FileMetadata {
    /// Version marker used for cache freshness: `rev`, else `server_modified`
    pub fn revision_tag(&self) -> Option<&str> {
        self.rev.as_deref().or(self.server_modified.as_deref())
    }
}

/// Result of a content download
#[derive(Debug, Clone)]
pub struct Download {
    pub content: Bytes,
    /// Metadata of the downloaded revision, when the server reported it
    pub metadata: Option<FileMetadata>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_file_metadata() {
        let json = r#"{
            ".tag": "file",
            "name": "report.json",
            "id": "id:a4ayc_80_OEAAAAAAAAAXw",
            "client_modified": "2024-05-12T15:50:38Z",
            "server_modified": "2024-05-12T15:50:38Z",
            "rev": "a1c10ce0dd78",
            "size": 7212,
            "path_lower": "/testing/report.json",
            "path_display": "/testing/report.json",
            "content_hash": "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        }"#;
        let meta: FileMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.name, "report.json");
        assert_eq!(meta.size, 7212);
        assert_eq!(meta.revision_tag(), Some("a1c10ce0dd78"));
        assert_eq!(meta.tag.as_deref(), Some("file"));
    }

    #[test]
    fn test_revision_falls_back_to_server_modified() {
        let json = r#"{"name": "a.txt", "server_modified": "2024-05-12T15:50:38Z"}"#;
        let meta: FileMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.revision_tag(), Some("2024-05-12T15:50:38Z"));
    }

    #[test]
    fn test_deserialize_folder_metadata() {
        let json = r#"{".tag": "folder", "name": "testing", "path_display": "/testing"}"#;
        let meta: FileMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.tag.as_deref(), Some("folder"));
        assert_eq!(meta.size, 0);
        assert_eq!(meta.revision_tag(), None);
    }

    #[test]
    fn test_deserialize_token_response_string_expiry() {
        let json = r#"{"access_token": "sl.abc", "token_type": "bearer", "expires_in": "14400"}"#;
        let token: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(token.access_token, "sl.abc");
        assert_eq!(token.expires_in, 14400);
        assert!(token.refresh_token.is_none());
    }

    #[test]
    fn test_token_response_debug_redacts_secrets() {
        let token = TokenResponse {
            access_token: "sl.secret".to_string(),
            expires_in: 60,
            refresh_token: Some("rt.secret".to_string()),
        };
        let rendered = format!("{:?}", token);
        assert!(!rendered.contains("secret"));
    }
}
