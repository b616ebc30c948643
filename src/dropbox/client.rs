//! Dropbox API Client
//!
//! Thin wrapper over the three upstream calls the gateway needs: the OAuth2
//! token exchange, file metadata lookup and content download. The client holds
//! no credential state; callers pass the bearer token on every call.

use reqwest::{Client, Response};
use std::time::Duration;
use tracing::{debug, info};

use super::errors::DropboxError;
use super::types::{Download, FileMetadata, PathArg, TokenResponse};

/// RPC endpoints (metadata)
pub const DEFAULT_API_URL: &str = "https://api.dropboxapi.com";

/// Content endpoints (download)
pub const DEFAULT_CONTENT_URL: &str = "https://content.dropboxapi.com";

/// OAuth2 token endpoint
pub const DEFAULT_TOKEN_URL: &str = "https://api.dropbox.com/oauth2/token";

/// HTTP client timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Header carrying the JSON request argument for content endpoints
const API_ARG_HEADER: &str = "Dropbox-API-Arg";

/// Header carrying the JSON metadata of downloaded content
const API_RESULT_HEADER: &str = "Dropbox-API-Result";

/// Upstream base URLs, overridable for proxies and tests
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub api_url: String,
    pub content_url: String,
    pub token_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            content_url: DEFAULT_CONTENT_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
        }
    }
}

impl Endpoints {
    /// Point every endpoint at one base URL (used with mock servers)
    #[cfg(test)]
    pub fn single(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            api_url: base.to_string(),
            content_url: base.to_string(),
            token_url: format!("{}/oauth2/token", base),
        }
    }
}

/// Dropbox API client
#[derive(Clone)]
pub struct DropboxClient {
    /// HTTP client for making requests
    http_client: Client,
    endpoints: Endpoints,
}

impl DropboxClient {
    /// Create a client with the given endpoints and request timeout
    pub fn new(endpoints: Endpoints, timeout: Duration) -> Result<Self, DropboxError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DropboxError::Network(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            endpoints,
        })
    }

    /// Exchange a refresh token for a new access token
    ///
    /// # Arguments
    /// * `refresh_token` - Long-lived refresh token
    /// * `client_id` - Registered app key
    /// * `client_secret` - Registered app secret
    pub async fn refresh_access_token(
        &self,
        refresh_token: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<TokenResponse, DropboxError> {
        debug!(url = %self.endpoints.token_url, "Requesting access token refresh");

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ];

        let response = self
            .http_client
            .post(&self.endpoints.token_url)
            .form(&form)
            .send()
            .await?;

        let response = check_status(response).await?;
        let token: TokenResponse = response.json().await?;

        info!(expires_in = token.expires_in, "Access token issued by Dropbox");
        Ok(token)
    }

    /// Get file metadata by path
    pub async fn get_metadata(&self, token: &str, path: &str) -> Result<FileMetadata, DropboxError> {
        let url = format!("{}/2/files/get_metadata", self.endpoints.api_url);

        debug!(path = path, "Fetching metadata from Dropbox");

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(token)
            .json(&PathArg { path })
            .send()
            .await?;

        let response = check_status(response).await?;
        let metadata: FileMetadata = response.json().await?;
        Ok(metadata)
    }

    /// Download file content
    ///
    /// The revision of the returned bytes is read from the `Dropbox-API-Result`
    /// header; a missing or unparseable header leaves `metadata` empty.
    pub async fn download(&self, token: &str, path: &str) -> Result<Download, DropboxError> {
        let url = format!("{}/2/files/download", self.endpoints.content_url);
        let arg = header_safe_json(&PathArg { path })?;

        debug!(path = path, "Downloading file from Dropbox");

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(token)
            .header(API_ARG_HEADER, arg)
            .send()
            .await?;

        let response = check_status(response).await?;

        let metadata = response
            .headers()
            .get(API_RESULT_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| serde_json::from_str::<FileMetadata>(value).ok());

        let content = response.bytes().await?;

        info!(path = path, size = content.len(), "Downloaded file from Dropbox");
        Ok(Download { content, metadata })
    }
}

/// Turn a non-success response into a DropboxError
async fn check_status(response: Response) -> Result<Response, DropboxError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(DropboxError::from_status(status.as_u16(), &body))
}

/// Serialize a header argument, escaping non-ASCII characters as `\uXXXX`.
///
/// HTTP header values must be ASCII, so file names with accents or emoji
/// would otherwise be rejected by the server.
fn header_safe_json<T: serde::Serialize>(value: &T) -> Result<String, DropboxError> {
    let json = serde_json::to_string(value)
        .map_err(|e| DropboxError::Decode(format!("failed to encode request argument: {}", e)))?;

    let mut escaped = String::with_capacity(json.len());
    for ch in json.chars() {
        if ch.is_ascii() {
            escaped.push(ch);
        } else {
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                escaped.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    Ok(escaped)
}
