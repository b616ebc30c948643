//! HTTP routes
//!
//! Thin adapters from requests to the file cache; all decisions live in the core.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{debug, warn};

use crate::auth::{CredentialManager, CredentialStatus};
use crate::cache::{CacheStats, FileReference, RemoteFileCache};
use crate::errors::GatewayError;

/// Shared state for the gateway routes
pub struct AppState {
    pub cache: RemoteFileCache,
    pub credentials: CredentialManager,
}

/// Query parameters naming a file by path or sharing link
#[derive(Deserialize)]
pub struct PathQuery {
    pub path: String,
}

/// Health response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub credential: CredentialStatus,
    pub cache: CacheStats,
}

/// Error response
#[derive(Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_status: Option<u16>,
}

/// Create the gateway router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/files", get(get_file_by_path).delete(invalidate_file))
        .route("/files/:folder/:file", get(get_folder_file))
        .route("/cache", delete(clear_cache))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET / - Liveness plus credential and cache status
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "Server is running!".to_string(),
        credential: state.credentials.status(),
        cache: state.cache.stats(),
    })
}

/// GET /files/:folder/:file - Fetch a file by folder and name
async fn get_folder_file(
    State(state): State<Arc<AppState>>,
    Path((folder, file)): Path<(String, String)>,
) -> Result<Response, GatewayError> {
    serve_file(&state, FileReference::folder(folder, file)).await
}

/// GET /files?path=... - Fetch a file by raw path or sharing link
async fn get_file_by_path(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PathQuery>,
) -> Result<Response, GatewayError> {
    serve_file(&state, FileReference::path(query.path)).await
}

/// DELETE /files?path=... - Drop a cached file
async fn invalidate_file(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PathQuery>,
) -> Result<StatusCode, GatewayError> {
    state.cache.invalidate(&FileReference::path(query.path))?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /cache - Drop every cached file
async fn clear_cache(State(state): State<Arc<AppState>>) -> StatusCode {
    state.cache.clear();
    StatusCode::NO_CONTENT
}

async fn serve_file(state: &AppState, reference: FileReference) -> Result<Response, GatewayError> {
    let key = reference.canonical_path()?;
    let content = state.cache.fetch(&reference).await?;

    debug!(path = %key, size = content.len(), "Serving file");
    Ok(([(header::CONTENT_TYPE, content_type_for(&key))], content).into_response())
}

/// Guess a content type from the file extension
pub fn content_type_for(path: &str) -> &'static str {
    let extension = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("json") => "application/json",
        Some("txt") | Some("log") => "text/plain; charset=utf-8",
        Some("csv") => "text/csv; charset=utf-8",
        Some("md") => "text/markdown; charset=utf-8",
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("xml") => "application/xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// HTTP status used to render a core error
pub fn status_for(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::InvalidReference { .. } => StatusCode::BAD_REQUEST,
        GatewayError::Authentication { .. } => StatusCode::UNAUTHORIZED,
        GatewayError::Fetch { status, .. } => match status {
            Some(404) | Some(409) => StatusCode::NOT_FOUND,
            Some(429) => StatusCode::TOO_MANY_REQUESTS,
            Some(408) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        },
        GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() {
            warn!(error = %self, status = status.as_u16(), "Request failed");
        } else {
            debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let path = match &self {
            GatewayError::Fetch { path, .. } => Some(path.clone()),
            _ => None,
        };

        let body = ErrorResponse {
            error: self.kind().to_string(),
            message: self.to_string(),
            path,
            upstream_status: self.upstream_status(),
        };

        (status, Json(body)).into_response()
    }
}
