//! Credential lifecycle management
//!
//! Keeps an access token valid across calls. A token inside the refresh buffer
//! is exchanged for a new one exactly once per expiry cycle, however many
//! requests observe the expiry at the same time.

use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use super::credential::{AccessCredential, IssuedCredential};
use crate::dropbox::{DropboxClient, DropboxError};
use crate::errors::GatewayError;
use crate::singleflight::SingleFlight;

/// Default safety buffer before expiry: 5 minutes
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::from_secs(300);

/// Longest lifetime accepted when seeding a credential: one year
pub const MAX_SEEDED_LIFETIME: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Pending issued-credential events kept for slow subscribers
const ISSUED_CHANNEL_CAPACITY: usize = 16;

/// Registered app identity and refresh policy
#[derive(Clone)]
pub struct CredentialSettings {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_buffer: Duration,
}

impl std::fmt::Debug for CredentialSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("refresh_buffer", &self.refresh_buffer)
            .finish()
    }
}

/// Non-secret view of the current credential
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    pub has_access_token: bool,
    pub has_refresh_token: bool,
    pub expires_in_secs: Option<u64>,
}

/// Owns the access credential and refreshes it on demand
#[derive(Clone)]
pub struct CredentialManager {
    inner: Arc<Inner>,
}

struct Inner {
    client: DropboxClient,
    settings: CredentialSettings,
    /// Written only by a successful refresh or by seeding
    state: RwLock<AccessCredential>,
    refresh_flight: SingleFlight<(), String>,
    issued_tx: broadcast::Sender<IssuedCredential>,
}

fn missing_refresh_token() -> GatewayError {
    GatewayError::Authentication {
        reason: "no refresh token available, initial authorization required".to_string(),
        status: None,
    }
}

impl CredentialManager {
    pub fn new(
        client: DropboxClient,
        settings: CredentialSettings,
        initial: AccessCredential,
    ) -> Self {
        let (issued_tx, _) = broadcast::channel(ISSUED_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                client,
                settings,
                state: RwLock::new(initial),
                refresh_flight: SingleFlight::new(),
                issued_tx,
            }),
        }
    }

    /// Return a currently valid access token, refreshing it first if needed
    ///
    /// # Errors
    /// `GatewayError::Authentication` when no refresh token is configured or
    /// the token endpoint rejects the exchange.
    pub async fn get_valid_token(&self) -> Result<String, GatewayError> {
        {
            let state = self.inner.read_state();
            if !state.has_refresh_token() {
                error!("No refresh token available");
                return Err(missing_refresh_token());
            }
            if !state.needs_refresh(SystemTime::now(), self.inner.settings.refresh_buffer) {
                if let Some(token) = &state.access_token {
                    return Ok(token.clone());
                }
            }
        }

        debug!("Access token needs refresh");
        self.refresh().await
    }

    /// Exchange the refresh token for a new access token, joining any
    /// exchange already in flight
    async fn refresh(&self) -> Result<String, GatewayError> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .refresh_flight
            .run((), move || inner.exchange())
            .await
    }

    /// Seed the credential after the initial authorization handshake.
    /// Lifetimes longer than `MAX_SEEDED_LIFETIME` are clamped to it.
    pub fn set_credential(&self, access_token: &str, refresh_token: &str, expires_in_secs: u64) {
        let lifetime = Duration::from_secs(expires_in_secs).min(MAX_SEEDED_LIFETIME);
        let expires_at = SystemTime::now() + lifetime;

        {
            let mut state = self.inner.write_state();
            state.access_token = Some(access_token.to_string());
            state.refresh_token = Some(refresh_token.to_string());
            state.expires_at = Some(expires_at);
        }

        info!(expires_in = lifetime.as_secs(), "Credential seeded");
        self.inner
            .publish(IssuedCredential::new(access_token, refresh_token, expires_at));
    }

    /// Receive every credential issued from now on
    pub fn subscribe_issued(&self) -> broadcast::Receiver<IssuedCredential> {
        self.inner.issued_tx.subscribe()
    }

    pub fn status(&self) -> CredentialStatus {
        let state = self.inner.read_state();
        CredentialStatus {
            has_access_token: state.access_token.is_some(),
            has_refresh_token: state.has_refresh_token(),
            expires_in_secs: state.expires_in(SystemTime::now()),
        }
    }
}

impl Inner {
    fn read_state(&self) -> RwLockReadGuard<'_, AccessCredential> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, AccessCredential> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, issued: IssuedCredential) {
        if self.issued_tx.send(issued).is_err() {
            debug!("No subscribers for issued credential");
        }
    }

    async fn exchange(self: Arc<Self>) -> Result<String, GatewayError> {
        // A caller may have seen the old expiry just as a previous flight finished
        let refresh_token = {
            let state = self.read_state();
            if !state.needs_refresh(SystemTime::now(), self.settings.refresh_buffer) {
                if let Some(token) = &state.access_token {
                    debug!("Access token already refreshed");
                    return Ok(token.clone());
                }
            }
            state.refresh_token.clone().ok_or_else(missing_refresh_token)?
        };

        info!("Refreshing access token...");

        let response = self
            .client
            .refresh_access_token(
                &refresh_token,
                &self.settings.client_id,
                &self.settings.client_secret,
            )
            .await
            .map_err(|e| {
                error!(error = %e, status = ?e.status(), "Failed to refresh access token");
                GatewayError::authentication(&e)
            })?;

        let expires_at = SystemTime::now()
            .checked_add(Duration::from_secs(response.expires_in))
            .ok_or_else(|| {
                let e = DropboxError::Decode(format!(
                    "expires_in out of range: {}",
                    response.expires_in
                ));
                error!(error = %e, "Failed to refresh access token");
                GatewayError::authentication(&e)
            })?;
        let rotated = response
            .refresh_token
            .filter(|token| *token != refresh_token);

        {
            let mut state = self.write_state();
            // Seeded while the exchange was in flight: the seeded pair wins
            if state.refresh_token.as_deref() != Some(refresh_token.as_str()) {
                debug!("Credential replaced during refresh, discarding exchanged token");
                return Ok(state.access_token.clone().unwrap_or(response.access_token));
            }
            state.access_token = Some(response.access_token.clone());
            state.expires_at = Some(expires_at);
            if let Some(rotated) = &rotated {
                state.refresh_token = Some(rotated.clone());
            }
        }

        if let Some(rotated) = rotated {
            info!("Refresh token rotated by Dropbox");
            self.publish(IssuedCredential::new(
                &response.access_token,
                &rotated,
                expires_at,
            ));
        }

        info!(expires_in = response.expires_in, "Access token refreshed successfully");
        Ok(response.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dropbox::Endpoints;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings() -> CredentialSettings {
        CredentialSettings {
            client_id: "app-key".to_string(),
            client_secret: "app-secret".to_string(),
            refresh_buffer: DEFAULT_REFRESH_BUFFER,
        }
    }

    fn manager_for(server: &MockServer, initial: AccessCredential) -> CredentialManager {
        let client =
            DropboxClient::new(Endpoints::single(&server.uri()), Duration::from_secs(5)).unwrap();
        CredentialManager::new(client, settings(), initial)
    }

    fn credential_expiring_in(secs: u64) -> AccessCredential {
        AccessCredential {
            access_token: Some("sl.current".to_string()),
            refresh_token: Some("rt-1".to_string()),
            expires_at: Some(SystemTime::now() + Duration::from_secs(secs)),
        }
    }

    fn token_response(access_token: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": access_token,
            "token_type": "bearer",
            "expires_in": 14400
        }))
    }

    #[tokio::test]
    async fn test_unexpired_token_is_reused() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(token_response("sl.unused"))
            .expect(0)
            .mount(&server)
            .await;

        let manager = manager_for(&server, credential_expiring_in(3600));
        for _ in 0..3 {
            assert_eq!(manager.get_valid_token().await.unwrap(), "sl.current");
        }
    }

    #[tokio::test]
    async fn test_set_credential_then_get_returns_seeded_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(token_response("sl.unused"))
            .expect(0)
            .mount(&server)
            .await;

        let manager = manager_for(&server, AccessCredential::default());
        manager.set_credential("sl.seeded", "rt-seeded", 14400);

        assert_eq!(manager.get_valid_token().await.unwrap(), "sl.seeded");
        let status = manager.status();
        assert!(status.has_access_token && status.has_refresh_token);
        assert!(status.expires_in_secs.unwrap() > 14000);
    }

    #[tokio::test]
    async fn test_expiring_token_refreshes_once_under_concurrency() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .and(body_string_contains("refresh_token=rt-1"))
            .respond_with(token_response("sl.fresh").set_delay(Duration::from_millis(100)))
            .expect(1)
            .mount(&server)
            .await;

        // Inside the 5 minute buffer
        let manager = manager_for(&server, credential_expiring_in(120));

        let calls = (0..10).map(|_| {
            let manager = manager.clone();
            async move { manager.get_valid_token().await }
        });
        let tokens = futures::future::join_all(calls).await;

        for token in tokens {
            assert_eq!(token.unwrap(), "sl.fresh");
        }
        // Later calls reuse the refreshed token
        assert_eq!(manager.get_valid_token().await.unwrap(), "sl.fresh");
    }

    #[tokio::test]
    async fn test_unknown_expiry_triggers_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(token_response("sl.fresh"))
            .expect(1)
            .mount(&server)
            .await;

        let manager = manager_for(
            &server,
            AccessCredential::from_config(Some("sl.configured".into()), Some("rt-1".into())),
        );
        assert_eq!(manager.get_valid_token().await.unwrap(), "sl.fresh");
    }

    #[tokio::test]
    async fn test_missing_refresh_token_fails_without_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(token_response("sl.unused"))
            .expect(0)
            .mount(&server)
            .await;

        let manager = manager_for(
            &server,
            AccessCredential::from_config(Some("sl.configured".into()), None),
        );
        let err = manager.get_valid_token().await.unwrap_err();
        assert!(matches!(err, GatewayError::Authentication { status: None, .. }));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_state_and_retries_next_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "refresh token is invalid or revoked"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let manager = manager_for(&server, credential_expiring_in(60));

        let err = manager.get_valid_token().await.unwrap_err();
        assert_eq!(err.upstream_status(), Some(400));
        assert!(err.to_string().contains("invalid_grant"));

        // Prior state is untouched and the manager is not disabled
        let status = manager.status();
        assert!(status.has_access_token && status.has_refresh_token);
        assert!(manager.get_valid_token().await.is_err());
    }

    #[tokio::test]
    async fn test_rotated_refresh_token_is_published() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "sl.fresh",
                "expires_in": 14400,
                "refresh_token": "rt-2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let manager = manager_for(&server, credential_expiring_in(0));
        let mut issued = manager.subscribe_issued();

        assert_eq!(manager.get_valid_token().await.unwrap(), "sl.fresh");
        let event = issued.try_recv().unwrap();
        assert_eq!(event.refresh_token, "rt-2");
        assert_eq!(event.access_token, "sl.fresh");
    }

    #[tokio::test]
    async fn test_out_of_range_expiry_is_an_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "sl.fresh",
                "expires_in": u64::MAX
            })))
            .expect(1)
            .mount(&server)
            .await;

        let manager = manager_for(&server, credential_expiring_in(60));

        let err = manager.get_valid_token().await.unwrap_err();
        assert!(matches!(err, GatewayError::Authentication { status: None, .. }));
        assert!(err.to_string().contains("expires_in out of range"));

        // The rejected response did not replace the current token
        let status = manager.status();
        assert!(status.has_access_token);
        assert!(status.expires_in_secs.unwrap() <= 60);
    }

    #[tokio::test]
    async fn test_set_credential_clamps_huge_lifetime() {
        let server = MockServer::start().await;
        let manager = manager_for(&server, AccessCredential::default());

        manager.set_credential("sl.seeded", "rt-seeded", u64::MAX);

        assert_eq!(manager.get_valid_token().await.unwrap(), "sl.seeded");
        let expires_in = manager.status().expires_in_secs.unwrap();
        assert!(expires_in <= MAX_SEEDED_LIFETIME.as_secs());
        assert!(expires_in > MAX_SEEDED_LIFETIME.as_secs() - 60);
    }

    #[tokio::test]
    async fn test_seed_during_refresh_is_not_overwritten() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .and(body_string_contains("refresh_token=rt-1"))
            .respond_with(token_response("sl.stale").set_delay(Duration::from_millis(300)))
            .expect(1)
            .mount(&server)
            .await;

        let manager = manager_for(&server, credential_expiring_in(60));
        let mut issued = manager.subscribe_issued();

        let refreshing = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.get_valid_token().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        manager.set_credential("sl.seeded", "rt-seeded", 14400);

        assert_eq!(refreshing.await.unwrap().unwrap(), "sl.seeded");
        assert_eq!(manager.get_valid_token().await.unwrap(), "sl.seeded");

        // Only the seed was published
        assert_eq!(issued.try_recv().unwrap().refresh_token, "rt-seeded");
        assert!(issued.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_set_credential_publishes_issued_event() {
        let server = MockServer::start().await;
        let manager = manager_for(&server, AccessCredential::default());
        let mut issued = manager.subscribe_issued();

        manager.set_credential("sl.seeded", "rt-seeded", 3600);

        let event = issued.try_recv().unwrap();
        assert_eq!(event.refresh_token, "rt-seeded");
        assert_eq!(event.to_credential().access_token.as_deref(), Some("sl.seeded"));
    }
}
