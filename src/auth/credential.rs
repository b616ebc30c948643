//! Access credential state
//!
//! The token pair plus expiry the manager keeps for the life of the process.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current OAuth2 credential
#[derive(Clone, Default)]
pub struct AccessCredential {
    pub(crate) access_token: Option<String>,
    pub(crate) refresh_token: Option<String>,
    /// `None` means unknown: treat the access token as expired
    pub(crate) expires_at: Option<SystemTime>,
}

impl AccessCredential {
    /// Credential seeded from configuration; the expiry of a configured
    /// access token is unknown, so it will be refreshed on first use.
    pub fn from_config(access_token: Option<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at: None,
        }
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.is_some()
    }

    /// Whether the access token is missing, of unknown expiry, or expires
    /// within `buffer` of `now`.
    pub fn needs_refresh(&self, now: SystemTime, buffer: Duration) -> bool {
        match (&self.access_token, self.expires_at) {
            (Some(_), Some(expires_at)) => match now.checked_add(buffer) {
                Some(deadline) => deadline >= expires_at,
                None => true,
            },
            _ => true,
        }
    }

    /// Seconds until expiry, `None` when unknown or already passed
    pub fn expires_in(&self, now: SystemTime) -> Option<u64> {
        self.expires_at
            .and_then(|expires_at| expires_at.duration_since(now).ok())
            .map(|remaining| remaining.as_secs())
    }
}

impl std::fmt::Debug for AccessCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessCredential")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Credential published whenever a new refresh token enters the process,
/// for provisioning tooling to persist. Never written to the log.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IssuedCredential {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds
    pub expires_at: u64,
}

impl IssuedCredential {
    pub(crate) fn new(access_token: &str, refresh_token: &str, expires_at: SystemTime) -> Self {
        Self {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            expires_at: expires_at
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }

    /// Rebuild the in-memory credential this was issued from.
    /// An unrepresentable expiry is treated as unknown.
    pub fn to_credential(&self) -> AccessCredential {
        AccessCredential {
            access_token: Some(self.access_token.clone()),
            refresh_token: Some(self.refresh_token.clone()),
            expires_at: UNIX_EPOCH.checked_add(Duration::from_secs(self.expires_at)),
        }
    }
}

impl std::fmt::Debug for IssuedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCredential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
