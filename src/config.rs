//! Gateway configuration
//!
//! Loaded once at startup from environment variables and validated before any
//! component is built.

use anyhow::{anyhow, bail, Context, Result};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::auth::{AccessCredential, CredentialSettings, CredentialStore, DEFAULT_REFRESH_BUFFER};
use crate::cache::{DEFAULT_CACHE_TTL, DEFAULT_MAX_CACHE_BYTES};
use crate::dropbox::client::DEFAULT_REQUEST_TIMEOUT;
use crate::dropbox::Endpoints;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_BIND_ADDR: &str = "0.0.0.0";

/// Upper bound for every duration setting: 30 days
const MAX_DURATION_SECS: u64 = 30 * 24 * 60 * 60;

/// Variables that must be present
const REQUIRED: &[&str] = &["DROPBOX_APP_KEY", "DROPBOX_APP_SECRET"];

/// Validated gateway configuration
#[derive(Clone)]
pub struct GatewayConfig {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: Option<String>,
    pub access_token: Option<String>,
    pub cache_ttl: Duration,
    pub max_cache_bytes: u64,
    pub refresh_buffer: Duration,
    pub listen_addr: SocketAddr,
    pub endpoints: Endpoints,
    pub credential_file: PathBuf,
    pub upstream_timeout: Duration,
}

impl GatewayConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    /// Empty or whitespace-only values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let missing: Vec<&str> = REQUIRED
            .iter()
            .copied()
            .filter(|key| get(key).is_none())
            .collect();
        if !missing.is_empty() {
            bail!("Missing required environment variables: {}", missing.join(", "));
        }

        let client_id = get("DROPBOX_APP_KEY").ok_or_else(|| anyhow!("DROPBOX_APP_KEY not set"))?;
        let client_secret =
            get("DROPBOX_APP_SECRET").ok_or_else(|| anyhow!("DROPBOX_APP_SECRET not set"))?;

        let cache_ttl = parse_or(&get, "CACHE_TTL_SECS", DEFAULT_CACHE_TTL.as_secs())?;
        if cache_ttl == 0 {
            bail!("CACHE_TTL_SECS must be greater than zero");
        }
        let refresh_buffer =
            parse_or(&get, "TOKEN_REFRESH_BUFFER_SECS", DEFAULT_REFRESH_BUFFER.as_secs())?;
        let upstream_timeout =
            parse_or(&get, "UPSTREAM_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT.as_secs())?;
        for (key, value) in [
            ("CACHE_TTL_SECS", cache_ttl),
            ("TOKEN_REFRESH_BUFFER_SECS", refresh_buffer),
            ("UPSTREAM_TIMEOUT_SECS", upstream_timeout),
        ] {
            if value > MAX_DURATION_SECS {
                bail!("{} must be at most {} seconds, got {}", key, MAX_DURATION_SECS, value);
            }
        }
        let max_cache_bytes = parse_or(&get, "CACHE_MAX_BYTES", DEFAULT_MAX_CACHE_BYTES)?;

        let port: u16 = parse_or(&get, "PORT", DEFAULT_PORT)?;
        let bind_ip: IpAddr = parse_or(
            &get,
            "BIND_ADDR",
            IpAddr::from_str(DEFAULT_BIND_ADDR).context("Invalid default bind address")?,
        )?;

        let defaults = Endpoints::default();
        let endpoints = Endpoints {
            api_url: get("DROPBOX_API_URL").unwrap_or(defaults.api_url),
            content_url: get("DROPBOX_CONTENT_URL").unwrap_or(defaults.content_url),
            token_url: get("DROPBOX_TOKEN_URL").unwrap_or(defaults.token_url),
        };

        Ok(Self {
            client_id,
            client_secret,
            refresh_token: get("DROPBOX_REFRESH_TOKEN"),
            access_token: get("DROPBOX_ACCESS_TOKEN"),
            cache_ttl: Duration::from_secs(cache_ttl),
            max_cache_bytes,
            refresh_buffer: Duration::from_secs(refresh_buffer),
            listen_addr: SocketAddr::new(bind_ip, port),
            endpoints,
            credential_file: get("DROPBOX_CREDENTIAL_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(CredentialStore::default_path),
            upstream_timeout: Duration::from_secs(upstream_timeout),
        })
    }

    pub fn credential_settings(&self) -> CredentialSettings {
        CredentialSettings {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            refresh_buffer: self.refresh_buffer,
        }
    }

    /// Credential seeded from the environment alone
    pub fn initial_credential(&self) -> AccessCredential {
        AccessCredential::from_config(self.access_token.clone(), self.refresh_token.clone())
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("cache_ttl", &self.cache_ttl)
            .field("max_cache_bytes", &self.max_cache_bytes)
            .field("refresh_buffer", &self.refresh_buffer)
            .field("listen_addr", &self.listen_addr)
            .field("endpoints", &self.endpoints)
            .field("credential_file", &self.credential_file)
            .field("upstream_timeout", &self.upstream_timeout)
            .finish()
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow!("Invalid value for {}: {:?} ({})", key, raw, e)),
        None => Ok(default),
    }
}
