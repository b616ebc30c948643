//! Remote file cache
//!
//! Maps a `FileReference` to file content while avoiding repeated downloads.
//!
//! Freshness policy: a cached entry is served only if it is inside its TTL
//! ceiling *and* the upstream revision still matches the one stored with it.
//! Entries past the TTL are never served, even without a metadata check.

use bytes::Bytes;
use moka::sync::Cache;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::reference::FileReference;
use crate::auth::CredentialManager;
use crate::dropbox::DropboxClient;
use crate::errors::GatewayError;
use crate::singleflight::SingleFlight;

/// Default TTL ceiling: 8 minutes
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(480);

/// Default maximum total payload size: 256 MB
pub const DEFAULT_MAX_CACHE_BYTES: u64 = 256 * 1024 * 1024;

/// Cached content for one canonical path
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Bytes,
    /// Upstream revision of `payload`, if the server reported one
    pub revision: Option<String>,
    pub stored_at: Instant,
    pub expires_at: Instant,
}

impl CacheEntry {
    fn new(key: String, payload: Bytes, revision: Option<String>, ttl: Duration) -> Self {
        let stored_at = Instant::now();
        Self {
            key,
            payload,
            revision,
            stored_at,
            expires_at: stored_at + ttl,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    /// Requests served from cache after a matching revision check
    pub hits: u64,
    /// Requests that went on to download
    pub misses: u64,
    /// Metadata checks made against cached entries
    pub revalidations: u64,
    pub entries: u64,
}

/// Revision-checked cache in front of the Dropbox download endpoint
#[derive(Clone)]
pub struct RemoteFileCache {
    inner: Arc<Inner>,
}

struct Inner {
    client: DropboxClient,
    credentials: CredentialManager,
    entries: Cache<String, CacheEntry>,
    ttl: Duration,
    /// One revalidate-or-download per canonical path at a time
    flights: SingleFlight<String, Bytes>,
    hits: AtomicU64,
    misses: AtomicU64,
    revalidations: AtomicU64,
    /// Bumped by `invalidate` and `clear`; a flight that sees it move does not store
    invalidations: AtomicU64,
}

impl RemoteFileCache {
    /// Create a cache with a TTL ceiling and a payload size limit
    ///
    /// # Arguments
    /// * `ttl` - Maximum time an entry may be served without re-download
    /// * `max_bytes` - Total payload size before least-recently-used entries are evicted
    pub fn new(
        client: DropboxClient,
        credentials: CredentialManager,
        ttl: Duration,
        max_bytes: u64,
    ) -> Self {
        let entries = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(max_bytes)
            .weigher(|_key: &String, entry: &CacheEntry| {
                u32::try_from(entry.key.len() + entry.payload.len()).unwrap_or(u32::MAX)
            })
            .name("remote_file_cache")
            .build();

        info!(
            ttl_secs = ttl.as_secs(),
            max_size_mb = max_bytes / (1024 * 1024),
            "Remote file cache initialized"
        );

        Self {
            inner: Arc::new(Inner {
                client,
                credentials,
                entries,
                ttl,
                flights: SingleFlight::new(),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                revalidations: AtomicU64::new(0),
                invalidations: AtomicU64::new(0),
            }),
        }
    }

    /// Return the content of `reference`, from cache when still current
    ///
    /// # Errors
    /// - `InvalidReference` before any network call for root/empty references
    /// - `Authentication` when no usable access token can be obtained
    /// - `Fetch` for upstream download failures (never cached)
    pub async fn fetch(&self, reference: &FileReference) -> Result<Bytes, GatewayError> {
        let key = reference.canonical_path()?;
        let token = self.inner.credentials.get_valid_token().await?;

        let inner = Arc::clone(&self.inner);
        let flight_key = key.clone();
        self.inner
            .flights
            .run(flight_key, move || inner.resolve(key, token))
            .await
    }

    /// Drop the cached entry for `reference`
    pub fn invalidate(&self, reference: &FileReference) -> Result<(), GatewayError> {
        let key = reference.canonical_path()?;
        self.inner.entries.invalidate(&key);
        self.inner.invalidations.fetch_add(1, Ordering::AcqRel);
        debug!(path = %key, "Invalidated cached file");
        Ok(())
    }

    /// Drop every cached entry and reset counters
    pub fn clear(&self) {
        self.inner.entries.invalidate_all();
        self.inner.invalidations.fetch_add(1, Ordering::AcqRel);
        self.inner.hits.store(0, Ordering::Relaxed);
        self.inner.misses.store(0, Ordering::Relaxed);
        self.inner.revalidations.store(0, Ordering::Relaxed);
        debug!("Cleared remote file cache");
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.entries.run_pending_tasks();
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            revalidations: self.inner.revalidations.load(Ordering::Relaxed),
            entries: self.inner.entries.entry_count(),
        }
    }

    #[cfg(test)]
    fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.inner.entries.get(key)
    }
}

impl Inner {
    /// Serve `key` from cache if its revision is current, otherwise download it
    async fn resolve(self: Arc<Self>, key: String, token: String) -> Result<Bytes, GatewayError> {
        let epoch = self.invalidations.load(Ordering::Acquire);
        let mut observed_revision = None;

        if let Some(entry) = self.live_entry(&key) {
            self.revalidations.fetch_add(1, Ordering::Relaxed);

            match self.client.get_metadata(&token, &key).await {
                Ok(metadata) => {
                    let current = metadata.revision_tag().map(String::from);
                    if current.is_some() && current == entry.revision {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            path = %key,
                            revision = ?current,
                            age_ms = entry.stored_at.elapsed().as_millis() as u64,
                            "Cache HIT, revision unchanged"
                        );
                        return Ok(entry.payload);
                    }
                    debug!(
                        path = %key,
                        cached = ?entry.revision,
                        current = ?current,
                        "Revision changed"
                    );
                    observed_revision = current;
                }
                Err(e) => {
                    warn!(
                        path = %key,
                        error = %e,
                        retryable = e.is_retryable(),
                        "Metadata check failed, treating as cache miss"
                    );
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(path = %key, "Cache MISS, downloading");

        let download = self.client.download(&token, &key).await.map_err(|e| {
            warn!(
                path = %key,
                error = %e,
                status = ?e.status(),
                retryable = e.is_retryable(),
                "Download failed"
            );
            GatewayError::fetch(&key, &e)
        })?;

        let revision = download
            .metadata
            .as_ref()
            .and_then(|m| m.revision_tag())
            .map(String::from)
            .or(observed_revision);

        if self.invalidations.load(Ordering::Acquire) != epoch {
            debug!(path = %key, "Cache invalidated during download, not storing");
            return Ok(download.content);
        }

        debug!(path = %key, revision = ?revision, size = download.content.len(), "Stored file in cache");
        let entry = CacheEntry::new(key.clone(), download.content.clone(), revision, self.ttl);
        self.entries.insert(key, entry);

        Ok(download.content)
    }

    /// Cached entry for `key` that is still inside its TTL ceiling
    fn live_entry(&self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.get(key)?;
        if entry.is_expired(Instant::now()) {
            self.entries.invalidate(key);
            debug!(path = %key, "Cached entry past TTL ceiling");
            return None;
        }
        Some(entry)
    }
}
