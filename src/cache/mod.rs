//! Remote file caching layer
//!
//! Normalizes file references and serves file content from a revision-checked,
//! TTL-bounded in-memory cache built on Moka.

pub mod reference;
pub mod remote;

pub use reference::FileReference;
pub use remote::{CacheStats, RemoteFileCache, DEFAULT_CACHE_TTL, DEFAULT_MAX_CACHE_BYTES};
