//! Storage abstraction for the response cache.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors from cache storage.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache serialization error: {0}")]
    Serialization(String),

    #[error("cache entry is corrupt: {0}")]
    Corrupt(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

pub type CacheResult<T> = Result<T, CacheError>;

/// A stored payload with its bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// The caller-supplied key (URL or composite string).
    pub logical_key: String,
    pub stored_at: DateTime<Utc>,
    /// TTL recorded at write time; `None` means "use the cache default".
    pub ttl: Option<Duration>,
    pub payload: Vec<u8>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    /// Free-form metadata supplied by the caller.
    pub metadata: serde_json::Value,
}

impl CacheEntry {
    /// Age of the entry at `now`. Entries stamped in the future have age zero.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.stored_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Whether the entry is still within `ttl` at `now`.
    pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        self.age(now) <= ttl
    }
}

/// Summary of a stored entry, without its payload.
#[derive(Debug, Clone)]
pub struct EntryInfo {
    pub cache_key: String,
    pub logical_key: String,
    pub stored_at: DateTime<Utc>,
    pub size_bytes: u64,
}

/// Storage backend for cache entries, addressed by derived cache key.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Load an entry. `Ok(None)` when nothing is stored under the key.
    async fn load(&self, cache_key: &str) -> CacheResult<Option<CacheEntry>>;

    /// Store an entry, replacing any previous one.
    async fn store(&self, cache_key: &str, entry: &CacheEntry) -> CacheResult<()>;

    /// Remove an entry. Returns whether one existed.
    async fn remove(&self, cache_key: &str) -> CacheResult<bool>;

    /// Remove the entry only if it is still the one stored at `stored_at`.
    ///
    /// The check and the delete happen under the store's lock, so an entry
    /// written concurrently is never removed. Returns whether one was removed.
    async fn remove_if_stored_at(
        &self,
        cache_key: &str,
        stored_at: DateTime<Utc>,
    ) -> CacheResult<bool>;

    /// List all stored entries.
    async fn list(&self) -> CacheResult<Vec<EntryInfo>>;

    /// Human-readable location for diagnostics.
    fn location(&self) -> String;
}
