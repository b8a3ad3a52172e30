//! TTL-bounded response cache.
//!
//! Payloads are addressed by a logical key (usually the URL) and stored under
//! the lowercase hex SHA-256 of that key. Expiry is lazy: `get` purges an
//! entry it finds stale, and `sweep` clears the rest in bulk.
//!
//! Storage problems never fail a read. A corrupt or unreadable entry is
//! logged and reported as a miss.

mod backend;
mod conditional;
mod file;
mod memory;

pub use backend::{CacheEntry, CacheError, CacheResult, CacheStore, EntryInfo};
pub use conditional::{ConditionalFetcher, CONDITIONAL_PREFIX};
pub use file::{FileCacheStore, METADATA_FILENAME};
pub use memory::MemoryCacheStore;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Default time-to-live for cached responses.
pub const DEFAULT_TTL: Duration = Duration::from_secs(72 * 3600);

/// Storage slot for a logical key.
pub fn cache_key(logical_key: &str) -> String {
    hex::encode(Sha256::digest(logical_key.as_bytes()))
}

/// Optional data recorded alongside a payload.
#[derive(Debug, Clone, Default)]
pub struct EntryMetadata {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub extra: serde_json::Value,
}

/// Cache statistics.
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_size_bytes: u64,
    pub location: String,
}

/// Response cache over a pluggable store. Clones share the store.
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    default_ttl: Duration,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn CacheStore>, default_ttl: Duration) -> Self {
        Self { store, default_ttl }
    }

    /// Open a file-backed cache in `dir`.
    pub fn open(dir: impl Into<PathBuf>, default_ttl: Duration) -> CacheResult<Self> {
        Ok(Self::new(Arc::new(FileCacheStore::open(dir)?), default_ttl))
    }

    /// A cache that lives only as long as the process.
    pub fn in_memory(default_ttl: Duration) -> Self {
        Self::new(Arc::new(MemoryCacheStore::new()), default_ttl)
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    async fn load(&self, key: &str, slot: &str) -> Option<CacheEntry> {
        match self.store.load(slot).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Treating unreadable cache entry for {} as a miss: {}", key, e);
                None
            }
        }
    }

    /// Return the payload stored under `key` if it is still fresh.
    ///
    /// Freshness uses `ttl_override`, else the TTL recorded with the entry,
    /// else the cache default.
    pub async fn get(&self, key: &str, ttl_override: Option<Duration>) -> Option<Vec<u8>> {
        self.get_entry(key, ttl_override)
            .await
            .map(|entry| entry.payload)
    }

    /// Like `get`, returning the whole entry.
    pub async fn get_entry(&self, key: &str, ttl_override: Option<Duration>) -> Option<CacheEntry> {
        let slot = cache_key(key);
        let entry = self.load(key, &slot).await?;

        let ttl = ttl_override.or(entry.ttl).unwrap_or(self.default_ttl);
        if entry.is_fresh(ttl, Utc::now()) {
            debug!("Cache hit: {}", key);
            return Some(entry);
        }

        debug!("Cache entry for {} expired, purging", key);
        if let Err(e) = self.store.remove_if_stored_at(&slot, entry.stored_at).await {
            warn!("Failed to purge expired cache entry for {}: {}", key, e);
        }
        None
    }

    /// Return the entry stored under `key` regardless of age. Never purges.
    pub async fn peek(&self, key: &str) -> Option<CacheEntry> {
        self.load(key, &cache_key(key)).await
    }

    /// Store `payload` under `key`, replacing any previous entry.
    pub async fn set(&self, key: &str, payload: &[u8], metadata: EntryMetadata) -> CacheResult<()> {
        self.store_entry(key, payload.to_vec(), metadata, self.default_ttl)
            .await
    }

    /// Store with an explicit TTL recorded on the entry.
    pub async fn set_with_ttl(
        &self,
        key: &str,
        payload: &[u8],
        metadata: EntryMetadata,
        ttl: Duration,
    ) -> CacheResult<()> {
        self.store_entry(key, payload.to_vec(), metadata, ttl).await
    }

    async fn store_entry(
        &self,
        key: &str,
        payload: Vec<u8>,
        metadata: EntryMetadata,
        ttl: Duration,
    ) -> CacheResult<()> {
        let entry = CacheEntry {
            logical_key: key.to_string(),
            stored_at: Utc::now(),
            ttl: Some(ttl),
            payload,
            etag: metadata.etag,
            last_modified: metadata.last_modified,
            metadata: metadata.extra,
        };
        self.store.store(&cache_key(key), &entry).await?;
        debug!("Cached {} ({} bytes)", key, entry.payload.len());
        Ok(())
    }

    /// Re-store an existing entry with a fresh timestamp.
    pub async fn refresh(&self, entry: &CacheEntry) -> CacheResult<()> {
        let mut refreshed = entry.clone();
        refreshed.stored_at = Utc::now();
        self.store
            .store(&cache_key(&entry.logical_key), &refreshed)
            .await
    }

    /// Fresh payload decoded as JSON. Undecodable payloads are misses.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        key: &str,
        ttl_override: Option<Duration>,
    ) -> Option<T> {
        let payload = self.get(key, ttl_override).await?;
        match serde_json::from_slice(&payload) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Cached value for {} is not valid JSON: {}", key, e);
                None
            }
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> CacheResult<()> {
        let payload = serde_json::to_vec(value)?;
        self.set(key, &payload, EntryMetadata::default()).await
    }

    pub(crate) async fn set_json_with_ttl<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> CacheResult<()> {
        let payload = serde_json::to_vec(value)?;
        self.set_with_ttl(key, &payload, EntryMetadata::default(), ttl)
            .await
    }

    /// Remove the entry for `key`. Returns whether one existed.
    pub async fn invalidate(&self, key: &str) -> bool {
        match self.store.remove(&cache_key(key)).await {
            Ok(existed) => existed,
            Err(e) => {
                warn!("Failed to invalidate cache entry for {}: {}", key, e);
                false
            }
        }
    }

    /// Remove every entry older than the default TTL. Returns the count removed.
    pub async fn sweep(&self) -> CacheResult<usize> {
        let now = Utc::now();
        let mut removed = 0;
        for info in self.store.list().await? {
            let age = (now - info.stored_at).to_std().unwrap_or(Duration::ZERO);
            if age > self.default_ttl
                && self
                    .store
                    .remove_if_stored_at(&info.cache_key, info.stored_at)
                    .await?
            {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("Swept {} expired cache entries", removed);
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> CacheResult<CacheStats> {
        let entries = self.store.list().await?;
        Ok(CacheStats {
            total_entries: entries.len(),
            total_size_bytes: entries.iter().map(|e| e.size_bytes).sum(),
            location: self.store.location(),
        })
    }
}
