//! Filesystem cache store.
//!
//! Layout under the cache directory:
//!
//! ```text
//! <dir>/cache_metadata.json   index: cache key -> record
//! <dir>/<cache key>.body      raw payload bytes
//! ```
//!
//! The index is read once at open and rewritten atomically after each
//! mutation. A missing or unreadable index starts the cache empty.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::backend::{CacheEntry, CacheError, CacheResult, CacheStore, EntryInfo};
use crate::utils::write_atomic_async;

/// Name of the index file inside the cache directory.
pub const METADATA_FILENAME: &str = "cache_metadata.json";

const PAYLOAD_EXTENSION: &str = "body";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexRecord {
    key: String,
    cached_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ttl_ms: Option<u64>,
    /// Whole-second TTL written by older indexes.
    #[serde(default, skip_serializing)]
    ttl_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_modified: Option<String>,
    #[serde(default)]
    metadata: serde_json::Value,
    #[serde(default)]
    size_bytes: u64,
}

/// Cache storage backed by a directory of payload files plus a JSON index.
pub struct FileCacheStore {
    dir: PathBuf,
    index: Mutex<HashMap<String, IndexRecord>>,
}

impl FileCacheStore {
    /// Open (creating if needed) a cache directory.
    pub fn open(dir: impl Into<PathBuf>) -> CacheResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let index = load_index(&dir.join(METADATA_FILENAME));
        debug!("Opened cache at {} ({} entries)", dir.display(), index.len());
        Ok(Self {
            dir,
            index: Mutex::new(index),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn payload_path(&self, cache_key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", cache_key, PAYLOAD_EXTENSION))
    }

    async fn save_index(&self, index: &HashMap<String, IndexRecord>) -> CacheResult<()> {
        let json = serde_json::to_vec_pretty(index)?;
        write_atomic_async(self.dir.join(METADATA_FILENAME), json).await?;
        Ok(())
    }

    /// Drop `cache_key` from the locked index and delete its payload.
    async fn remove_locked(
        &self,
        index: &mut HashMap<String, IndexRecord>,
        cache_key: &str,
    ) -> CacheResult<bool> {
        let existed = index.remove(cache_key).is_some();
        if existed {
            self.save_index(index).await?;
        }

        match tokio::fs::remove_file(self.payload_path(cache_key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(existed),
            Err(e) => Err(CacheError::Io(e)),
        }
    }
}

impl IndexRecord {
    fn ttl(&self) -> Option<Duration> {
        self.ttl_ms
            .map(Duration::from_millis)
            .or(self.ttl_secs.map(Duration::from_secs))
    }
}

fn load_index(path: &Path) -> HashMap<String, IndexRecord> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return HashMap::new(),
        Err(e) => {
            warn!("Could not read cache index {}: {}", path.display(), e);
            return HashMap::new();
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(index) => index,
        Err(e) => {
            warn!(
                "Cache index {} is corrupt, starting empty: {}",
                path.display(),
                e
            );
            HashMap::new()
        }
    }
}

#[async_trait]
impl CacheStore for FileCacheStore {
    async fn load(&self, cache_key: &str) -> CacheResult<Option<CacheEntry>> {
        let record = match self.index.lock().await.get(cache_key) {
            Some(record) => record.clone(),
            None => return Ok(None),
        };

        let payload = match tokio::fs::read(self.payload_path(cache_key)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Payload for {} is missing, treating as miss", record.key);
                return Ok(None);
            }
            Err(e) => return Err(CacheError::Io(e)),
        };

        let ttl = record.ttl();
        Ok(Some(CacheEntry {
            logical_key: record.key,
            stored_at: record.cached_at,
            ttl,
            payload,
            etag: record.etag,
            last_modified: record.last_modified,
            metadata: record.metadata,
        }))
    }

    async fn store(&self, cache_key: &str, entry: &CacheEntry) -> CacheResult<()> {
        // Held across both writes so index rewrites never interleave.
        let mut index = self.index.lock().await;

        write_atomic_async(self.payload_path(cache_key), entry.payload.clone()).await?;

        index.insert(
            cache_key.to_string(),
            IndexRecord {
                key: entry.logical_key.clone(),
                cached_at: entry.stored_at,
                ttl_ms: entry.ttl.map(|ttl| ttl.as_millis() as u64),
                ttl_secs: None,
                etag: entry.etag.clone(),
                last_modified: entry.last_modified.clone(),
                metadata: entry.metadata.clone(),
                size_bytes: entry.payload.len() as u64,
            },
        );
        self.save_index(&index).await
    }

    async fn remove(&self, cache_key: &str) -> CacheResult<bool> {
        let mut index = self.index.lock().await;
        self.remove_locked(&mut index, cache_key).await
    }

    async fn remove_if_stored_at(
        &self,
        cache_key: &str,
        stored_at: DateTime<Utc>,
    ) -> CacheResult<bool> {
        let mut index = self.index.lock().await;
        if index.get(cache_key).map(|record| record.cached_at) != Some(stored_at) {
            return Ok(false);
        }
        self.remove_locked(&mut index, cache_key).await
    }

    async fn list(&self) -> CacheResult<Vec<EntryInfo>> {
        let index = self.index.lock().await;
        Ok(index
            .iter()
            .map(|(cache_key, record)| EntryInfo {
                cache_key: cache_key.clone(),
                logical_key: record.key.clone(),
                stored_at: record.cached_at,
                size_bytes: record.size_bytes,
            })
            .collect())
    }

    fn location(&self) -> String {
        self.dir.display().to_string()
    }
}
