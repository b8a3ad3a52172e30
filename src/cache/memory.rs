//! In-memory cache store, for tests and short-lived runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::backend::{CacheEntry, CacheResult, CacheStore, EntryInfo};

/// Process-local cache storage. Contents are lost on drop.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn load(&self, cache_key: &str) -> CacheResult<Option<CacheEntry>> {
        Ok(self.entries.read().await.get(cache_key).cloned())
    }

    async fn store(&self, cache_key: &str, entry: &CacheEntry) -> CacheResult<()> {
        self.entries
            .write()
            .await
            .insert(cache_key.to_string(), entry.clone());
        Ok(())
    }

    async fn remove(&self, cache_key: &str) -> CacheResult<bool> {
        Ok(self.entries.write().await.remove(cache_key).is_some())
    }

    async fn remove_if_stored_at(
        &self,
        cache_key: &str,
        stored_at: DateTime<Utc>,
    ) -> CacheResult<bool> {
        let mut entries = self.entries.write().await;
        if entries.get(cache_key).map(|entry| entry.stored_at) != Some(stored_at) {
            return Ok(false);
        }
        Ok(entries.remove(cache_key).is_some())
    }

    async fn list(&self) -> CacheResult<Vec<EntryInfo>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .map(|(key, entry)| EntryInfo {
                cache_key: key.clone(),
                logical_key: entry.logical_key.clone(),
                stored_at: entry.stored_at,
                size_bytes: entry.payload.len() as u64,
            })
            .collect())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
