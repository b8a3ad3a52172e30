//! Conditional-request validators (ETag / Last-Modified) per URL.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CacheResult, ResponseCache, DEFAULT_TTL};

/// Logical-key prefix under which validators are stored.
pub const CONDITIONAL_PREFIX: &str = "conditional:";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Validators {
    url: String,
    etag: Option<String>,
    last_modified: Option<String>,
}

/// Remembers the validators a server last sent for each URL.
#[derive(Clone)]
pub struct ConditionalFetcher {
    cache: ResponseCache,
    ttl: Duration,
}

impl ConditionalFetcher {
    pub fn new(cache: ResponseCache) -> Self {
        Self {
            cache,
            ttl: DEFAULT_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn key(url: &str) -> String {
        format!("{}{}", CONDITIONAL_PREFIX, url)
    }

    async fn validators(&self, url: &str) -> Option<Validators> {
        self.cache.get_json(&Self::key(url), Some(self.ttl)).await
    }

    /// Whether the resource looks changed given freshly observed validators.
    ///
    /// Without stored validators the answer is always yes. Otherwise a
    /// matching ETag, or failing that a matching Last-Modified, means
    /// unchanged.
    pub async fn should_fetch(
        &self,
        url: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> bool {
        let Some(stored) = self.validators(url).await else {
            return true;
        };

        if let (Some(seen), Some(known)) = (etag, stored.etag.as_deref()) {
            if seen == known {
                debug!("ETag unchanged for {}", url);
                return false;
            }
        }
        if let (Some(seen), Some(known)) = (last_modified, stored.last_modified.as_deref()) {
            if seen == known {
                debug!("Last-Modified unchanged for {}", url);
                return false;
            }
        }
        true
    }

    /// `If-None-Match` / `If-Modified-Since` headers for the next request.
    pub async fn conditional_headers(&self, url: &str) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        if let Some(stored) = self.validators(url).await {
            if let Some(etag) = stored.etag {
                headers.insert("If-None-Match".to_string(), etag);
            }
            if let Some(last_modified) = stored.last_modified {
                headers.insert("If-Modified-Since".to_string(), last_modified);
            }
        }
        headers
    }

    /// Record the validators from a response.
    pub async fn update_headers(
        &self,
        url: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> CacheResult<()> {
        let validators = Validators {
            url: url.to_string(),
            etag: etag.map(str::to_string),
            last_modified: last_modified.map(str::to_string),
        };
        self.cache
            .set_json_with_ttl(&Self::key(url), &validators, self.ttl)
            .await
    }
}
