//! Per-origin request pacing.
//!
//! Each origin gets a minimum spacing between granted request slots derived
//! from its requests-per-minute entry. Grants are reserved under a single
//! map-wide lock, so concurrent callers never compute their wait from the same
//! stale timestamp; the sleep itself happens outside the lock so other origins
//! proceed freely.

mod config;
mod origin_state;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

pub use config::{
    OriginStats, RateLimitTable, DEFAULT_KEY, DEFAULT_REQUESTS_PER_MINUTE, JITTER_FRACTION,
};
use origin_state::OriginState;

use super::error::FetchError;

/// Registry of per-origin pacing state.
///
/// Clones share state; pass one registry to every fetcher that should be
/// paced together.
#[derive(Debug, Clone)]
pub struct RateLimiterRegistry {
    table: Arc<RateLimitTable>,
    origins: Arc<Mutex<HashMap<String, OriginState>>>,
}

impl RateLimiterRegistry {
    pub fn new(table: RateLimitTable) -> Self {
        Self {
            table: Arc::new(table),
            origins: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Extract the origin (host, plus port when non-default) from a URL.
    pub fn extract_origin(url: &str) -> Option<String> {
        let parsed = Url::parse(url).ok()?;
        let host = parsed.host_str()?.to_ascii_lowercase();
        Some(match parsed.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host,
        })
    }

    pub fn table(&self) -> &RateLimitTable {
        &self.table
    }

    /// Minimum spacing enforced for an origin.
    pub fn min_interval(&self, origin: &str) -> Duration {
        self.table.min_interval(origin)
    }

    /// Reserve the next slot for `origin`, returning when it may be used.
    async fn reserve(&self, origin: &str) -> (Instant, Duration) {
        let key = origin.to_ascii_lowercase();
        let mut origins = self.origins.lock().await;
        let now = Instant::now();
        let state = origins
            .entry(key)
            .or_insert_with(|| OriginState::new(self.table.min_interval(origin)));

        let wait = state.time_until_ready(now);
        let jitter = if wait > Duration::ZERO {
            let max_jitter = wait.as_secs_f64() * JITTER_FRACTION;
            Duration::from_secs_f64(rand::rng().random_range(0.0..=max_jitter))
        } else {
            Duration::ZERO
        };

        let total = wait + jitter;
        let grant_at = now + total;
        state.grant(grant_at, total);
        (grant_at, total)
    }

    /// Suspend until a request to `origin` is permitted.
    pub async fn wait(&self, origin: &str) {
        let (grant_at, total) = self.reserve(origin).await;
        if total > Duration::ZERO {
            debug!("Rate limiting {}: waiting {:?}", origin, total);
            tokio::time::sleep_until(grant_at).await;
        }
    }

    /// Like `wait`, but gives up when `cancel` fires.
    ///
    /// A cancelled caller's reserved slot is not returned to the pool.
    pub async fn wait_cancellable(
        &self,
        origin: &str,
        cancel: &CancellationToken,
    ) -> Result<(), FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        let (grant_at, total) = self.reserve(origin).await;
        if total == Duration::ZERO {
            return Ok(());
        }
        debug!("Rate limiting {}: waiting {:?}", origin, total);
        tokio::select! {
            _ = tokio::time::sleep_until(grant_at) => Ok(()),
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
        }
    }

    /// Wait for the origin of `url`. Returns the origin, or `None` for URLs
    /// without a host (which are not paced).
    pub async fn acquire(&self, url: &str) -> Option<String> {
        let origin = Self::extract_origin(url)?;
        self.wait(&origin).await;
        Some(origin)
    }

    /// Get statistics for all origins seen so far.
    pub async fn stats(&self) -> HashMap<String, OriginStats> {
        let origins = self.origins.lock().await;
        origins
            .iter()
            .map(|(k, v)| {
                (
                    k.clone(),
                    OriginStats {
                        min_interval: v.min_interval,
                        total_grants: v.total_grants,
                        total_waited: v.total_waited,
                    },
                )
            })
            .collect()
    }
}

impl Default for RateLimiterRegistry {
    fn default() -> Self {
        Self::new(RateLimitTable::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Timer granularity under the paused test clock.
    const TICK: Duration = Duration::from_millis(2);

    fn registry(rpm: u32) -> RateLimiterRegistry {
        RateLimiterRegistry::new(RateLimitTable::new(30).with_origin("example.com", rpm))
    }

    #[test]
    fn test_extract_origin() {
        assert_eq!(
            RateLimiterRegistry::extract_origin("https://Example.com/path?q=1"),
            Some("example.com".to_string())
        );
        assert_eq!(
            RateLimiterRegistry::extract_origin("http://localhost:8080/x"),
            Some("localhost:8080".to_string())
        );
        assert_eq!(
            RateLimiterRegistry::extract_origin("https://example.com:443/"),
            Some("example.com".to_string())
        );
        assert_eq!(RateLimiterRegistry::extract_origin("not a url"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_waits_are_spaced() {
        let limiter = registry(60);
        let mut grants = Vec::new();
        for _ in 0..5 {
            limiter.wait("example.com").await;
            grants.push(Instant::now());
        }
        for pair in grants.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(1) - TICK);
            // jitter adds at most 20% of the wait
            assert!(pair[1] - pair[0] <= Duration::from_millis(1200) + TICK);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_waits_never_overlap() {
        let limiter = registry(60);
        let start = Instant::now();
        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let limiter = limiter.clone();
                async move {
                    limiter.wait("example.com").await;
                    Instant::now()
                }
            })
            .collect();
        let mut grants = futures::future::join_all(tasks).await;
        grants.sort();
        for pair in grants.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(1) - TICK);
        }
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_origins_are_independent() {
        let limiter = registry(60);
        let start = Instant::now();
        limiter.wait("example.com").await;
        limiter.wait("other.org").await;
        limiter.wait("third.net").await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_origin_case_shares_pacing() {
        let limiter = registry(60);
        limiter.wait("Example.COM").await;
        let first = Instant::now();
        limiter.wait("example.com").await;
        assert!(first.elapsed() >= Duration::from_secs(1) - TICK);

        let stats = limiter.stats().await;
        assert_eq!(stats.len(), 1);
        assert_eq!(stats["example.com"].total_grants, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_cancellable() {
        let limiter = registry(1);
        let cancel = CancellationToken::new();
        limiter.wait_cancellable("example.com", &cancel).await.unwrap();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });
        let result = limiter.wait_cancellable("example.com", &cancel).await;
        assert!(matches!(result, Err(FetchError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_track_grants() {
        let limiter = registry(60);
        limiter.acquire("https://example.com/a").await;
        limiter.acquire("https://example.com/b").await;
        let stats = limiter.stats().await;
        let origin = stats.get("example.com").unwrap();
        assert_eq!(origin.total_grants, 2);
        assert_eq!(origin.min_interval, Duration::from_secs(1));
        assert!(origin.total_waited >= Duration::from_secs(1));
    }
}
