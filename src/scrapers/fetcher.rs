//! Fetch orchestration.
//!
//! One `fetch` walks the full pipeline: dedup check, cache lookup, then the
//! retry executor, where every attempt takes a rate-limiter slot and a fresh
//! browser identity before hitting the transport. Successful bodies are
//! written back to the cache and, when asked, marked in the ledger.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::FetchError;
use super::http_client::{identity, FetchRequest, HttpResponse, Transport};
use super::rate_limiter::RateLimiterRegistry;
use super::retry::{self, RetryPolicy};
use crate::cache::{CacheEntry, ConditionalFetcher, EntryMetadata, ResponseCache};
use crate::dedup::DedupLedger;

/// How a job interacts with the dedup ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DedupMode {
    /// Ignore the ledger.
    #[default]
    Off,
    /// Skip URLs already marked.
    Skip,
    /// Skip URLs already marked, and mark the URL after a successful fetch.
    SkipAndMark,
}

/// A single unit of fetch work.
#[derive(Debug, Clone)]
pub struct FetchJob {
    pub request: FetchRequest,
    /// Rate-limit origin; derived from the URL when absent.
    pub origin: Option<String>,
    /// Cache key; the job bypasses the cache when absent.
    pub cache_key: Option<String>,
    pub ttl_override: Option<Duration>,
    pub policy: RetryPolicy,
    pub dedup: DedupMode,
    /// Revalidate stale cache entries with If-None-Match / If-Modified-Since.
    pub conditional: bool,
}

impl FetchJob {
    pub fn new(request: FetchRequest) -> Self {
        Self {
            request,
            origin: None,
            cache_key: None,
            ttl_override: None,
            policy: RetryPolicy::default(),
            dedup: DedupMode::Off,
            conditional: false,
        }
    }

    /// A GET job with default settings.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(FetchRequest::get(url))
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        let origin: String = origin.into();
        self.origin = Some(origin.to_ascii_lowercase());
        self
    }

    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    /// Cache under the request URL.
    pub fn cached(mut self) -> Self {
        self.cache_key = Some(self.request.url.clone());
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_override = Some(ttl);
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_dedup(mut self, mode: DedupMode) -> Self {
        self.dedup = mode;
        self
    }

    pub fn conditional(mut self, enabled: bool) -> Self {
        self.conditional = enabled;
        self
    }

    pub fn url(&self) -> &str {
        &self.request.url
    }
}

/// Result of a successful fetch.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The ledger already holds this URL; nothing was fetched.
    AlreadySeen,
    /// Served from cache (fresh, or revalidated with a 304).
    Cached(Vec<u8>),
    /// Fetched from the network.
    Fetched(HttpResponse),
}

impl FetchOutcome {
    /// The body, if one was obtained.
    pub fn body(&self) -> Option<&[u8]> {
        match self {
            FetchOutcome::AlreadySeen => None,
            FetchOutcome::Cached(body) => Some(body),
            FetchOutcome::Fetched(response) => Some(&response.body),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FetchOutcome::AlreadySeen => "seen",
            FetchOutcome::Cached(_) => "cached",
            FetchOutcome::Fetched(_) => "fetched",
        }
    }
}

/// Builder for `Fetcher`.
pub struct FetcherBuilder {
    transport: Arc<dyn Transport>,
    rate_limiter: Option<RateLimiterRegistry>,
    cache: Option<ResponseCache>,
    conditional: Option<ConditionalFetcher>,
    ledger: Option<Arc<Mutex<DedupLedger>>>,
    cancel: Option<CancellationToken>,
}

impl FetcherBuilder {
    /// Share a rate-limiter registry. Without one the fetcher gets its own
    /// registry with the default table.
    pub fn rate_limiter(mut self, registry: RateLimiterRegistry) -> Self {
        self.rate_limiter = Some(registry);
        self
    }

    pub fn cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn conditional(mut self, conditional: ConditionalFetcher) -> Self {
        self.conditional = Some(conditional);
        self
    }

    pub fn ledger(mut self, ledger: Arc<Mutex<DedupLedger>>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn build(self) -> Fetcher {
        Fetcher {
            transport: self.transport,
            rate_limiter: self.rate_limiter.unwrap_or_default(),
            cache: self.cache,
            conditional: self.conditional,
            ledger: self.ledger,
            cancel: self.cancel.unwrap_or_default(),
        }
    }
}

/// Runs fetch jobs through dedup, cache, pacing and retry.
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    rate_limiter: RateLimiterRegistry,
    cache: Option<ResponseCache>,
    conditional: Option<ConditionalFetcher>,
    ledger: Option<Arc<Mutex<DedupLedger>>>,
    cancel: CancellationToken,
}

impl Fetcher {
    pub fn builder(transport: Arc<dyn Transport>) -> FetcherBuilder {
        FetcherBuilder {
            transport,
            rate_limiter: None,
            cache: None,
            conditional: None,
            ledger: None,
            cancel: None,
        }
    }

    pub fn rate_limiter(&self) -> &RateLimiterRegistry {
        &self.rate_limiter
    }

    /// Token that cancels every in-flight and future fetch when fired.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run one job.
    pub async fn fetch(&self, job: &FetchJob) -> Result<FetchOutcome, FetchError> {
        let url = job.url();

        if job.dedup != DedupMode::Off {
            if let Some(ledger) = &self.ledger {
                if ledger.lock().await.is_marked(url) {
                    debug!("Skipping {} (already in ledger)", url);
                    return Ok(FetchOutcome::AlreadySeen);
                }
            }
        }

        let mut stale = None;
        if let (Some(cache), Some(key)) = (&self.cache, job.cache_key.as_deref()) {
            if job.conditional {
                if let Some(entry) = cache.peek(key).await {
                    let ttl = job
                        .ttl_override
                        .or(entry.ttl)
                        .unwrap_or_else(|| cache.default_ttl());
                    if entry.is_fresh(ttl, Utc::now()) {
                        debug!("Cache hit: {}", key);
                        return Ok(FetchOutcome::Cached(entry.payload));
                    }
                    stale = Some(entry);
                }
            } else if let Some(payload) = cache.get(key, job.ttl_override).await {
                return Ok(FetchOutcome::Cached(payload));
            }
        }

        let origin = match &job.origin {
            Some(origin) => origin.clone(),
            None => RateLimiterRegistry::extract_origin(url)
                .ok_or_else(|| FetchError::InvalidUrl(url.to_string()))?,
        };

        let validators = match &stale {
            Some(entry) => self.validator_headers(url, entry).await,
            None => HashMap::new(),
        };

        let response = self.send_with_retry(job, &origin, &validators).await?;

        if response.is_not_modified() {
            if let (Some(cache), Some(entry)) = (&self.cache, stale) {
                debug!("{} not modified, reusing cached copy", url);
                if let Err(e) = cache.refresh(&entry).await {
                    warn!("Failed to refresh cache entry for {}: {}", url, e);
                }
                self.mark_if_requested(job).await;
                return Ok(FetchOutcome::Cached(entry.payload));
            }
        }

        if !response.is_success() {
            return Err(FetchError::Status {
                status: response.status_code(),
                url: url.to_string(),
            });
        }

        self.store(job, &response).await;
        self.mark_if_requested(job).await;
        Ok(FetchOutcome::Fetched(response))
    }

    /// Run jobs concurrently on the current task. Results keep job order.
    pub async fn fetch_all(&self, jobs: &[FetchJob]) -> Vec<Result<FetchOutcome, FetchError>> {
        let results = join_all(jobs.iter().map(|job| self.fetch(job))).await;
        let failed = results.iter().filter(|r| r.is_err()).count();
        info!("Fetched {} jobs ({} failed)", results.len(), failed);
        results
    }

    async fn send_with_retry(
        &self,
        job: &FetchJob,
        origin: &str,
        validators: &HashMap<String, String>,
    ) -> Result<HttpResponse, FetchError> {
        retry::execute(&job.policy, &self.cancel, move |attempt| async move {
            self.rate_limiter.wait_cancellable(origin, &self.cancel).await?;

            let request = &job.request;
            let mut headers =
                identity::browser_headers(request.referer.as_deref(), request.accept.as_deref());
            merge_headers(&mut headers, &request.headers);
            merge_headers(&mut headers, validators);

            if attempt > 0 {
                debug!("Attempt {} for {}", attempt + 1, request.url);
            }
            self.transport.send(request, &headers).await
        })
        .await
    }

    /// Validators for revalidating a stale entry: the ones recorded by the
    /// conditional fetcher, else the ones stored with the entry.
    async fn validator_headers(&self, url: &str, entry: &CacheEntry) -> HashMap<String, String> {
        if let Some(conditional) = &self.conditional {
            let headers = conditional.conditional_headers(url).await;
            if !headers.is_empty() {
                return headers;
            }
        }

        let mut headers = HashMap::new();
        if let Some(etag) = &entry.etag {
            headers.insert("If-None-Match".to_string(), etag.clone());
        }
        if let Some(last_modified) = &entry.last_modified {
            headers.insert("If-Modified-Since".to_string(), last_modified.clone());
        }
        headers
    }

    async fn store(&self, job: &FetchJob, response: &HttpResponse) {
        let url = job.url();

        if let (Some(cache), Some(key)) = (&self.cache, job.cache_key.as_deref()) {
            let metadata = EntryMetadata {
                etag: response.etag().map(str::to_string),
                last_modified: response.last_modified().map(str::to_string),
                extra: serde_json::json!({
                    "url": url,
                    "status": response.status_code(),
                    "content_type": response.content_type(),
                }),
            };
            let stored = match job.ttl_override {
                Some(ttl) => cache.set_with_ttl(key, &response.body, metadata, ttl).await,
                None => cache.set(key, &response.body, metadata).await,
            };
            if let Err(e) = stored {
                warn!("Failed to cache response for {}: {}", url, e);
            }
        }

        if job.conditional {
            if let Some(conditional) = &self.conditional {
                let (etag, last_modified) = (response.etag(), response.last_modified());
                if etag.is_some() || last_modified.is_some() {
                    if let Err(e) = conditional.update_headers(url, etag, last_modified).await {
                        warn!("Failed to record validators for {}: {}", url, e);
                    }
                }
            }
        }
    }

    async fn mark_if_requested(&self, job: &FetchJob) {
        if job.dedup != DedupMode::SkipAndMark {
            return;
        }
        if let Some(ledger) = &self.ledger {
            ledger.lock().await.mark_async(job.url()).await;
        }
    }
}

/// Insert `extra` into `headers`, replacing names that match case-insensitively.
fn merge_headers(headers: &mut HashMap<String, String>, extra: &HashMap<String, String>) {
    for (name, value) in extra {
        headers.retain(|existing, _| !existing.eq_ignore_ascii_case(name));
        headers.insert(name.clone(), value.clone());
    }
}
