//! Resilient fetch layer shared by the site scrapers.
//!
//! Leaves first: `http_client` (transport and request identity),
//! `rate_limiter`, `retry`, then the `fetcher` that ties them to the
//! response cache and dedup ledger.

pub mod error;
pub mod fetcher;
pub mod http_client;
pub mod rate_limiter;
pub mod retry;

pub use error::FetchError;
pub use fetcher::{DedupMode, FetchJob, FetchOutcome, Fetcher, FetcherBuilder};
pub use http_client::{FetchRequest, HttpClient, HttpResponse, Method, Transport};
pub use rate_limiter::{RateLimitTable, RateLimiterRegistry};
pub use retry::RetryPolicy;
