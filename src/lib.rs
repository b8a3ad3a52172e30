//! toolharvest - resilient fetch layer for developer-tools catalog scrapers.
//!
//! Site scrapers share per-origin request pacing, bounded retries with
//! exponential backoff, a TTL response cache with conditional revalidation,
//! and a cross-run URL dedup ledger.

pub mod cache;
pub mod config;
pub mod dedup;
pub mod scrapers;
mod utils;

pub use utils::format_bytes;
