//! harvest - operator CLI for the toolharvest fetch layer.
//!
//! Fetches URLs through the shared rate limiter, retry policy, response cache
//! and dedup ledger, and maintains the cache and ledger on disk.

mod cli;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    let default_filter = if cli::is_verbose() {
        "toolharvest=info,harvest=info"
    } else {
        "toolharvest=warn,harvest=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    cli::run().await
}
