//! Response cache maintenance commands.

use console::style;

use toolharvest::config::Settings;
use toolharvest::format_bytes;

use crate::cli::helpers::open_cache;
use crate::cli::icons::{arrow, success, warn};

/// Show cache statistics.
pub async fn cmd_cache_stats(settings: &Settings) -> anyhow::Result<()> {
    let cache = open_cache(settings)?;
    let stats = cache.stats().await?;

    println!("\n{}", style("Response Cache").bold());
    println!("{}", "-".repeat(40));
    println!("{:<20} {}", "Location:", stats.location);
    println!("{:<20} {}", "Entries:", stats.total_entries);
    println!("{:<20} {}", "Size:", format_bytes(stats.total_size_bytes));
    println!("{:<20} {}h", "Default TTL:", settings.cache.default_ttl_hours);
    Ok(())
}

/// Remove expired entries.
pub async fn cmd_cache_sweep(settings: &Settings) -> anyhow::Result<()> {
    let cache = open_cache(settings)?;
    let removed = cache.sweep().await?;
    if removed == 0 {
        println!("{} No expired entries", success());
    } else {
        println!("{} Removed {} expired entries", success(), removed);
    }
    Ok(())
}

/// Remove one entry by logical key.
pub async fn cmd_cache_invalidate(settings: &Settings, key: &str) -> anyhow::Result<()> {
    let cache = open_cache(settings)?;
    if cache.invalidate(key).await {
        println!("{} Invalidated {}", success(), key);
    } else {
        println!("{} Nothing cached under {}", warn(), key);
        println!("  {} Keys are usually full URLs", arrow());
    }
    Ok(())
}
