//! Shared helper functions for CLI commands.

use indicatif::{ProgressBar, ProgressStyle};
use toolharvest::cache::ResponseCache;
use toolharvest::config::Settings;
use toolharvest::dedup::DedupLedger;

/// Open the response cache configured in `settings`.
pub fn open_cache(settings: &Settings) -> anyhow::Result<ResponseCache> {
    let dir = settings.cache_dir();
    ResponseCache::open(&dir, settings.cache_ttl())
        .map_err(|e| anyhow::anyhow!("Failed to open cache at {}: {}", dir.display(), e))
}

/// Open the dedup ledger configured in `settings`.
pub fn open_ledger(settings: &Settings) -> DedupLedger {
    DedupLedger::open(settings.ledger_path())
        .with_forge_hosts(settings.ledger.forge_hosts.clone())
}

/// Progress bar in the house style.
pub fn progress_bar(len: usize) -> ProgressBar {
    let progress = ProgressBar::new(len as u64);
    let template = "{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}";
    if let Ok(bar_style) = ProgressStyle::default_bar().template(template) {
        progress.set_style(bar_style.progress_chars("█▓░"));
    }
    progress
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
