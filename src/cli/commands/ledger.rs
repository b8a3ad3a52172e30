//! Dedup ledger commands.

use std::path::Path;

use console::style;

use toolharvest::config::Settings;

use crate::cli::helpers::open_ledger;
use crate::cli::icons::{arrow, success, warn};

/// Show ledger statistics.
pub fn cmd_ledger_stats(settings: &Settings) -> anyhow::Result<()> {
    let ledger = open_ledger(settings);
    let stats = ledger.stats();

    println!("\n{}", style("Dedup Ledger").bold());
    println!("{}", "-".repeat(40));
    if let Some(path) = &stats.path {
        println!("{:<20} {}", "File:", path.display());
    }
    println!("{:<20} {}", "URLs recorded:", stats.total_marked);
    Ok(())
}

/// Report which URLs are already recorded.
pub fn cmd_ledger_check(settings: &Settings, urls: &[String]) -> anyhow::Result<()> {
    let ledger = open_ledger(settings);
    for url in urls {
        let normalized = ledger.normalize(url);
        if ledger.is_marked(url) {
            println!("{} {} {} {}", success(), url, arrow(), style(normalized).dim());
        } else {
            println!("{} {} (not recorded)", style("·").dim(), url);
        }
    }
    let unmarked = ledger.unmarked(urls).len();
    println!("\n{} of {} already recorded", urls.len() - unmarked, urls.len());
    Ok(())
}

/// Record URLs as processed.
pub fn cmd_ledger_mark(settings: &Settings, urls: &[String]) -> anyhow::Result<()> {
    let mut ledger = open_ledger(settings);
    let added = ledger.mark_all(urls);
    // mark_all keeps going on write failure; surface it here
    ledger.flush()?;
    println!("{} Recorded {} new URLs ({} total)", success(), added, ledger.len());
    Ok(())
}

/// Forget every recorded URL.
pub fn cmd_ledger_clear(settings: &Settings, confirm: bool) -> anyhow::Result<()> {
    let mut ledger = open_ledger(settings);
    if !confirm {
        println!(
            "{} This would forget {} recorded URLs. Re-run with --confirm.",
            warn(),
            ledger.len()
        );
        return Ok(());
    }
    let count = ledger.len();
    ledger.clear();
    ledger.flush()?;
    println!("{} Cleared {} URLs", success(), count);
    Ok(())
}

/// Export recorded identifiers to a text file.
pub fn cmd_ledger_export(settings: &Settings, output: &Path) -> anyhow::Result<()> {
    let ledger = open_ledger(settings);
    let count = ledger.export(output)?;
    println!("{} Exported {} URLs to {}", success(), count, output.display());
    Ok(())
}
