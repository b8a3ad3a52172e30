//! Configuration commands.

use console::style;

use toolharvest::config::Settings;

use crate::cli::icons::arrow;

/// Print the effective configuration.
pub fn cmd_config_show(settings: &Settings) -> anyhow::Result<()> {
    let source = settings
        .source_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "built-in defaults".to_string());

    eprintln!("{} {}", style("Config source:").bold(), source);
    eprintln!("  {} Cache: {}", arrow(), settings.cache_dir().display());
    eprintln!("  {} Ledger: {}", arrow(), settings.ledger_path().display());
    eprintln!();
    print!("{}", toml::to_string_pretty(settings)?);
    Ok(())
}
