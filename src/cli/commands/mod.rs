//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod cache;
mod config_cmd;
mod fetch;
mod ledger;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use toolharvest::config::{load_settings, LoadOptions};

use fetch::FetchArgs;

#[derive(Parser)]
#[command(name = "harvest")]
#[command(about = "Resilient fetch layer for developer-tools catalog scrapers")]
#[command(version)]
pub struct Cli {
    /// Data directory holding the cache and ledger (overrides config file)
    #[arg(long, short = 'd', global = true)]
    data: Option<PathBuf>,

    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch URLs through the rate limiter, retry policy, cache and ledger
    Fetch(FetchArgs),

    /// Inspect and maintain the response cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Inspect and maintain the dedup ledger
    Ledger {
        #[command(subcommand)]
        command: LedgerCommands,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Show entry count and size
    Stats,

    /// Remove entries older than the default TTL
    Sweep,

    /// Remove the entry stored under a key (usually a URL)
    Invalidate {
        /// Logical cache key
        key: String,
    },
}

#[derive(Subcommand)]
enum LedgerCommands {
    /// Show how many URLs are recorded
    Stats,

    /// Report whether URLs are already recorded
    Check {
        /// URLs to check
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Record URLs as processed
    Mark {
        /// URLs to record
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Forget every recorded URL
    Clear {
        /// Skip the confirmation check
        #[arg(long)]
        confirm: bool,
    },

    /// Write recorded identifiers to a file, one per line
    Export {
        /// Output file
        output: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        data: cli.data,
    };
    let settings = load_settings(&options).await?;

    match cli.command {
        Commands::Fetch(args) => fetch::cmd_fetch(&settings, args).await,
        Commands::Cache { command } => match command {
            CacheCommands::Stats => cache::cmd_cache_stats(&settings).await,
            CacheCommands::Sweep => cache::cmd_cache_sweep(&settings).await,
            CacheCommands::Invalidate { key } => {
                cache::cmd_cache_invalidate(&settings, &key).await
            }
        },
        Commands::Ledger { command } => match command {
            LedgerCommands::Stats => ledger::cmd_ledger_stats(&settings),
            LedgerCommands::Check { urls } => ledger::cmd_ledger_check(&settings, &urls),
            LedgerCommands::Mark { urls } => ledger::cmd_ledger_mark(&settings, &urls),
            LedgerCommands::Clear { confirm } => ledger::cmd_ledger_clear(&settings, confirm),
            LedgerCommands::Export { output } => ledger::cmd_ledger_export(&settings, &output),
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show => config_cmd::cmd_config_show(&settings),
        },
    }
}
