//! The `fetch` command.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use console::style;
use futures::future::join_all;
use tokio::sync::Mutex;

use toolharvest::cache::{cache_key, ConditionalFetcher};
use toolharvest::config::Settings;
use toolharvest::format_bytes;
use toolharvest::scrapers::{
    DedupMode, FetchJob, FetchOutcome, Fetcher, HttpClient, RateLimiterRegistry, RetryPolicy,
};

use crate::cli::helpers::{open_cache, open_ledger, progress_bar, truncate};
use crate::cli::icons::{arrow, error, success, warn};

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// URLs to fetch
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Cache key to use instead of the URL (single URL only)
    #[arg(long)]
    pub key: Option<String>,

    /// Rate-limit origin to use instead of the URL's host
    #[arg(long)]
    pub origin: Option<String>,

    /// Use the aggressive retry preset
    #[arg(long)]
    pub aggressive: bool,

    /// Bypass the response cache
    #[arg(long)]
    pub no_cache: bool,

    /// Cache TTL in hours for this run
    #[arg(long)]
    pub ttl_hours: Option<u64>,

    /// Skip URLs already in the ledger
    #[arg(long)]
    pub skip_seen: bool,

    /// Skip URLs already in the ledger and record successful fetches
    #[arg(long)]
    pub mark: bool,

    /// Revalidate stale cache entries with conditional requests
    #[arg(long)]
    pub conditional: bool,

    /// Write bodies here: a file for one URL, a directory for several
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl FetchArgs {
    fn dedup_mode(&self) -> DedupMode {
        if self.mark {
            DedupMode::SkipAndMark
        } else if self.skip_seen {
            DedupMode::Skip
        } else {
            DedupMode::Off
        }
    }

    fn policy(&self, settings: &Settings, url: &str) -> RetryPolicy {
        if self.aggressive {
            return settings.retry.aggressive.to_policy();
        }
        match self
            .origin
            .clone()
            .or_else(|| RateLimiterRegistry::extract_origin(url))
        {
            Some(origin) => settings.policy_for(&origin),
            None => settings.retry.default.to_policy(),
        }
    }

    fn job(&self, settings: &Settings, url: &str) -> FetchJob {
        let mut job = FetchJob::get(url)
            .with_policy(self.policy(settings, url))
            .with_dedup(self.dedup_mode())
            .conditional(self.conditional);

        if let Some(origin) = &self.origin {
            job = job.with_origin(origin.clone());
        }
        if !self.no_cache {
            job = match &self.key {
                Some(key) => job.with_cache_key(key.clone()),
                None => job.cached(),
            };
        }
        if let Some(hours) = self.ttl_hours {
            job = job.with_ttl(Duration::from_secs(hours * 3600));
        }
        job
    }
}

/// Fetch URLs and report what happened to each.
pub async fn cmd_fetch(settings: &Settings, args: FetchArgs) -> anyhow::Result<()> {
    if args.key.is_some() && args.urls.len() > 1 {
        anyhow::bail!("--key can only be used with a single URL");
    }

    let client = HttpClient::builder(settings.request_timeout())
        .max_idle_per_host(settings.http.max_idle_per_host)
        .build()?;

    let mut builder = Fetcher::builder(Arc::new(client))
        .rate_limiter(RateLimiterRegistry::new(settings.rate_limits.clone()));
    if !args.no_cache {
        let cache = open_cache(settings)?;
        let conditional =
            ConditionalFetcher::new(cache.clone()).with_ttl(settings.conditional_ttl());
        builder = builder.cache(cache).conditional(conditional);
    }
    if args.mark || args.skip_seen {
        builder = builder.ledger(Arc::new(Mutex::new(open_ledger(settings))));
    }
    let fetcher = builder.build();

    let cancel = fetcher.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let jobs: Vec<FetchJob> = args.urls.iter().map(|url| args.job(settings, url)).collect();

    let progress = (jobs.len() > 1).then(|| progress_bar(jobs.len()));
    let results = join_all(jobs.iter().map(|job| {
        let fetcher = &fetcher;
        let progress = progress.as_ref();
        async move {
            let result = fetcher.fetch(job).await;
            if let Some(progress) = progress {
                progress.set_message(truncate(job.url(), 60));
                progress.inc(1);
            }
            result
        }
    }))
    .await;
    if let Some(progress) = progress {
        progress.finish_and_clear();
    }

    let single = jobs.len() == 1;
    let mut failed = 0;
    for (job, result) in jobs.iter().zip(results) {
        match result {
            Ok(outcome) => {
                report_outcome(job, &outcome);
                if let Some(body) = outcome.body() {
                    write_body(args.output.as_deref(), single, job.url(), body)?;
                }
            }
            Err(e) => {
                failed += 1;
                eprintln!("{} {}: {}", error(), job.url(), e);
            }
        }
    }

    if !single {
        eprintln!(
            "\n{} {} fetched, {} failed",
            style("Summary:").bold(),
            jobs.len() - failed,
            failed
        );
    }
    if failed == jobs.len() {
        anyhow::bail!("All fetches failed");
    }
    Ok(())
}

fn report_outcome(job: &FetchJob, outcome: &FetchOutcome) {
    match outcome {
        FetchOutcome::AlreadySeen => {
            eprintln!("{} {} (already in ledger)", warn(), job.url());
        }
        FetchOutcome::Cached(body) => {
            eprintln!(
                "{} {} {} cached, {}",
                success(),
                job.url(),
                arrow(),
                format_bytes(body.len() as u64)
            );
        }
        FetchOutcome::Fetched(response) => {
            eprintln!(
                "{} {} {} HTTP {}, {}",
                success(),
                job.url(),
                arrow(),
                response.status_code(),
                format_bytes(response.body.len() as u64)
            );
        }
    }
}

fn write_body(output: Option<&Path>, single: bool, url: &str, body: &[u8]) -> anyhow::Result<()> {
    match output {
        Some(path) if single => std::fs::write(path, body)?,
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            std::fs::write(dir.join(cache_key(url)), body)?;
        }
        None if single => std::io::stdout().write_all(body)?,
        None => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> FetchArgs {
        use clap::Parser;

        #[derive(Parser)]
        struct Wrapper {
            #[command(flatten)]
            args: FetchArgs,
        }

        let mut argv = vec!["fetch", "https://www.producthunt.com/posts/x"];
        argv.extend_from_slice(extra);
        Wrapper::parse_from(argv).args
    }

    #[test]
    fn test_dedup_mode_from_flags() {
        assert_eq!(args(&[]).dedup_mode(), DedupMode::Off);
        assert_eq!(args(&["--skip-seen"]).dedup_mode(), DedupMode::Skip);
        assert_eq!(args(&["--mark"]).dedup_mode(), DedupMode::SkipAndMark);
    }

    #[test]
    fn test_job_uses_origin_policy_and_cache_key() {
        let settings = Settings::default();
        let url = "https://www.producthunt.com/posts/x";

        let job = args(&[]).job(&settings, url);
        assert_eq!(job.policy, RetryPolicy::aggressive());
        assert_eq!(job.cache_key.as_deref(), Some(url));

        let job = args(&["--no-cache", "--origin", "example.com"]).job(&settings, url);
        assert_eq!(job.policy, RetryPolicy::default());
        assert_eq!(job.cache_key, None);
        assert_eq!(job.origin.as_deref(), Some("example.com"));

        let job = args(&["--key", "ph:x", "--ttl-hours", "2"]).job(&settings, url);
        assert_eq!(job.cache_key.as_deref(), Some("ph:x"));
        assert_eq!(job.ttl_override, Some(Duration::from_secs(7200)));
    }
}
