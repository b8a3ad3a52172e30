//! Configuration management using the prefer crate for discovery.
//!
//! Settings come from, in increasing priority: built-in defaults, a config
//! file (TOML or JSON), `HARVEST_*` environment variables, and command-line
//! flags. Paths in the file may start with `~`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::dedup::DEFAULT_FORGE_HOSTS;
use crate::scrapers::rate_limiter::RateLimitTable;
use crate::scrapers::retry::{RetryPolicy, DEFAULT_RETRYABLE_STATUSES};

/// Name prefer discovers config files under (`toolharvest.toml`, ...).
pub const CONFIG_NAME: &str = "toolharvest";

/// Config file name looked up in the data directory.
pub const CONFIG_FILENAME: &str = "toolharvest.toml";

/// Default cache subdirectory name.
const CACHE_SUBDIR: &str = "cache";

/// Default ledger filename.
pub const DEFAULT_LEDGER_FILENAME: &str = "scraped_tools_tracker.json";

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid value {value:?} for {var}")]
    Env { var: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// `[cache]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub default_ttl_hours: u64,
    pub conditional_ttl_hours: u64,
    /// Cache directory; relative paths resolve against the data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_hours: 72,
            conditional_ttl_hours: 72,
            dir: None,
        }
    }
}

/// `[ledger]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    /// Ledger file; relative paths resolve against the data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Hosts whose URLs collapse to `host/owner/repo`.
    pub forge_hosts: Vec<String>,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            path: None,
            forge_hosts: DEFAULT_FORGE_HOSTS.iter().map(|h| h.to_string()).collect(),
        }
    }
}

/// `[http]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub request_timeout_secs: u64,
    pub max_idle_per_host: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            max_idle_per_host: 5,
        }
    }
}

/// A retry preset as written in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_secs: f64,
    pub max_delay_secs: f64,
    #[serde(default = "default_retry_statuses")]
    pub retry_on_status: Vec<u16>,
}

fn default_retry_statuses() -> Vec<u16> {
    DEFAULT_RETRYABLE_STATUSES.to_vec()
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&RetryPolicy::default())
    }
}

impl From<&RetryPolicy> for RetryConfig {
    fn from(policy: &RetryPolicy) -> Self {
        Self {
            max_retries: policy.max_retries,
            base_delay_secs: policy.base_delay.as_secs_f64(),
            max_delay_secs: policy.max_delay.as_secs_f64(),
            retry_on_status: policy.retryable_statuses.clone(),
        }
    }
}

impl RetryConfig {
    pub fn aggressive() -> Self {
        Self::from(&RetryPolicy::aggressive())
    }

    pub fn to_policy(&self) -> RetryPolicy {
        let fallback = RetryPolicy::default();
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::try_from_secs_f64(self.base_delay_secs)
                .unwrap_or(fallback.base_delay),
            max_delay: Duration::try_from_secs_f64(self.max_delay_secs)
                .unwrap_or(fallback.max_delay),
            retryable_statuses: self.retry_on_status.clone(),
        }
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let valid = |secs: f64| secs.is_finite() && secs >= 0.0;
        if !valid(self.base_delay_secs) || !valid(self.max_delay_secs) {
            return Err(ConfigError::Invalid(format!(
                "retry.{}: delays must be non-negative numbers",
                name
            )));
        }
        if self.max_delay_secs < self.base_delay_secs {
            return Err(ConfigError::Invalid(format!(
                "retry.{}: max_delay_secs must be >= base_delay_secs",
                name
            )));
        }
        if let Some(status) = self.retry_on_status.iter().find(|s| !(100..=599).contains(*s)) {
            return Err(ConfigError::Invalid(format!(
                "retry.{}: {} is not an HTTP status",
                name, status
            )));
        }
        Ok(())
    }
}

/// `[retry]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Origins that get the aggressive preset.
    pub aggressive_origins: Vec<String>,
    pub default: RetryConfig,
    pub aggressive: RetryConfig,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            aggressive_origins: vec![
                "www.producthunt.com".to_string(),
                "alternativeto.net".to_string(),
                "stackshare.io".to_string(),
            ],
            default: RetryConfig::default(),
            aggressive: RetryConfig::aggressive(),
        }
    }
}

/// Application settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base data directory for the cache and ledger.
    pub data_dir: PathBuf,
    pub cache: CacheSettings,
    pub ledger: LedgerSettings,
    pub http: HttpSettings,
    pub retry: RetrySettings,
    /// Requests per minute per origin; the `default` entry is required.
    pub rate_limits: RateLimitTable,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            cache: CacheSettings::default(),
            ledger: LedgerSettings::default(),
            http: HttpSettings::default(),
            retry: RetrySettings::default(),
            rate_limits: RateLimitTable::default(),
            source_path: None,
        }
    }
}

/// Platform data directory, falling back to the working directory.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("toolharvest")
}

impl Settings {
    /// Parse settings from a file. JSON by `.json` extension, TOML otherwise.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_error = |message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        };
        let mut settings: Settings = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => {
                serde_json::from_str(&contents).map_err(|e| parse_error(e.to_string()))?
            }
            _ => toml::from_str(&contents).map_err(|e| parse_error(e.to_string()))?,
        };
        settings.source_path = Some(path.to_path_buf());
        Ok(settings)
    }

    /// Apply `HARVEST_*` environment variables.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|var| std::env::var(var).ok())
    }

    fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        if let Some(dir) = get("HARVEST_DATA_DIR") {
            debug!("Using HARVEST_DATA_DIR from environment: {}", dir);
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(value) = get("HARVEST_CACHE_TTL_HOURS") {
            self.cache.default_ttl_hours = parse_env("HARVEST_CACHE_TTL_HOURS", &value)?;
        }
        if let Some(value) = get("HARVEST_MAX_RETRIES") {
            let retries = parse_env("HARVEST_MAX_RETRIES", &value)?;
            self.retry.default.max_retries = retries;
        }
        if let Some(value) = get("HARVEST_REQUEST_TIMEOUT") {
            self.http.request_timeout_secs = parse_env("HARVEST_REQUEST_TIMEOUT", &value)?;
        }
        Ok(self)
    }

    /// Check values that deserialization alone cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.default_ttl_hours == 0 {
            return Err(ConfigError::Invalid(
                "cache.default_ttl_hours must be > 0".to_string(),
            ));
        }
        if self.http.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "http.request_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.rate_limits.default_rpm == 0 {
            return Err(ConfigError::Invalid(
                "rate_limits.default must be > 0".to_string(),
            ));
        }
        if let Some((origin, _)) = self.rate_limits.origins.iter().find(|(_, rpm)| **rpm == 0) {
            return Err(ConfigError::Invalid(format!(
                "rate_limits.\"{}\" must be > 0",
                origin
            )));
        }
        self.retry.default.validate("default")?;
        self.retry.aggressive.validate("aggressive")?;
        Ok(())
    }

    /// Resolve a configured path.
    /// - Paths starting with `~` are expanded
    /// - Absolute paths are returned as-is
    /// - Relative paths are resolved against the data directory
    fn resolve(&self, path: &Path) -> PathBuf {
        let path = expand_tilde(path);
        if path.is_absolute() {
            path
        } else {
            self.data_dir.join(path)
        }
    }

    pub fn cache_dir(&self) -> PathBuf {
        match &self.cache.dir {
            Some(dir) => self.resolve(dir),
            None => self.data_dir.join(CACHE_SUBDIR),
        }
    }

    pub fn ledger_path(&self) -> PathBuf {
        match &self.ledger.path {
            Some(path) => self.resolve(path),
            None => self.data_dir.join(DEFAULT_LEDGER_FILENAME),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.default_ttl_hours * 3600)
    }

    pub fn conditional_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.conditional_ttl_hours * 3600)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.http.request_timeout_secs)
    }

    /// Retry policy for requests to `origin`.
    pub fn policy_for(&self, origin: &str) -> RetryPolicy {
        let aggressive = self
            .retry
            .aggressive_origins
            .iter()
            .any(|o| o.eq_ignore_ascii_case(origin));
        if aggressive {
            self.retry.aggressive.to_policy()
        } else {
            self.retry.default.to_policy()
        }
    }

    /// Ensure the data directory exists.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(raw.as_ref()).as_ref())
}

fn parse_env<T: std::str::FromStr>(var: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        var: var.to_string(),
        value: value.to_string(),
    })
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides discovery).
    pub config_path: Option<PathBuf>,
    /// Data directory (--data flag).
    pub data: Option<PathBuf>,
}

/// Look for a config file in the data directory.
fn find_config_in_data_dir(data_dir: &Path) -> Option<PathBuf> {
    ["toml", "json"]
        .iter()
        .map(|ext| data_dir.join(format!("{}.{}", CONFIG_NAME, ext)))
        .find(|path| path.is_file())
}

/// Find the config file to load, if any.
///
/// Order: explicit path, a config file in the data directory given with
/// `--data`, then prefer's discovery of `toolharvest.*` in the standard
/// locations.
async fn discover_config(options: &LoadOptions) -> Option<PathBuf> {
    if let Some(path) = &options.config_path {
        return Some(expand_tilde(path));
    }

    if let Some(data_dir) = &options.data {
        if let Some(path) = find_config_in_data_dir(&expand_tilde(data_dir)) {
            debug!("Found config in data dir: {}", path.display());
            return Some(path);
        }
    }

    match prefer::load(CONFIG_NAME).await {
        Ok(found) => found.source_path().map(|path| path.to_path_buf()),
        Err(_) => None,
    }
}

/// Load, override and validate settings.
pub async fn load_settings(options: &LoadOptions) -> Result<Settings, ConfigError> {
    let settings = match discover_config(options).await {
        Some(path) => {
            debug!("Loading config from {}", path.display());
            Settings::load_from_path(&path)?
        }
        None => Settings::default(),
    };

    let mut settings = settings.with_env_overrides()?;
    if let Some(data) = &options.data {
        settings.data_dir = data.clone();
    }
    settings.data_dir = expand_tilde(&settings.data_dir);
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.cache_ttl(), Duration::from_secs(72 * 3600));
        assert_eq!(settings.request_timeout(), Duration::from_secs(30));
        assert_eq!(settings.policy_for("example.com"), RetryPolicy::default());
        assert_eq!(
            settings.policy_for("www.producthunt.com"),
            RetryPolicy::aggressive()
        );
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_parse_full_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(
            &path,
            r#"
data_dir = "/srv/harvest"

[cache]
default_ttl_hours = 24
dir = "responses"

[ledger]
path = "/var/lib/ledger.json"
forge_hosts = ["github.com", "git.example.org"]

[http]
request_timeout_secs = 10

[retry]
aggressive_origins = ["slow.example.com"]

[retry.default]
max_retries = 2
base_delay_secs = 0.5
max_delay_secs = 10.0

[rate_limits]
default = 20
"api.github.com" = 50
"#,
        )
        .unwrap();

        let settings = Settings::load_from_path(&path).unwrap();
        assert_eq!(settings.cache_ttl(), Duration::from_secs(24 * 3600));
        assert_eq!(settings.cache_dir(), PathBuf::from("/srv/harvest/responses"));
        assert_eq!(settings.ledger_path(), PathBuf::from("/var/lib/ledger.json"));
        assert_eq!(settings.ledger.forge_hosts.len(), 2);
        assert_eq!(settings.http.max_idle_per_host, 5);
        assert_eq!(settings.rate_limits.requests_per_minute("api.github.com"), 50);
        assert_eq!(settings.rate_limits.requests_per_minute("other.org"), 20);

        let policy = settings.policy_for("example.com");
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert_eq!(policy.retryable_statuses, DEFAULT_RETRYABLE_STATUSES.to_vec());
        assert_eq!(settings.policy_for("slow.example.com"), RetryPolicy::aggressive());
        assert_eq!(settings.source_path.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_rate_limits_require_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(&path, "[rate_limits]\n\"example.com\" = 10\n").unwrap();
        assert!(matches!(
            Settings::load_from_path(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let settings = Settings::default()
            .with_overrides_from(env(&[
                ("HARVEST_DATA_DIR", "/tmp/harvest"),
                ("HARVEST_CACHE_TTL_HOURS", "6"),
                ("HARVEST_MAX_RETRIES", "7"),
                ("HARVEST_REQUEST_TIMEOUT", " 15 "),
            ]))
            .unwrap();
        assert_eq!(settings.data_dir, PathBuf::from("/tmp/harvest"));
        assert_eq!(settings.cache_ttl(), Duration::from_secs(6 * 3600));
        assert_eq!(settings.retry.default.max_retries, 7);
        assert_eq!(settings.request_timeout(), Duration::from_secs(15));
        assert_eq!(settings.cache_dir(), PathBuf::from("/tmp/harvest/cache"));
    }

    #[test]
    fn test_bad_env_value_is_an_error() {
        let result =
            Settings::default().with_overrides_from(env(&[("HARVEST_MAX_RETRIES", "lots")]));
        match result {
            Err(ConfigError::Env { var, value }) => {
                assert_eq!(var, "HARVEST_MAX_RETRIES");
                assert_eq!(value, "lots");
            }
            other => panic!("expected env error, got {:?}", other),
        }
    }

    #[test]
    fn test_validation() {
        let mut settings = Settings::default();
        settings.cache.default_ttl_hours = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.retry.default.max_delay_secs = 0.1;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.retry.aggressive.base_delay_secs = f64::NAN;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.rate_limits = RateLimitTable::new(10).with_origin("example.com", 0);
        assert!(settings.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_settings_with_explicit_paths() {
        let dir = tempdir().unwrap();
        let config = dir.path().join("custom.toml");
        std::fs::write(&config, "[http]\nrequest_timeout_secs = 5\n").unwrap();

        let settings = load_settings(&LoadOptions {
            config_path: Some(config),
            data: Some(dir.path().join("data")),
        })
        .await
        .unwrap();
        assert_eq!(settings.request_timeout(), Duration::from_secs(5));
        assert_eq!(settings.data_dir, dir.path().join("data"));
        assert_eq!(
            settings.ledger_path(),
            dir.path().join("data").join(DEFAULT_LEDGER_FILENAME)
        );
    }

    #[tokio::test]
    async fn test_config_in_data_dir_is_found() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILENAME),
            "[cache]\ndefault_ttl_hours = 12\n",
        )
        .unwrap();

        let settings = load_settings(&LoadOptions {
            config_path: None,
            data: Some(dir.path().to_path_buf()),
        })
        .await
        .unwrap();
        assert_eq!(settings.cache_ttl(), Duration::from_secs(12 * 3600));
        assert_eq!(
            settings.source_path.as_deref(),
            Some(dir.path().join(CONFIG_FILENAME).as_path())
        );
    }

    #[test]
    fn test_json_config_by_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("toolharvest.json");
        std::fs::write(&path, r#"{"http": {"request_timeout_secs": 9}}"#).unwrap();

        let settings = Settings::load_from_path(&path).unwrap();
        assert_eq!(settings.request_timeout(), Duration::from_secs(9));
    }

    #[test]
    fn test_tilde_paths_expand_to_home() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(
            &path,
            r#"
data_dir = "/srv/h"

[cache]
dir = "~/harvest-cache"

[ledger]
path = "~/ledgers/tools.json"
"#,
        )
        .unwrap();

        let home = dirs::home_dir().unwrap();
        let settings = Settings::load_from_path(&path).unwrap();
        assert_eq!(settings.cache_dir(), home.join("harvest-cache"));
        assert_eq!(settings.ledger_path(), home.join("ledgers/tools.json"));
        assert!(!settings.cache_dir().starts_with("/srv/h"));
    }

    #[test]
    fn test_settings_round_trip_through_toml() {
        let settings = Settings::default();
        let rendered = toml::to_string_pretty(&settings).unwrap();
        let parsed: Settings = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, settings);
    }
}
