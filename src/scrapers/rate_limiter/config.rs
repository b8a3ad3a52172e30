//! Rate limiter configuration and types.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Requests per minute for origins without an explicit entry.
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 30;

/// Key of the required fallback entry in a serialized table.
pub const DEFAULT_KEY: &str = "default";

/// Upper bound of the random jitter, as a fraction of the computed wait.
pub const JITTER_FRACTION: f64 = 0.2;

/// Static mapping of origin to requests-per-minute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "HashMap<String, u32>", try_from = "HashMap<String, u32>")]
pub struct RateLimitTable {
    pub default_rpm: u32,
    pub origins: HashMap<String, u32>,
}

impl RateLimitTable {
    pub fn new(default_rpm: u32) -> Self {
        Self {
            default_rpm,
            origins: HashMap::new(),
        }
    }

    pub fn with_origin(mut self, origin: &str, rpm: u32) -> Self {
        self.origins.insert(origin.to_ascii_lowercase(), rpm);
        self
    }

    /// Requests per minute for an origin, falling back to the default.
    pub fn requests_per_minute(&self, origin: &str) -> u32 {
        self.origins
            .get(&origin.to_ascii_lowercase())
            .copied()
            .unwrap_or(self.default_rpm)
    }

    /// Minimum spacing between granted slots for an origin.
    pub fn min_interval(&self, origin: &str) -> Duration {
        let rpm = self.requests_per_minute(origin).max(1);
        Duration::from_secs_f64(60.0 / rpm as f64)
    }
}

impl Default for RateLimitTable {
    fn default() -> Self {
        Self::new(DEFAULT_REQUESTS_PER_MINUTE)
            .with_origin("api.github.com", 50)
            .with_origin("github.com", 30)
            .with_origin("registry.npmjs.org", 60)
            .with_origin("www.producthunt.com", 10)
            .with_origin("alternativeto.net", 10)
            .with_origin("stackshare.io", 10)
            .with_origin("news.ycombinator.com", 30)
    }
}

impl From<RateLimitTable> for HashMap<String, u32> {
    fn from(table: RateLimitTable) -> Self {
        let mut map = table.origins;
        map.insert(DEFAULT_KEY.to_string(), table.default_rpm);
        map
    }
}

impl TryFrom<HashMap<String, u32>> for RateLimitTable {
    type Error = String;

    fn try_from(mut map: HashMap<String, u32>) -> Result<Self, Self::Error> {
        let default_rpm = map
            .remove(DEFAULT_KEY)
            .ok_or_else(|| "rate limit table requires a 'default' entry".to_string())?;

        if let Some((origin, _)) = map.iter().find(|(_, rpm)| **rpm == 0) {
            return Err(format!("requests_per_minute for '{}' must be > 0", origin));
        }
        if default_rpm == 0 {
            return Err("default requests_per_minute must be > 0".to_string());
        }

        Ok(Self {
            default_rpm,
            origins: map
                .into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v))
                .collect(),
        })
    }
}

/// Statistics for an origin.
#[derive(Debug, Clone)]
pub struct OriginStats {
    pub min_interval: Duration,
    pub total_grants: u64,
    pub total_waited: Duration,
}
