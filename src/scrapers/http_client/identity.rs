//! Randomized outbound request identity.
//!
//! Every call picks a fresh user agent and accept-language so that thousands
//! of requests do not share a single fingerprint.

use std::collections::HashMap;
use std::time::Duration;

use rand::seq::IndexedRandom;
use rand::Rng;

/// Real browser user agents.
pub const USER_AGENTS: &[&str] = &[
    // Chrome on Mac
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    // Chrome on Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    // Chrome on Linux
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    // Safari on Mac
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
    // Firefox
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) Gecko/20100101 Firefox/120.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:121.0) Gecko/20100101 Firefox/121.0",
];

pub const ACCEPT_LANGUAGES: &[&str] = &[
    "en-US,en;q=0.9",
    "en-GB,en;q=0.9",
    "en-US,en;q=0.9,es;q=0.8",
    "en-US,en;q=0.9,fr;q=0.8",
    "en-US,en;q=0.9,de;q=0.8",
];

/// Accept header used for HTML page fetches.
pub const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

/// Get a random user agent.
pub fn random_user_agent() -> &'static str {
    USER_AGENTS.choose(&mut rand::rng()).copied().unwrap_or(USER_AGENTS[0])
}

/// Get a random accept-language value.
pub fn random_accept_language() -> &'static str {
    ACCEPT_LANGUAGES
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(ACCEPT_LANGUAGES[0])
}

/// Browser-like headers for page fetches.
///
/// With a referer the request claims to be a same-origin navigation,
/// otherwise a direct (`none`) navigation.
pub fn browser_headers(referer: Option<&str>, accept: Option<&str>) -> HashMap<String, String> {
    let mut headers: HashMap<String, String> = [
        ("User-Agent", random_user_agent()),
        ("Accept", accept.unwrap_or(DEFAULT_ACCEPT)),
        ("Accept-Language", random_accept_language()),
        ("Accept-Encoding", "gzip, deflate, br"),
        ("DNT", "1"),
        ("Connection", "keep-alive"),
        ("Upgrade-Insecure-Requests", "1"),
        ("Sec-Fetch-Dest", "document"),
        ("Sec-Fetch-Mode", "navigate"),
        ("Sec-Fetch-Site", "none"),
        ("Cache-Control", "max-age=0"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    if let Some(referer) = referer {
        headers.insert("Referer".to_string(), referer.to_string());
        headers.insert("Sec-Fetch-Site".to_string(), "same-origin".to_string());
    }

    headers
}

/// Headers for JSON API requests.
pub fn api_headers(
    api_key: Option<&str>,
    api_version: Option<&str>,
    extra: Option<&HashMap<String, String>>,
) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    headers.insert("User-Agent".to_string(), random_user_agent().to_string());
    headers.insert("Accept".to_string(), "application/json".to_string());
    headers.insert(
        "Accept-Language".to_string(),
        random_accept_language().to_string(),
    );
    headers.insert("Accept-Encoding".to_string(), "gzip, deflate, br".to_string());

    if let Some(key) = api_key {
        headers.insert("Authorization".to_string(), format!("Bearer {}", key));
    }
    if let Some(version) = api_version {
        headers.insert("X-API-Version".to_string(), version.to_string());
    }
    if let Some(extra) = extra {
        headers.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    headers
}

/// Sleep for a uniformly random duration in `[min, max]`.
pub async fn random_delay(min: Duration, max: Duration) {
    let delay = if max > min {
        rand::rng().random_range(min..=max)
    } else {
        min
    };
    tokio::time::sleep(delay).await;
}
