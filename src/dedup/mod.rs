//! Cross-run URL deduplication ledger.
//!
//! A sorted set of normalized identifiers persisted as
//! `{"scraped_urls": [...], "total_count": n}`. Every mutation that changes
//! the set is flushed before the call returns. A failed flush is logged and
//! the in-memory set stays authoritative; the next mutation tries again.

mod normalize;

pub use normalize::{normalize_url, DEFAULT_FORGE_HOSTS};

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::utils::{write_atomic, write_atomic_async};

/// Errors from ledger persistence.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ledger serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    scraped_urls: Vec<String>,
    #[serde(default)]
    total_count: usize,
}

/// Ledger statistics.
#[derive(Debug, Clone)]
pub struct LedgerStats {
    pub total_marked: usize,
    pub path: Option<PathBuf>,
}

/// Set of already-processed URLs, keyed by their normalized form.
#[derive(Debug)]
pub struct DedupLedger {
    path: Option<PathBuf>,
    entries: BTreeSet<String>,
    forge_hosts: Vec<String>,
    /// Set when the last flush failed.
    dirty: bool,
}

impl DedupLedger {
    /// Open the ledger stored at `path`.
    ///
    /// A missing file is an empty ledger. So is an unreadable or corrupt
    /// one, with a warning.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = load_entries(&path);
        debug!("Loaded {} ledger entries from {}", entries.len(), path.display());
        Self {
            path: Some(path),
            entries,
            forge_hosts: default_forge_hosts(),
            dirty: false,
        }
    }

    /// A ledger that is never persisted.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: BTreeSet::new(),
            forge_hosts: default_forge_hosts(),
            dirty: false,
        }
    }

    /// Replace the hosts treated as code forges during normalization.
    pub fn with_forge_hosts(mut self, hosts: Vec<String>) -> Self {
        self.forge_hosts = hosts
            .into_iter()
            .map(|h| h.trim().to_ascii_lowercase())
            .collect();
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Normalized identifier for `url` under this ledger's forge hosts.
    pub fn normalize(&self, url: &str) -> String {
        normalize_url(url, &self.forge_hosts)
    }

    pub fn is_marked(&self, url: &str) -> bool {
        self.entries.contains(&self.normalize(url))
    }

    /// Mark one URL. Returns whether it was newly added.
    pub fn mark(&mut self, url: &str) -> bool {
        let id = self.normalize(url);
        let added = self.entries.insert(id);
        if added || self.dirty {
            self.persist();
        }
        added
    }

    /// `mark` with the flush on tokio's blocking pool.
    pub async fn mark_async(&mut self, url: &str) -> bool {
        let id = self.normalize(url);
        let added = self.entries.insert(id);
        if added || self.dirty {
            if let Err(e) = self.flush_async().await {
                warn!("Failed to write dedup ledger, keeping changes in memory: {}", e);
                self.dirty = true;
            }
        }
        added
    }

    /// Mark many URLs with a single flush. Returns how many were new.
    pub fn mark_all<I, S>(&mut self, urls: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut added = 0;
        for url in urls {
            let id = self.normalize(url.as_ref());
            if self.entries.insert(id) {
                added += 1;
            }
        }
        if added > 0 || self.dirty {
            self.persist();
        }
        added
    }

    /// The URLs not yet marked, in input order.
    pub fn unmarked<S: AsRef<str>>(&self, urls: &[S]) -> Vec<String> {
        urls.iter()
            .filter(|url| !self.is_marked(url.as_ref()))
            .map(|url| url.as_ref().to_string())
            .collect()
    }

    /// Forget every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.persist();
        info!("Cleared dedup ledger");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Marked identifiers in sorted order.
    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn stats(&self) -> LedgerStats {
        LedgerStats {
            total_marked: self.entries.len(),
            path: self.path.clone(),
        }
    }

    /// Write the sorted identifiers to `path`, one per line.
    pub fn export(&self, path: &Path) -> LedgerResult<usize> {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(entry);
            out.push('\n');
        }
        std::fs::write(path, out)?;
        Ok(self.entries.len())
    }

    /// Persist the current set.
    pub fn flush(&mut self) -> LedgerResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        write_atomic(path, &self.encode()?)?;
        self.dirty = false;
        Ok(())
    }

    async fn flush_async(&mut self) -> LedgerResult<()> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        write_atomic_async(path, self.encode()?).await?;
        self.dirty = false;
        Ok(())
    }

    fn encode(&self) -> LedgerResult<Vec<u8>> {
        let file = LedgerFile {
            scraped_urls: self.entries.iter().cloned().collect(),
            total_count: self.entries.len(),
        };
        Ok(serde_json::to_vec_pretty(&file)?)
    }

    fn persist(&mut self) {
        if let Err(e) = self.flush() {
            warn!("Failed to write dedup ledger, keeping changes in memory: {}", e);
            self.dirty = true;
        }
    }
}

fn default_forge_hosts() -> Vec<String> {
    DEFAULT_FORGE_HOSTS.iter().map(|h| h.to_string()).collect()
}

fn load_entries(path: &Path) -> BTreeSet<String> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return BTreeSet::new(),
        Err(e) => {
            warn!("Could not read dedup ledger {}: {}", path.display(), e);
            return BTreeSet::new();
        }
    };
    match serde_json::from_slice::<LedgerFile>(&bytes) {
        Ok(file) => file.scraped_urls.into_iter().collect(),
        Err(e) => {
            warn!("Dedup ledger {} is corrupt, starting empty: {}", path.display(), e);
            BTreeSet::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_mark_and_check() {
        let mut ledger = DedupLedger::in_memory();
        assert!(ledger.mark("https://github.com/Foo/Bar/tree/main"));
        assert!(!ledger.mark("https://github.com/foo/bar"));
        assert!(ledger.is_marked("http://www.github.com/foo/bar/"));
        assert!(!ledger.is_marked("https://github.com/foo/baz"));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_unmarked_preserves_order() {
        let mut ledger = DedupLedger::in_memory();
        ledger.mark("https://example.com/b");
        let urls = [
            "https://example.com/c",
            "https://example.com/b/",
            "https://example.com/a",
        ];
        assert_eq!(
            ledger.unmarked(&urls),
            vec!["https://example.com/c", "https://example.com/a"]
        );
    }

    #[test]
    fn test_persists_sorted_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.json");

        let mut ledger = DedupLedger::open(&path);
        assert_eq!(
            ledger.mark_all(["https://z.dev/", "https://a.dev/x", "https://z.dev"]),
            2
        );

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["scraped_urls"], serde_json::json!(["a.dev/x", "z.dev"]));
        assert_eq!(raw["total_count"], 2);

        let reopened = DedupLedger::open(&path);
        assert!(reopened.is_marked("https://a.dev/x"));
        assert_eq!(reopened.len(), 2);
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, b"[[[").unwrap();

        let mut ledger = DedupLedger::open(&path);
        assert!(ledger.is_empty());
        ledger.mark("https://example.com");
        assert_eq!(DedupLedger::open(&path).len(), 1);
    }

    #[test]
    fn test_write_failure_keeps_memory_state() {
        let dir = tempdir().unwrap();
        // a directory where the file should be makes every flush fail
        let path = dir.path().join("ledger.json");
        std::fs::create_dir(&path).unwrap();

        let mut ledger = DedupLedger::open(&path);
        assert!(ledger.mark("https://example.com/a"));
        assert!(ledger.is_marked("https://example.com/a"));
        assert!(ledger.flush().is_err());

        std::fs::remove_dir(&path).unwrap();
        // an unchanged mark still retries the pending flush
        assert!(!ledger.mark("https://example.com/a"));
        assert!(DedupLedger::open(&path).is_marked("https://example.com/a"));
    }

    #[tokio::test]
    async fn test_mark_async_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.json");

        let mut ledger = DedupLedger::open(&path);
        assert!(ledger.mark_async("https://github.com/Foo/Bar").await);
        assert!(!ledger.mark_async("https://github.com/foo/bar/").await);

        let reopened = DedupLedger::open(&path);
        assert_eq!(reopened.entries().collect::<Vec<_>>(), vec!["github.com/foo/bar"]);
    }

    #[test]
    fn test_clear_and_export() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let mut ledger = DedupLedger::open(&path);
        ledger.mark_all(["https://b.dev", "https://a.dev"]);

        let export = dir.path().join("urls.txt");
        assert_eq!(ledger.export(&export).unwrap(), 2);
        assert_eq!(std::fs::read_to_string(&export).unwrap(), "a.dev\nb.dev\n");

        ledger.clear();
        assert!(ledger.is_empty());
        assert!(DedupLedger::open(&path).is_empty());
        assert_eq!(ledger.stats().total_marked, 0);
    }
}
