//! The devops cache.
//!
//! Memoizes expensive detection and inspection output under string card
//! keys. An entry is fresh while its TTL holds *and* none of its declared
//! filesystem inputs has a newer mtime than the high-water mark captured
//! at put time. Stale entries are served with an explicit marker rather
//! than discarded, so the UI can render "stale, rescanning" instead of a
//! blank state.
//!
//! A monotone generation counter, bumped on every invalidation, rides on
//! each read; clients echo the last generation they saw and refetch on
//! mismatch. The cache file on disk is one JSON document written via
//! temp-file + rename.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Default TTL for cards without a declared override.
pub const DEFAULT_CARD_TTL: Duration = Duration::from_secs(300);

/// One cached card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Card key, e.g. `wiz:detect` or `terraform`.
    pub card: String,
    /// Arbitrary JSON payload.
    pub value: serde_json::Value,
    /// When the value was captured.
    pub captured_at: DateTime<Utc>,
    /// Highest input mtime (unix millis) at capture time.
    pub inputs_mtime_max: Option<i64>,
    /// Filesystem inputs the value was derived from.
    #[serde(default)]
    pub inputs: Vec<PathBuf>,
}

/// A read result: deep copy of the value plus freshness metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSnapshot {
    /// Deep copy of the cached value.
    pub value: serde_json::Value,
    /// Capture timestamp.
    pub captured_at: DateTime<Utc>,
    /// Generation counter at read time.
    pub generation: u64,
    /// Entry is past its TTL or an input moved.
    pub stale: bool,
}

/// What to invalidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidate {
    /// One card.
    Card(String),
    /// Every card with this prefix.
    Prefix(String),
    /// Everything.
    All,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheDocument {
    #[serde(default)]
    entries: BTreeMap<String, CacheEntry>,
    #[serde(default)]
    generation: u64,
}

/// Card-keyed memo with TTL + input-mtime freshness.
#[derive(Debug)]
pub struct DevopsCache {
    path: PathBuf,
    ttls: BTreeMap<String, Duration>,
    inner: RwLock<CacheDocument>,
}

impl DevopsCache {
    /// Open a cache backed by `path`, loading the persisted document when
    /// present. A corrupt or unreadable file starts empty; the cache is
    /// a memo, losing it only costs recomputation.
    #[must_use]
    pub fn open(path: &Path, ttls: BTreeMap<String, Duration>) -> Self {
        let document = match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!("cache file {} is corrupt, starting empty: {e}", path.display());
                    CacheDocument::default()
                }
            },
            Err(_) => CacheDocument::default(),
        };

        Self {
            path: path.to_path_buf(),
            ttls,
            inner: RwLock::new(document),
        }
    }

    /// TTL for a card.
    #[must_use]
    pub fn ttl(&self, card: &str) -> Duration {
        self.ttls.get(card).copied().unwrap_or(DEFAULT_CARD_TTL)
    }

    /// Current generation counter.
    pub async fn generation(&self) -> u64 {
        self.inner.read().await.generation
    }

    /// Read a card. Returns `None` on a miss; otherwise a deep copy with
    /// freshness metadata. Never returns an expired entry marked fresh.
    pub async fn get(&self, card: &str) -> Option<CacheSnapshot> {
        let inner = self.inner.read().await;
        let entry = inner.entries.get(card)?;

        let age = Utc::now().signed_duration_since(entry.captured_at);
        let past_ttl = age.to_std().map_or(true, |age| age >= self.ttl(card));
        let inputs_moved = inputs_mtime_max(&entry.inputs) > entry.inputs_mtime_max;

        Some(CacheSnapshot {
            value: entry.value.clone(),
            captured_at: entry.captured_at,
            generation: inner.generation,
            stale: past_ttl || inputs_moved,
        })
    }

    /// Store a card, stat'ing the declared inputs for the mtime
    /// high-water mark, and persist asynchronously.
    pub async fn put(&self, card: &str, value: serde_json::Value, inputs: &[PathBuf]) {
        let entry = CacheEntry {
            card: card.to_string(),
            value,
            captured_at: Utc::now(),
            inputs_mtime_max: inputs_mtime_max(inputs),
            inputs: inputs.to_vec(),
        };

        {
            let mut inner = self.inner.write().await;
            inner.entries.insert(card.to_string(), entry);
        }
        self.persist().await;
    }

    /// Invalidate one card, a prefix, or everything. Bumps the generation
    /// counter and returns its new value.
    pub async fn invalidate(&self, what: &Invalidate) -> u64 {
        let generation = {
            let mut inner = self.inner.write().await;
            match what {
                Invalidate::Card(card) => {
                    inner.entries.remove(card);
                }
                Invalidate::Prefix(prefix) => {
                    inner.entries.retain(|key, _| !key.starts_with(prefix.as_str()));
                }
                Invalidate::All => inner.entries.clear(),
            }
            inner.generation += 1;
            inner.generation
        };
        debug!("cache invalidated ({what:?}), generation {generation}");
        self.persist().await;
        generation
    }

    /// Write the document atomically: temp file in the same directory,
    /// then rename. Failures are logged, never propagated; the cache
    /// stays authoritative in memory.
    async fn persist(&self) {
        let (payload, path) = {
            let inner = self.inner.read().await;
            match serde_json::to_vec_pretty(&*inner) {
                Ok(payload) => (payload, self.path.clone()),
                Err(e) => {
                    warn!("cache serialization failed: {e}");
                    return;
                }
            }
        };

        let result = tokio::task::spawn_blocking(move || write_atomic(&path, &payload)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("cache persist failed: {e}"),
            Err(e) => warn!("cache persist task failed: {e}"),
        }
    }
}

fn write_atomic(path: &Path, payload: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(payload)?;
        tmp.flush()?;
        tmp.persist(path).map_err(|e| e.error)?;
        return Ok(());
    }
    std::fs::write(path, payload)
}

/// Highest mtime over the inputs, in unix millis. Missing files are
/// skipped; an empty or fully-missing input list yields `None`.
fn inputs_mtime_max(inputs: &[PathBuf]) -> Option<i64> {
    inputs
        .iter()
        .filter_map(|p| std::fs::metadata(p).ok())
        .filter_map(|m| m.modified().ok())
        .filter_map(|t| {
            t.duration_since(std::time::UNIX_EPOCH)
                .ok()
                .map(|d| d.as_millis() as i64)
        })
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache_in(dir: &Path) -> DevopsCache {
        DevopsCache::open(&dir.join("devops_cache.json"), BTreeMap::new())
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());

        cache.put("wiz:detect", json!({"stack": "rust"}), &[]).await;
        let snapshot = cache.get("wiz:detect").await.unwrap();
        assert_eq!(snapshot.value, json!({"stack": "rust"}));
        assert!(!snapshot.stale);
    }

    #[tokio::test]
    async fn test_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        assert!(cache.get("nope").await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_card_then_get_is_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());

        cache.put("wiz:detect", json!(1), &[]).await;
        let g0 = cache.generation().await;
        let g1 = cache.invalidate(&Invalidate::Card("wiz:detect".into())).await;
        assert!(g1 > g0);
        assert!(cache.get("wiz:detect").await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());

        cache.put("wiz:detect", json!(1), &[]).await;
        cache.put("wiz:stack", json!(2), &[]).await;
        cache.put("terraform", json!(3), &[]).await;

        cache.invalidate(&Invalidate::Prefix("wiz:".into())).await;
        assert!(cache.get("wiz:detect").await.is_none());
        assert!(cache.get("wiz:stack").await.is_none());
        assert!(cache.get("terraform").await.is_some());
    }

    #[tokio::test]
    async fn test_ttl_staleness_marker() {
        let dir = tempfile::tempdir().unwrap();
        let ttls = BTreeMap::from([("fast".to_string(), Duration::from_millis(10))]);
        let cache = DevopsCache::open(&dir.path().join("c.json"), ttls);

        cache.put("fast", json!(1), &[]).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Served, but marked stale: never hidden, never fresh-marked.
        let snapshot = cache.get("fast").await.unwrap();
        assert!(snapshot.stale);
        assert_eq!(snapshot.value, json!(1));
    }

    #[tokio::test]
    async fn test_input_mtime_invalidates() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());

        let input = dir.path().join("Dockerfile");
        std::fs::write(&input, "FROM debian:12").unwrap();

        cache.put("docker", json!({"base": "debian"}), &[input.clone()]).await;
        assert!(!cache.get("docker").await.unwrap().stale);

        // Touch the input with a clearly newer mtime.
        tokio::time::sleep(Duration::from_millis(1100)).await;
        std::fs::write(&input, "FROM debian:13").unwrap();

        assert!(cache.get("docker").await.unwrap().stale);
    }

    #[tokio::test]
    async fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devops_cache.json");

        {
            let cache = DevopsCache::open(&path, BTreeMap::new());
            cache.put("k8s", json!({"ok": true}), &[]).await;
            cache.invalidate(&Invalidate::Card("absent".into())).await;
        }

        let reopened = DevopsCache::open(&path, BTreeMap::new());
        let snapshot = reopened.get("k8s").await.unwrap();
        assert_eq!(snapshot.value, json!({"ok": true}));
        assert_eq!(reopened.generation().await, 1);
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devops_cache.json");
        std::fs::write(&path, "{not json").unwrap();

        let cache = DevopsCache::open(&path, BTreeMap::new());
        assert!(cache.get("anything").await.is_none());
    }

    #[tokio::test]
    async fn test_generation_monotone_across_invalidations() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        let g1 = cache.invalidate(&Invalidate::All).await;
        let g2 = cache.invalidate(&Invalidate::All).await;
        let g3 = cache.invalidate(&Invalidate::Card("x".into())).await;
        assert!(g1 < g2 && g2 < g3);
    }
}
