//! TTL response cache for remote API outcomes.
//!
//! [`ResponseCache`] stores the outcome of a remote method call (a decoded
//! success value or a typed [`RemoteError`]) under a canonical
//! [`CacheKey`]. Each entry carries its own expiry, computed from the
//! response's [`CacheDirectives`] at insertion time.
//!
//! # Expiry
//!
//! Expiry is lazy: a lookup that finds an expired entry removes it, counts
//! it as *stale* and reports a miss to the caller. [`ResponseCache::sweep`]
//! removes expired entries eagerly and only exists to bound memory; it is
//! never needed for correctness.
//!
//! # Concurrency
//!
//! The entry map and counters sit behind one `std::sync::Mutex`, held only
//! for the map operation itself. Nothing in this module awaits while holding
//! the lock, and snapshot serialization happens on a cloned entry set.
//! Concurrent `set` calls on one key are last-writer-wins.
//!
//! # Snapshots
//!
//! [`ResponseCache::snapshot`] serializes every entry (expired or not,
//! errors included) as versioned JSON. [`ResponseCache::restore`] decodes
//! the whole snapshot before touching the live map and then swaps it in, so
//! a corrupt snapshot leaves the cache exactly as it was.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CacheDirectives, CacheKey, Params};
use crate::error::RemoteError;
use crate::telemetry;
use crate::{HuginnError, Result};

/// Snapshot format version written by [`ResponseCache::snapshot`].
const SNAPSHOT_VERSION: u32 = 1;

/// A cached remote outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CachedOutcome<V> {
    Success(V),
    Failure(RemoteError),
}

impl<V> CachedOutcome<V> {
    pub fn into_result(self) -> std::result::Result<V, RemoteError> {
        match self {
            CachedOutcome::Success(v) => Ok(v),
            CachedOutcome::Failure(e) => Err(e),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, CachedOutcome::Failure(_))
    }
}

impl<V> From<std::result::Result<V, RemoteError>> for CachedOutcome<V> {
    fn from(result: std::result::Result<V, RemoteError>) -> Self {
        match result {
            Ok(v) => CachedOutcome::Success(v),
            Err(e) => CachedOutcome::Failure(e),
        }
    }
}

/// Lookup counters. Monotonic until [`ResponseCache::reset_stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stale: u64,
}

impl CacheStats {
    /// `hits / (hits + misses [+ stale])`, or 0.0 before any lookup.
    pub fn hit_rate(&self, with_stale: bool) -> f64 {
        let mut total = self.hits + self.misses;
        if with_stale {
            total += self.stale;
        }
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    outcome: CachedOutcome<V>,
    expires_at: SystemTime,
}

#[derive(Serialize, Deserialize)]
struct Snapshot<V> {
    version: u32,
    entries: Vec<SnapshotEntry<V>>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotEntry<V> {
    key: CacheKey,
    expires_at: SystemTime,
    outcome: CachedOutcome<V>,
}

struct Inner<V> {
    entries: HashMap<CacheKey, CacheEntry<V>>,
    stats: CacheStats,
}

/// In-memory TTL cache of remote outcomes.
///
/// Callers only ever receive clones of stored values; the entry map is
/// never exposed. Share it between tasks with an `Arc`.
pub struct ResponseCache<V> {
    inner: Mutex<Inner<V>>,
}

impl<V: Clone> ResponseCache<V> {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                stats: CacheStats::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a cached outcome.
    ///
    /// Returns `None` on a miss. An expired entry is evicted, counted as
    /// stale and reported as a miss. Exactly one counter is bumped per call.
    pub fn get(&self, method: &str, params: &Params) -> Option<CachedOutcome<V>> {
        self.get_at(&CacheKey::new(method, params), method, SystemTime::now())
    }

    fn get_at(&self, key: &CacheKey, method: &str, now: SystemTime) -> Option<CachedOutcome<V>> {
        let mut inner = self.lock();
        match inner.entries.get(key).map(|e| e.expires_at <= now) {
            None => {
                inner.stats.misses += 1;
                drop(inner);
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "method" => method.to_owned())
                    .increment(1);
                None
            }
            Some(true) => {
                inner.entries.remove(key);
                inner.stats.stale += 1;
                drop(inner);
                debug!(key = %key, "evicted stale cache entry");
                metrics::counter!(telemetry::CACHE_STALE_TOTAL, "method" => method.to_owned())
                    .increment(1);
                None
            }
            Some(false) => {
                inner.stats.hits += 1;
                let outcome = inner.entries.get(key).map(|e| e.outcome.clone());
                drop(inner);
                metrics::counter!(telemetry::CACHE_HITS_TOTAL, "method" => method.to_owned())
                    .increment(1);
                outcome
            }
        }
    }

    /// Store an outcome according to `directives`.
    ///
    /// Returns whether anything was stored: `no-cache`, or directives that
    /// give no future expiry, make this a no-op.
    pub fn set(
        &self,
        method: &str,
        params: &Params,
        outcome: CachedOutcome<V>,
        directives: &CacheDirectives,
    ) -> bool {
        let now = SystemTime::now();
        let Some(expires_at) = directives.expiry(now) else {
            debug!(method, "response not cacheable");
            return false;
        };
        let key = CacheKey::new(method, params);
        self.lock().entries.insert(key, CacheEntry { outcome, expires_at });
        true
    }

    /// Drop every entry. Counters are left alone.
    pub fn purge(&self) {
        self.lock().entries.clear();
    }

    /// Remove all expired entries, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let now = SystemTime::now();
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - inner.entries.len();
        drop(inner);
        if removed > 0 {
            metrics::counter!(telemetry::CACHE_SWEPT_TOTAL).increment(removed as u64);
        }
        removed
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }

    pub fn reset_stats(&self) {
        self.lock().stats = CacheStats::default();
    }

    pub fn hit_rate(&self, with_stale: bool) -> f64 {
        self.stats().hit_rate(with_stale)
    }
}

impl<V: Clone> Default for ResponseCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> ResponseCache<V>
where
    V: Clone + Serialize + DeserializeOwned,
{
    /// Serialize the full entry set.
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        let entries: Vec<SnapshotEntry<V>> = self
            .lock()
            .entries
            .iter()
            .map(|(key, entry)| SnapshotEntry {
                key: key.clone(),
                expires_at: entry.expires_at,
                outcome: entry.outcome.clone(),
            })
            .collect();

        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            entries,
        };
        serde_json::to_vec(&snapshot)
            .map_err(|e| HuginnError::Serialization(format!("failed to encode cache snapshot: {e}")))
    }

    /// Replace the entry set with the contents of a snapshot.
    ///
    /// On error the existing entries are untouched. Counters are not part of
    /// a snapshot and are kept as they are. Returns the restored entry count.
    pub fn restore(&self, bytes: &[u8]) -> Result<usize> {
        let snapshot: Snapshot<V> = serde_json::from_slice(bytes)
            .map_err(|e| HuginnError::Serialization(format!("failed to decode cache snapshot: {e}")))?;
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(HuginnError::Serialization(format!(
                "unsupported cache snapshot version {} (max supported: {SNAPSHOT_VERSION})",
                snapshot.version
            )));
        }

        let entries: HashMap<CacheKey, CacheEntry<V>> = snapshot
            .entries
            .into_iter()
            .map(|e| {
                let entry = CacheEntry {
                    outcome: e.outcome,
                    expires_at: e.expires_at,
                };
                (e.key, entry)
            })
            .collect();
        let count = entries.len();
        self.lock().entries = entries;
        Ok(count)
    }
}

impl<V> ResponseCache<V>
where
    V: Clone + Send + 'static,
{
    /// Spawn a task that sweeps this cache every `every`.
    ///
    /// The task holds only a weak reference and exits once the cache is
    /// dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let cache = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let removed = cache.sweep();
                if removed > 0 {
                    debug!(removed, remaining = cache.len(), "swept expired cache entries");
                }
            }
        })
    }
}
