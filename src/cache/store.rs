//! TTL cache store.

use super::dedup::RequestDeduplicator;
use crate::{Error, Result};
use regex::Regex;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

struct CacheEntry {
    data: Vec<u8>,
    created_at: Instant,
    ttl: Duration,
    approx_size: usize,
}

impl CacheEntry {
    fn new(data: Vec<u8>, ttl: Duration) -> Self {
        let approx_size = data.len();
        Self {
            data,
            created_at: Instant::now(),
            ttl,
            approx_size,
        }
    }

    /// Valid iff `now < created_at + ttl`. An invalid entry is logically
    /// absent even while it is still physically present.
    fn is_valid(&self) -> bool {
        self.created_at.elapsed() < self.ttl
    }
}

/// Configuration for [`CacheStore`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub default_ttl: Duration,
    /// Serialized values larger than this are not cached.
    pub max_entry_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            max_entry_size: 10 * 1024 * 1024,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_max_entry_size(mut self, size: usize) -> Self {
        self.max_entry_size = size;
        self
    }
}

/// Aggregate cache statistics, recomputed on demand.
///
/// Entry counts come from scanning the current contents for validity; the
/// scan has no side effects (no eviction). Counters run for the lifetime of
/// the store.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
    pub approx_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    /// Loads actually started by the deduplicator.
    pub dedup_started: u64,
    /// Calls absorbed by an existing in-flight load.
    pub deduped: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn dedup_rate(&self) -> f64 {
        let total = self.dedup_started + self.deduped;
        if total == 0 {
            0.0
        } else {
            self.deduped as f64 / total as f64
        }
    }
}

/// In-memory TTL cache keyed by canonical strings.
///
/// Values are stored serialized (`serde_json`), so one store serves every
/// view's payload type. Expiry is lazy: expired entries are removed when
/// `get` or `has` touches them, and otherwise linger until overwritten,
/// deleted, or invalidated.
///
/// A store is an explicitly constructed instance, created once at
/// application start and shared by reference; there is deliberately no
/// global singleton, so tests can build isolated stores.
pub struct CacheStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    dedup: RequestDeduplicator,
}

impl CacheStore {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            dedup: RequestDeduplicator::new(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Store `value` under `key` with the default TTL, overwriting any
    /// existing entry unconditionally.
    ///
    /// Only serialization can fail; values above `max_entry_size` are
    /// skipped silently (the cache degrades to a pass-through for them).
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.set_with_ttl(key, value, self.config.default_ttl)
    }

    pub fn set_with_ttl<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let data = serde_json::to_vec(value)?;
        self.insert_bytes(key, data, ttl);
        Ok(())
    }

    fn insert_bytes(&self, key: &str, data: Vec<u8>, ttl: Duration) {
        if data.len() > self.config.max_entry_size {
            warn!(key, size = data.len(), "value exceeds max_entry_size, not cached");
            return;
        }
        let mut entries = self.entries.write().unwrap();
        entries.insert(key.to_string(), CacheEntry::new(data, ttl));
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    /// Fetch the value under `key` if present and valid.
    ///
    /// Counts a hit or a miss on every call; an expired entry counts as a
    /// miss and is evicted on the spot. A payload that no longer decodes as
    /// `T` is treated the same way, so the broken entry cannot keep
    /// answering until its TTL runs out.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut entries = self.entries.write().unwrap();
        if let Some(entry) = entries.get(key) {
            if entry.is_valid() {
                match serde_json::from_slice(&entry.data) {
                    Ok(value) => {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        return Some(value);
                    }
                    Err(e) => {
                        warn!(key, error = %e, "cached payload failed to decode, evicting");
                    }
                }
            }
            entries.remove(key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Validity check with the same lazy eviction as [`get`](Self::get), but
    /// without touching the hit/miss counters.
    pub fn has(&self, key: &str) -> bool {
        let mut entries = self.entries.write().unwrap();
        if let Some(entry) = entries.get(key) {
            if entry.is_valid() {
                return true;
            }
            entries.remove(key);
        }
        false
    }

    /// Remove the entry unconditionally. Idempotent; returns whether an
    /// entry was actually present.
    pub fn delete(&self, key: &str) -> bool {
        let removed = self.entries.write().unwrap().remove(key).is_some();
        if removed {
            self.deletes.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Remove all entries and reset size accounting.
    ///
    /// Hit/miss/set/delete counters persist across `clear`: they describe
    /// the store's whole process lifetime, not its current contents.
    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
        debug!("cache cleared");
    }

    /// Remove every entry whose key matches `pattern`. Returns the number
    /// of entries removed.
    pub fn invalidate_pattern(&self, pattern: &Regex) -> usize {
        self.invalidate_matching(|key| pattern.is_match(key))
    }

    /// Remove every entry whose key satisfies `matches`.
    pub fn invalidate_matching<F: Fn(&str) -> bool>(&self, matches: F) -> usize {
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|key, _| !matches(key));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "invalidated cache entries");
        }
        removed
    }

    /// Current statistics. Scans entries for validity without evicting.
    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.read().unwrap();
        let total_entries = entries.len();
        let mut valid_entries = 0;
        let mut approx_bytes = 0;
        for entry in entries.values() {
            if entry.is_valid() {
                valid_entries += 1;
                approx_bytes += entry.approx_size;
            }
        }
        let dedup = self.dedup.snapshot();
        CacheStats {
            total_entries,
            valid_entries,
            expired_entries: total_entries - valid_entries,
            approx_bytes,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            dedup_started: dedup.started,
            deduped: dedup.joined,
        }
    }

    /// Return the cached value for `key`, or invoke `loader` to produce it,
    /// cache the result with the default TTL, and return it.
    ///
    /// Concurrent `preload` calls for the same key while the loader is
    /// pending share one loader invocation (see
    /// [`RequestDeduplicator`](super::RequestDeduplicator)). A loader
    /// failure propagates to every waiting caller and caches nothing, so
    /// the next call retries the loader.
    pub async fn preload<T, F, Fut>(&self, key: &str, loader: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        if let Some(value) = self.get::<T>(key) {
            return Ok(value);
        }

        let bytes = self
            .dedup
            .run(key, || async move {
                let value = loader().await?;
                let data = serde_json::to_vec(&value)?;
                self.insert_bytes(key, data.clone(), self.config.default_ttl);
                Ok(data)
            })
            .await?;

        serde_json::from_slice(&bytes).map_err(Error::from)
    }
}
