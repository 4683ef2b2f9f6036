//! Memory-bounded LRU cache with a best-effort disk mirror.
//!
//! ## Architecture
//!
//! ```text
//!   ┌──────────────────────────── Mutex<CacheState<V>> ─────────────────────┐
//!   │                                                                       │
//!   │  entries: FxHashMap<String, Entry<V>>      order: RecencyList<String> │
//!   │  ┌────────┬─────────────────────────┐      MRU                   LRU  │
//!   │  │ "AAPL" │ Arc<V>, size, node ─────┼────► [AAPL] ◄─► [MSFT] ◄─► ... │
//!   │  └────────┴─────────────────────────┘                                 │
//!   │  memory = Σ entry.size  <=  max_memory                                │
//!   └───────────────────────────────────────────────────────────────────────┘
//!                │ put: begin_write(key) -> seq (under the lock)
//!                ▼
//!   TaskScheduler worker (or caller thread) ──► DiskMirror::persist(key, seq)
//! ```
//!
//! ## Semantics
//!
//! - `get` counts every call as a request and only hits as hits; a hit moves
//!   the key to the MRU position.
//! - `put` charges [`CacheValue::estimated_size`] against the budget, evicting
//!   from the LRU end until the value fits. A value larger than the whole
//!   budget is not stored ([`PutOutcome::Rejected`]).
//! - Eviction only drops the in-memory copy. The mirror file stays behind and
//!   can be brought back with [`preload_from_disk`](LruDiskCache::preload_from_disk).
//! - `remove`, `clear` and expiry delete mirror files as well.
//! - Mirror writes are asynchronous when a scheduler is attached. They lag
//!   the in-memory state but never resurrect removed keys (see
//!   [`disk`](super::disk)). Disk failures are logged, never returned from
//!   cache operations.
//!
//! ## Example
//!
//! ```
//! use quantcore::cache::LruDiskCache;
//! use quantcore::series::TimeSeries;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let cache: LruDiskCache = LruDiskCache::open(1024 * 1024, dir.path()).unwrap();
//!
//! assert!(cache.put("AAPL", TimeSeries::new("AAPL")).is_stored());
//! assert_eq!(cache.get("AAPL").unwrap().symbol(), "AAPL");
//! assert!(cache.get("MSFT").is_none());
//! assert_eq!(cache.hit_rate(), 0.5);
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::builder::CacheBuilder;
use crate::cache::disk::{CacheMetadata, DiskMirror};
use crate::config::CacheConfig;
use crate::ds::recency_list::{NodeId, RecencyList};
use crate::error::PersistError;
use crate::metrics::CacheStats;
use crate::runtime::TaskScheduler;
use crate::series::TimeSeries;
use crate::traits::CacheValue;

/// Result of [`LruDiskCache::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// New key stored.
    Inserted { evicted: usize },
    /// Existing key overwritten.
    Replaced { evicted: usize },
    /// Value exceeds the whole budget; nothing stored.
    Rejected { evicted: usize },
}

impl PutOutcome {
    /// `true` unless the value was rejected.
    pub fn is_stored(&self) -> bool {
        !matches!(self, PutOutcome::Rejected { .. })
    }

    /// Entries evicted to make room.
    pub fn evicted(&self) -> usize {
        match *self {
            PutOutcome::Inserted { evicted }
            | PutOutcome::Replaced { evicted }
            | PutOutcome::Rejected { evicted } => evicted,
        }
    }
}

/// Read-only view of one resident entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryInfo {
    pub size_bytes: usize,
    /// Time since the entry was stored.
    pub age: Duration,
    /// Time since the last `get` or `put` of the key.
    pub idle: Duration,
}

#[derive(Debug)]
struct Entry<V> {
    value: Arc<V>,
    size: usize,
    created_at: Instant,
    last_accessed_at: Instant,
    node: NodeId,
}

#[derive(Debug, Default)]
struct Counters {
    requests: u64,
    hits: u64,
    inserts: u64,
    replacements: u64,
    rejections: u64,
    evictions: u64,
    removals: u64,
    expirations: u64,
}

#[derive(Debug)]
struct CacheState<V> {
    entries: FxHashMap<String, Entry<V>>,
    order: RecencyList<String>,
    memory: usize,
    counters: Counters,
}

impl<V> CacheState<V> {
    fn evict_lru(&mut self) -> bool {
        let Some(victim) = self.order.pop_back() else {
            return false;
        };
        if let Some(entry) = self.entries.remove(&victim) {
            self.memory -= entry.size;
            self.counters.evictions += 1;
            tracing::debug!(key = %victim, bytes = entry.size, "evicted cache entry");
        }
        true
    }

    fn take(&mut self, key: &str) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(entry.node);
        self.memory -= entry.size;
        Some(entry)
    }
}

/// String-keyed LRU cache bounded by an estimated byte budget, mirrored to a
/// directory of JSON files.
pub struct LruDiskCache<V: CacheValue = TimeSeries> {
    state: Mutex<CacheState<V>>,
    mirror: Arc<DiskMirror>,
    scheduler: Option<Arc<TaskScheduler>>,
    async_persistence: bool,
    max_memory: usize,
}

impl<V: CacheValue> LruDiskCache<V> {
    /// Opens a cache over `dir` with a budget of `max_memory_bytes`.
    ///
    /// Creates the directory if needed and restores the request counters from
    /// `metadata.json`. Mirror files are not loaded; see
    /// [`preload_from_disk`](Self::preload_from_disk).
    pub fn open(max_memory_bytes: usize, dir: impl Into<PathBuf>) -> Result<Self, PersistError> {
        CacheBuilder::new(max_memory_bytes).cache_dir(dir).build()
    }

    /// Opens a cache as described by `config`.
    pub fn from_config(config: &CacheConfig) -> Result<Self, PersistError> {
        CacheBuilder::from_config(config).build()
    }

    pub(crate) fn from_parts(
        max_memory: usize,
        mirror: DiskMirror,
        scheduler: Option<Arc<TaskScheduler>>,
        async_persistence: bool,
    ) -> Self {
        let mut counters = Counters::default();
        match mirror.load_metadata() {
            Ok(Some(meta)) => {
                counters.requests = meta.total_requests;
                counters.hits = meta.cache_hits;
            },
            Ok(None) => {},
            Err(err) => {
                tracing::warn!(dir = %mirror.dir().display(), error = %err, "ignoring unreadable cache metadata");
            },
        }
        tracing::debug!(
            dir = %mirror.dir().display(),
            max_memory,
            requests = counters.requests,
            "opened disk cache"
        );
        Self {
            state: Mutex::new(CacheState {
                entries: FxHashMap::default(),
                order: RecencyList::new(),
                memory: 0,
                counters,
            }),
            mirror: Arc::new(mirror),
            scheduler,
            async_persistence,
            max_memory,
        }
    }

    /// Routes mirror writes through `scheduler`.
    pub fn with_scheduler(mut self, scheduler: Arc<TaskScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self.async_persistence = true;
        self
    }

    /// Directory holding the mirror files.
    pub fn dir(&self) -> &Path {
        self.mirror.dir()
    }

    /// Returns the value for `key` and marks it most recently used.
    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        let mut state = self.state.lock();
        state.counters.requests += 1;
        let entry = state.entries.get_mut(key)?;
        entry.last_accessed_at = Instant::now();
        let value = Arc::clone(&entry.value);
        let node = entry.node;
        state.order.move_to_front(node);
        state.counters.hits += 1;
        Some(value)
    }

    /// Stores `value` under `key`, evicting LRU entries as needed, and
    /// schedules the mirror write.
    pub fn put(&self, key: impl Into<String>, value: V) -> PutOutcome {
        self.put_arc(key, Arc::new(value))
    }

    /// [`put`](Self::put) for a value that is already shared.
    pub fn put_arc(&self, key: impl Into<String>, value: Arc<V>) -> PutOutcome {
        let key = key.into();
        let (outcome, seq) = {
            let mut state = self.state.lock();
            let outcome = self.insert_locked(&mut state, &key, Arc::clone(&value));
            // Issued under the cache lock so the order of sequence numbers
            // matches the order of puts, removes and clears.
            let seq = outcome.is_stored().then(|| self.mirror.begin_write(&key));
            (outcome, seq)
        };
        if let Some(seq) = seq {
            self.schedule_write(key, seq, value);
        }
        outcome
    }

    fn insert_locked(&self, state: &mut CacheState<V>, key: &str, value: Arc<V>) -> PutOutcome {
        let size = value.estimated_size();
        let replaced = state.take(key).is_some();

        let mut evicted = 0;
        while state.memory + size > self.max_memory && state.evict_lru() {
            evicted += 1;
        }
        if state.memory + size > self.max_memory {
            state.counters.rejections += 1;
            tracing::debug!(key, bytes = size, budget = self.max_memory, "value exceeds cache budget");
            return PutOutcome::Rejected { evicted };
        }

        let now = Instant::now();
        let node = state.order.push_front(key.to_string());
        state.entries.insert(
            key.to_string(),
            Entry {
                value,
                size,
                created_at: now,
                last_accessed_at: now,
                node,
            },
        );
        state.memory += size;
        if replaced {
            state.counters.replacements += 1;
            PutOutcome::Replaced { evicted }
        } else {
            state.counters.inserts += 1;
            PutOutcome::Inserted { evicted }
        }
    }

    fn schedule_write(&self, key: String, seq: u64, value: Arc<V>) {
        if self.async_persistence {
            if let Some(scheduler) = &self.scheduler {
                let mirror = Arc::clone(&self.mirror);
                let job_key = key.clone();
                let job_value = Arc::clone(&value);
                match scheduler.submit(move || persist_logged(&mirror, &job_key, seq, &*job_value)) {
                    Ok(_) => return,
                    Err(err) => {
                        tracing::debug!(key = %key, error = %err, "persisting synchronously");
                    },
                }
            }
        }
        persist_logged(&self.mirror, &key, seq, &*value);
    }

    /// Removes `key` from memory and deletes its mirror file.
    ///
    /// Returns `true` if either existed.
    pub fn remove(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        let resident = state.take(key).is_some();
        if resident {
            state.counters.removals += 1;
        }
        let deleted = match self.mirror.remove(key) {
            Ok(deleted) => deleted,
            Err(err) => {
                tracing::warn!(key, error = %err, "failed to delete cache file");
                false
            },
        };
        resident || deleted
    }

    /// Empties the cache and deletes every mirror file.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.order.clear();
        state.memory = 0;
        if let Err(err) = self.mirror.clear() {
            tracing::warn!(dir = %self.mirror.dir().display(), error = %err, "failed to clear cache files");
        }
    }

    /// Whether `key` is resident in memory. Does not affect recency or counters.
    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Sum of the recorded sizes of resident entries.
    pub fn memory_usage(&self) -> usize {
        self.state.lock().memory
    }

    pub fn memory_budget(&self) -> usize {
        self.max_memory
    }

    /// `hits / requests` over the cache lifetime, `0.0` with no requests.
    pub fn hit_rate(&self) -> f64 {
        let state = self.state.lock();
        if state.counters.requests == 0 {
            0.0
        } else {
            state.counters.hits as f64 / state.counters.requests as f64
        }
    }

    /// Size and timing of a resident entry, without touching recency.
    pub fn entry_info(&self, key: &str) -> Option<EntryInfo> {
        let state = self.state.lock();
        let entry = state.entries.get(key)?;
        let now = Instant::now();
        Some(EntryInfo {
            size_bytes: entry.size,
            age: now.saturating_duration_since(entry.created_at),
            idle: now.saturating_duration_since(entry.last_accessed_at),
        })
    }

    /// Resident keys, most recently used first.
    pub fn keys_by_recency(&self) -> Vec<String> {
        self.state.lock().order.iter().cloned().collect()
    }

    /// Removes entries stored more than `max_age` ago, with their files.
    ///
    /// Returns the number of entries removed.
    pub fn cleanup_expired_entries(&self, max_age: Duration) -> usize {
        let mut state = self.state.lock();
        let now = Instant::now();
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.created_at) > max_age)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            state.take(key);
            if let Err(err) = self.mirror.remove(key) {
                tracing::warn!(key = %key, error = %err, "failed to delete expired cache file");
            }
        }
        state.counters.expirations += expired.len() as u64;
        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "expired cache entries");
        }
        expired.len()
    }

    /// Loads every mirror file whose key is not resident, through the normal
    /// budget and eviction path, without writing the files back.
    ///
    /// Unreadable files are logged and skipped. Returns the number of entries
    /// stored.
    pub fn preload_from_disk(&self) -> usize {
        let files = match self.mirror.entries() {
            Ok(files) => files,
            Err(err) => {
                tracing::warn!(dir = %self.mirror.dir().display(), error = %err, "failed to list cache files");
                return 0;
            },
        };

        let mut loaded = 0;
        for (key, path) in files {
            if self.contains(&key) {
                continue;
            }
            let value: V = match self.mirror.load_path(&path) {
                Ok(value) => value,
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "failed to preload cache entry");
                    continue;
                },
            };
            let mut state = self.state.lock();
            if state.entries.contains_key(&key) {
                continue;
            }
            if self.insert_locked(&mut state, &key, Arc::new(value)).is_stored() {
                loaded += 1;
            }
        }
        tracing::debug!(loaded, "preloaded cache from disk");
        loaded
    }

    /// Snapshot of counters and gauges.
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let c = &state.counters;
        CacheStats {
            requests: c.requests,
            hits: c.hits,
            misses: c.requests.saturating_sub(c.hits),
            inserts: c.inserts,
            replacements: c.replacements,
            rejections: c.rejections,
            evictions: c.evictions,
            removals: c.removals,
            expirations: c.expirations,
            entries: state.entries.len(),
            memory_bytes: state.memory,
            budget_bytes: self.max_memory,
        }
    }

    /// Writes the request counters to `metadata.json`. Also done on drop.
    pub fn flush_metadata(&self) -> Result<(), PersistError> {
        let metadata = {
            let state = self.state.lock();
            CacheMetadata {
                total_requests: state.counters.requests,
                cache_hits: state.counters.hits,
            }
        };
        self.mirror.save_metadata(&metadata)
    }

    #[cfg(any(test, debug_assertions))]
    /// Checks that memory accounting and recency order agree with the entries.
    pub fn debug_validate_invariants(&self) {
        let state = self.state.lock();
        state.order.debug_validate_invariants();
        assert_eq!(state.order.len(), state.entries.len());
        let total: usize = state.entries.values().map(|e| e.size).sum();
        assert_eq!(total, state.memory);
        assert!(state.memory <= self.max_memory);
        for (key, entry) in &state.entries {
            assert_eq!(state.order.get(entry.node), Some(key));
        }
    }
}

fn persist_logged<V: CacheValue>(mirror: &DiskMirror, key: &str, seq: u64, value: &V) {
    if let Err(err) = mirror.persist(key, seq, value) {
        tracing::warn!(key, error = %err, "failed to persist cache entry");
    }
}

impl<V: CacheValue> Drop for LruDiskCache<V> {
    fn drop(&mut self) {
        if let Err(err) = self.flush_metadata() {
            tracing::warn!(dir = %self.mirror.dir().display(), error = %err, "failed to save cache metadata");
        }
    }
}

impl<V: CacheValue> std::fmt::Debug for LruDiskCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LruDiskCache")
            .field("dir", &self.mirror.dir())
            .field("entries", &state.entries.len())
            .field("memory", &state.memory)
            .field("max_memory", &self.max_memory)
            .field("async_persistence", &(self.async_persistence && self.scheduler.is_some()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::Bar;
    use chrono::{TimeZone, Utc};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::fs;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn series(symbol: &str, bars: usize) -> TimeSeries {
        let mut s = TimeSeries::with_capacity(symbol, bars);
        for i in 0..bars {
            let ts = Utc.timestamp_opt(1_700_000_000 + i as i64 * 60, 0).unwrap();
            s.push(Bar::new(ts, 10.0, 11.0, 9.0, 10.5, 100));
        }
        s
    }

    fn open(dir: &Path, budget: usize) -> LruDiskCache {
        LruDiskCache::open(budget, dir).unwrap()
    }

    // ==============================================
    // Basic operations
    // ==============================================

    #[test]
    fn put_get_and_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), 1 << 20);

        assert_eq!(cache.put("AAPL", series("AAPL", 3)), PutOutcome::Inserted { evicted: 0 });
        assert_eq!(cache.get("AAPL").unwrap().len(), 3);
        assert!(cache.get("MSFT").is_none());
        assert_eq!(cache.hit_rate(), 0.5);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("AAPL"));
        cache.debug_validate_invariants();
    }

    #[test]
    fn hit_rate_is_zero_without_requests() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), 1 << 20);
        assert_eq!(cache.hit_rate(), 0.0);
    }

    #[test]
    fn replace_updates_value_and_memory() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), 1 << 20);
        cache.put("AAPL", series("AAPL", 1));
        let outcome = cache.put("AAPL", series("AAPL", 10));
        assert_eq!(outcome, PutOutcome::Replaced { evicted: 0 });
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.memory_usage(), series("AAPL", 10).estimated_size());
        assert_eq!(cache.get("AAPL").unwrap().len(), 10);
        cache.debug_validate_invariants();
    }

    // ==============================================
    // Eviction
    // ==============================================

    #[test]
    fn lru_entry_is_evicted_first() {
        let dir = tempfile::tempdir().unwrap();
        let one = series("A", 5).estimated_size();
        let cache = open(dir.path(), 2 * one);

        cache.put("A", series("A", 5));
        cache.put("B", series("B", 5));
        assert!(cache.get("A").is_some());

        let outcome = cache.put("C", series("C", 5));
        assert_eq!(outcome, PutOutcome::Inserted { evicted: 1 });
        assert!(cache.contains("A"));
        assert!(!cache.contains("B"));
        assert!(cache.contains("C"));
        assert_eq!(cache.keys_by_recency(), vec!["C", "A"]);
        assert!(cache.memory_usage() <= cache.memory_budget());
        cache.debug_validate_invariants();
    }

    #[test]
    fn oversized_value_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), 1_000);
        cache.put("small", TimeSeries::new("s"));
        let outcome = cache.put("big", series("BIG", 1_000));
        assert_eq!(outcome, PutOutcome::Rejected { evicted: 1 });
        assert!(!outcome.is_stored());
        assert!(cache.is_empty());
        assert_eq!(cache.memory_usage(), 0);
        assert!(!cache.dir().join("big.cache").exists());
        assert_eq!(cache.stats().rejections, 1);
    }

    #[test]
    fn eviction_keeps_mirror_file() {
        let dir = tempfile::tempdir().unwrap();
        let one = series("A", 2).estimated_size();
        let cache = open(dir.path(), one);
        cache.put("A", series("A", 2));
        cache.put("B", series("B", 2));
        assert!(!cache.contains("A"));
        assert!(dir.path().join("A.cache").exists());
    }

    // ==============================================
    // Removal, clear, expiry
    // ==============================================

    #[test]
    fn remove_deletes_entry_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), 1 << 20);
        cache.put("AAPL", series("AAPL", 2));
        assert!(dir.path().join("AAPL.cache").exists());

        assert!(cache.remove("AAPL"));
        assert!(!cache.contains("AAPL"));
        assert!(!dir.path().join("AAPL.cache").exists());
        assert_eq!(cache.memory_usage(), 0);
        assert!(!cache.remove("AAPL"));
    }

    #[test]
    fn clear_removes_cache_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), 1 << 20);
        cache.put("A", series("A", 1));
        cache.put("B", series("B", 1));
        fs::write(dir.path().join("notes.txt"), "keep").unwrap();

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.memory_usage(), 0);
        assert!(!dir.path().join("A.cache").exists());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn cleanup_removes_only_old_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), 1 << 20);
        cache.put("old", series("old", 1));
        std::thread::sleep(Duration::from_millis(200));
        cache.put("new", series("new", 1));

        assert_eq!(cache.cleanup_expired_entries(Duration::from_secs(3600)), 0);
        assert_eq!(cache.cleanup_expired_entries(Duration::from_millis(100)), 1);
        assert!(!cache.contains("old"));
        assert!(cache.contains("new"));
        assert!(!dir.path().join("old.cache").exists());
        assert_eq!(cache.stats().expirations, 1);
        cache.debug_validate_invariants();
    }

    // ==============================================
    // Persistence
    // ==============================================

    #[test]
    fn mirror_file_matches_json_layout() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), 1 << 20);
        cache.put("AAPL", series("AAPL", 2));

        let raw = fs::read_to_string(dir.path().join("AAPL.cache")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["symbol"], "AAPL");
        assert_eq!(json["data"].as_array().unwrap().len(), 2);
        assert_eq!(json["data"][1]["timestamp"], 1_700_000_060);
    }

    #[test]
    fn preload_restores_entries_without_rewriting() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = open(dir.path(), 1 << 20);
            cache.put("AAPL", series("AAPL", 3));
            cache.put("BRK/B", series("BRK/B", 1));
        }
        fs::write(dir.path().join("broken.cache"), "not json").unwrap();

        let cache = open(dir.path(), 1 << 20);
        assert!(cache.is_empty());
        assert_eq!(cache.preload_from_disk(), 2);
        assert_eq!(cache.get("AAPL").unwrap().len(), 3);
        assert_eq!(cache.get("BRK/B").unwrap().symbol(), "BRK/B");
        assert_eq!(cache.preload_from_disk(), 0);
        cache.debug_validate_invariants();
    }

    #[test]
    fn preload_respects_budget() {
        let dir = tempfile::tempdir().unwrap();
        let one = series("A", 4).estimated_size();
        {
            let cache = open(dir.path(), 10 * one);
            for key in ["A", "B", "C"] {
                cache.put(key, series(key, 4));
            }
        }
        let cache = open(dir.path(), 2 * one);
        cache.preload_from_disk();
        assert_eq!(cache.len(), 2);
        assert!(cache.memory_usage() <= cache.memory_budget());
    }

    #[test]
    fn metadata_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = open(dir.path(), 1 << 20);
            cache.put("A", series("A", 1));
            cache.get("A");
            cache.get("missing");
        }
        let cache = open(dir.path(), 1 << 20);
        let stats = cache.stats();
        assert_eq!(stats.requests, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn corrupt_metadata_resets_counters() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("metadata.json"), "{").unwrap();
        let cache = open(dir.path(), 1 << 20);
        assert_eq!(cache.stats().requests, 0);
    }

    #[test]
    fn async_writes_land_through_scheduler() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Arc::new(TaskScheduler::new(2).unwrap());
        let cache = open(dir.path(), 1 << 20).with_scheduler(Arc::clone(&scheduler));

        for i in 0..20 {
            cache.put(format!("K{i}"), series("K", i + 1));
        }
        cache.put("K0", series("K", 42));
        scheduler.wait_all();

        for i in 1..20 {
            assert!(dir.path().join(format!("K{i}.cache")).exists());
        }
        let latest: TimeSeries = serde_json::from_str(
            &fs::read_to_string(dir.path().join("K0.cache")).unwrap(),
        )
        .unwrap();
        assert_eq!(latest.len(), 42);
    }

    /// Encoding blocks until the gate opens (or a safety timeout passes).
    struct Gate {
        open: Mutex<bool>,
        opened: parking_lot::Condvar,
        entered: AtomicBool,
    }

    impl Gate {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                open: Mutex::new(false),
                opened: parking_lot::Condvar::new(),
                entered: AtomicBool::new(false),
            })
        }

        fn release(&self) {
            *self.open.lock() = true;
            self.opened.notify_all();
        }
    }

    struct GatedValue {
        label: String,
        gate: Option<Arc<Gate>>,
    }

    impl Serialize for GatedValue {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            if let Some(gate) = &self.gate {
                gate.entered.store(true, Ordering::SeqCst);
                let mut open = gate.open.lock();
                let deadline = Instant::now() + Duration::from_secs(5);
                while !*open && Instant::now() < deadline {
                    gate.opened.wait_until(&mut open, deadline);
                }
            }
            self.label.serialize(serializer)
        }
    }

    impl<'de> Deserialize<'de> for GatedValue {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            Ok(Self {
                label: String::deserialize(deserializer)?,
                gate: None,
            })
        }
    }

    impl CacheValue for GatedValue {
        fn estimated_size(&self) -> usize {
            self.label.len() + 1
        }
    }

    #[test]
    fn slow_write_does_not_block_other_puts() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Arc::new(TaskScheduler::new(2).unwrap());
        let cache: LruDiskCache<GatedValue> = CacheBuilder::new(1 << 20)
            .cache_dir(dir.path())
            .scheduler(Arc::clone(&scheduler))
            .build()
            .unwrap();

        let gate = Gate::new();
        cache.put(
            "A",
            GatedValue {
                label: "A".into(),
                gate: Some(Arc::clone(&gate)),
            },
        );
        while !gate.entered.load(Ordering::SeqCst) {
            std::thread::yield_now();
        }

        let start = Instant::now();
        cache.put(
            "B",
            GatedValue {
                label: "B".into(),
                gate: None,
            },
        );
        assert_eq!(cache.get("B").unwrap().label, "B");
        assert!(cache.contains("A"));
        let elapsed = start.elapsed();
        gate.release();
        assert!(elapsed < Duration::from_secs(2), "put waited on another key's write: {elapsed:?}");

        scheduler.wait_all();
        assert!(dir.path().join("A.cache").exists());
        assert!(dir.path().join("B.cache").exists());
    }

    #[test]
    fn stopped_scheduler_falls_back_to_sync_writes() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Arc::new(TaskScheduler::new(1).unwrap());
        scheduler.shutdown();
        let cache = open(dir.path(), 1 << 20).with_scheduler(scheduler);
        cache.put("A", series("A", 1));
        assert!(dir.path().join("A.cache").exists());
    }

    #[test]
    fn entry_info_does_not_touch_recency() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), 1 << 20);
        cache.put("A", series("A", 1));
        cache.put("B", series("B", 1));
        let info = cache.entry_info("A").unwrap();
        assert_eq!(info.size_bytes, series("A", 1).estimated_size());
        assert_eq!(cache.keys_by_recency(), vec!["B", "A"]);
        assert!(cache.entry_info("C").is_none());
    }
}
