//! Sharded cache store
//!
//! The top-level concurrent map from [`CompositeKey`] to per-series cache
//! entries. The store is split into a fixed number of shards, each guarded
//! by its own reader/writer lock; the shard for a key is a deterministic
//! function of the *series* portion only, so all fields of one series land
//! in the same shard and per-series operations touch one lock.
//!
//! This is the opposite shard-selection policy from the buffer pool, where
//! any shard will do and placement is chosen for load balancing.
//!
//! Each shard owns a two-level map (series, then field), a live-series
//! count, and an ordered index of series keys for sorted enumeration.
//! Cross-shard reads (`len`, `iter`, `series_keys`) are eventually
//! consistent snapshots: no lock ever spans two shards, so concurrent
//! writers may change shards the walk has already released.
//!
//! # Example
//!
//! ```rust
//! use kuba_writecache::config::StoreConfig;
//! use kuba_writecache::entry::{Sample, SeriesEntry};
//! use kuba_writecache::key::CompositeKey;
//! use kuba_writecache::store::CacheStore;
//! use std::sync::Arc;
//!
//! let store = CacheStore::new(&StoreConfig::default());
//! let key = CompositeKey::new("cpu,host=a", "usage");
//!
//! let entry = store.get_or_put(&key, SeriesEntry::new);
//! entry.add(Sample::new(1000, 99.5));
//!
//! assert_eq!(store.get(&key).unwrap().len(), 1);
//! assert_eq!(store.len(), 1);
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::config::StoreConfig;
use crate::entry::SeriesEntry;
use crate::key::{fnv1a_64, CompositeKey, FieldKey, SeriesKey};
use crate::metrics;

type FieldMap = HashMap<FieldKey, Arc<SeriesEntry>>;

/// One independently locked partition of the store
#[derive(Debug, Default)]
struct StoreShard {
    /// Two-level map: series, then field
    series: HashMap<SeriesKey, FieldMap>,
    /// Ordered index of the series present in this shard
    ordered: BTreeSet<SeriesKey>,
    /// Count of live series; always equals `series.len()`
    live: u64,
}

impl StoreShard {
    /// Insert a field entry, creating series-level state as needed.
    /// Multi-step by construction but atomic under the caller's write lock.
    fn insert(&mut self, key: &CompositeKey, entry: Arc<SeriesEntry>) {
        if !self.series.contains_key(&key.series) {
            self.series.insert(key.series.clone(), FieldMap::new());
            self.ordered.insert(key.series.clone());
            self.live += 1;
            metrics::STORE_SERIES.inc();
        }
        if let Some(fields) = self.series.get_mut(&key.series) {
            fields.insert(key.field.clone(), entry);
        }
    }
}

/// Concurrent, sharded map from composite key to cache entry
///
/// The `writecache_store_series` gauge this type maintains is
/// process-global: multiple stores aggregate into one metric. Use
/// [`len`](Self::len) for a per-instance count.
#[derive(Debug)]
pub struct CacheStore {
    shards: Vec<RwLock<StoreShard>>,
}

impl CacheStore {
    /// Create a store with the configured fixed shard count
    pub fn new(config: &StoreConfig) -> Self {
        let shards = (0..config.shards)
            .map(|_| RwLock::new(StoreShard::default()))
            .collect();
        Self { shards }
    }

    /// Number of shards (fixed at construction)
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Deterministic shard index for a series key
    ///
    /// Repeated calls for the same key always return the same index within
    /// one store instance.
    pub fn shard_index(&self, series: &SeriesKey) -> usize {
        (fnv1a_64(series.as_bytes()) % self.shards.len() as u64) as usize
    }

    /// Fetch the entry for `key`, or `None` if absent
    pub fn get(&self, key: &CompositeKey) -> Option<Arc<SeriesEntry>> {
        let shard = self.shards[self.shard_index(&key.series)].read();
        shard
            .series
            .get(&key.series)
            .and_then(|fields| fields.get(&key.field))
            .map(Arc::clone)
    }

    /// Insert or replace the entry for `key`
    pub fn put(&self, key: &CompositeKey, entry: Arc<SeriesEntry>) {
        let mut shard = self.shards[self.shard_index(&key.series)].write();
        shard.insert(key, entry);
    }

    /// Fetch the entry for `key`, creating it with `make_entry` on a miss
    ///
    /// The optimistic path takes only the read lock. On a miss the
    /// candidate entry is constructed *outside* any lock to keep the
    /// critical section short; if another writer wins the race the
    /// candidate is discarded and the winner returned. `make_entry` must
    /// therefore be side-effect-free with respect to shared state.
    pub fn get_or_put(
        &self,
        key: &CompositeKey,
        make_entry: impl FnOnce() -> SeriesEntry,
    ) -> Arc<SeriesEntry> {
        if let Some(existing) = self.get(key) {
            return existing;
        }

        let candidate = Arc::new(make_entry());

        let mut shard = self.shards[self.shard_index(&key.series)].write();
        if let Some(winner) = shard
            .series
            .get(&key.series)
            .and_then(|fields| fields.get(&key.field))
        {
            // Lost the race; the candidate is dropped
            return Arc::clone(winner);
        }
        shard.insert(key, Arc::clone(&candidate));
        candidate
    }

    /// Drop the entry for `key`, returning it if present
    ///
    /// Removes the series entirely — nested map, ordered index, live count —
    /// when its last field entry goes, so no orphan state survives.
    pub fn delete(&self, key: &CompositeKey) -> Option<Arc<SeriesEntry>> {
        let mut shard = self.shards[self.shard_index(&key.series)].write();

        let fields = shard.series.get_mut(&key.series)?;
        let removed = fields.remove(&key.field)?;

        if fields.is_empty() {
            shard.series.remove(&key.series);
            shard.ordered.remove(&key.series);
            shard.live -= 1;
            metrics::STORE_SERIES.dec();
            debug!(series = %key.series, "removed last field; series evicted");
        }
        Some(removed)
    }

    /// Approximate count of live series
    ///
    /// Each shard's count is read under that shard's read lock, but the sum
    /// is not a globally consistent snapshot; callers tolerate read skew.
    pub fn len(&self) -> u64 {
        self.shards.iter().map(|s| s.read().live).sum()
    }

    /// Whether no shard holds any series
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visit every (key, entry) pair
    ///
    /// Walks shards in a fixed order, holding one read lock at a time; a
    /// shard is never revisited once released, so concurrent writers may
    /// add or remove entries in shards not yet (or already) visited.
    pub fn iter(&self, mut visitor: impl FnMut(&CompositeKey, &Arc<SeriesEntry>)) {
        for shard in &self.shards {
            let shard = shard.read();
            for (series, fields) in &shard.series {
                for (field, entry) in fields {
                    let key = CompositeKey {
                        series: series.clone(),
                        field: field.clone(),
                    };
                    visitor(&key, entry);
                }
            }
        }
    }

    /// All series keys in byte-lexicographic order
    ///
    /// Merges each shard's ordered index; same consistency caveats as
    /// [`iter`](Self::iter).
    pub fn series_keys(&self) -> Vec<SeriesKey> {
        let mut keys = Vec::new();
        for shard in &self.shards {
            keys.extend(shard.read().ordered.iter().cloned());
        }
        keys.sort_unstable();
        keys
    }
}
