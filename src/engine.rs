//! Write cache facade
//!
//! [`WriteCache`] wires the memory core together: the sharded cache store
//! and the global string intern table. Ingestion code talks to this type.
//! The buffer pools are separate components constructed directly by the
//! staging and flush layers that own their handles; see [`crate::pool`].
//!
//! Series and field text passes through the intern table on the way into
//! key construction, so every entry addressed by the same text shares the
//! same canonical backing allocation.
//!
//! # Example
//!
//! ```rust
//! use kuba_writecache::config::WriteCacheConfig;
//! use kuba_writecache::engine::WriteCache;
//! use kuba_writecache::entry::Sample;
//!
//! let cache = WriteCache::new(WriteCacheConfig::default()).unwrap();
//! let key = cache.composite_key("cpu,host=a", "usage");
//!
//! cache.put(&key, Sample::new(1_000, 99.5));
//! cache.put(&key, Sample::new(2_000, 97.0));
//!
//! assert_eq!(cache.get(&key).unwrap().len(), 2);
//! assert_eq!(cache.series_count(), 1);
//! ```

use std::sync::Arc;

use tracing::info;

use crate::config::WriteCacheConfig;
use crate::entry::{FieldValue, Sample, SeriesEntry};
use crate::error::Result;
use crate::intern::{InternClassStats, InternTable};
use crate::key::{CompositeKey, FieldKey, SeriesKey};
use crate::store::CacheStore;

/// The write-path memory core: store plus intern table
#[derive(Debug)]
pub struct WriteCache {
    store: CacheStore,
    intern: InternTable,
}

impl WriteCache {
    /// Build a cache from configuration, validating it first
    pub fn new(config: WriteCacheConfig) -> Result<Self> {
        config.validate()?;
        info!(
            store_shards = config.store.shards,
            pool_shards = config.pool.shards,
            intern_shards = config.intern.shards,
            "write cache initialized"
        );
        Ok(Self {
            store: CacheStore::new(&config.store),
            intern: InternTable::new(&config.intern),
        })
    }

    /// Build a composite key from series and field text, interning both
    ///
    /// Repeated calls with the same text return keys backed by the same
    /// canonical allocations.
    pub fn composite_key(&self, series: &str, field: &str) -> CompositeKey {
        CompositeKey {
            series: SeriesKey::new(self.intern.intern_str(series)),
            field: FieldKey::new(self.intern.intern_str(field)),
        }
    }

    /// Buffer one sample under `key`, creating the entry on first write
    ///
    /// String field values are routed through the intern table before
    /// storage, so repeated values share one allocation.
    pub fn put(&self, key: &CompositeKey, sample: Sample) -> Arc<SeriesEntry> {
        let sample = match sample.value {
            FieldValue::Str(s) => Sample {
                timestamp: sample.timestamp,
                value: FieldValue::Str(self.intern.intern_str(&s)),
            },
            _ => sample,
        };
        let entry = self.store.get_or_put(key, SeriesEntry::new);
        entry.add(sample);
        entry
    }

    /// Fetch the entry for `key`, or `None` if nothing has been buffered
    pub fn get(&self, key: &CompositeKey) -> Option<Arc<SeriesEntry>> {
        self.store.get(key)
    }

    /// Fetch or create the entry for `key` without buffering anything
    pub fn entry(&self, key: &CompositeKey) -> Arc<SeriesEntry> {
        self.store.get_or_put(key, SeriesEntry::new)
    }

    /// Drop the entry for `key`, returning it if present
    pub fn delete(&self, key: &CompositeKey) -> Option<Arc<SeriesEntry>> {
        self.store.delete(key)
    }

    /// Intern arbitrary text through the shared table
    pub fn intern(&self, s: &str) -> Arc<str> {
        self.intern.intern_str(s)
    }

    /// Approximate count of live series
    pub fn series_count(&self) -> u64 {
        self.store.len()
    }

    /// All series keys in byte-lexicographic order
    pub fn series_keys(&self) -> Vec<SeriesKey> {
        self.store.series_keys()
    }

    /// Visit every buffered (key, entry) pair
    pub fn iter(&self, visitor: impl FnMut(&CompositeKey, &Arc<SeriesEntry>)) {
        self.store.iter(visitor)
    }

    /// Per-length-class intern table statistics
    pub fn intern_stats(&self) -> Vec<InternClassStats> {
        self.intern.class_stats()
    }

    /// The underlying cache store
    pub fn store(&self) -> &CacheStore {
        &self.store
    }
}
