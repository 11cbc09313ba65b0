//! Deduplicating string intern table
//!
//! Bounds memory growth from highly repetitive tag values and measurement
//! names by storing each distinct byte string once and handing out shared
//! `Arc<str>` instances. Two byte-equal inputs always return byte-equal
//! values, and in this implementation the identical backing allocation.
//!
//! Strings are routed first to one of five length classes, then to one of S
//! shards within that class by FNV-1a hash modulo S, so hot shards stay
//! narrow and unrelated lengths never contend. The miss path uses
//! double-checked locking: an optimistic read-lock probe, then a write-lock
//! re-check before inserting, so a lock-upgrade race never produces
//! duplicate canonical instances.
//!
//! Interned strings live for the process lifetime; there is no eviction.
//! Per-bucket statistics (entry count, average length) are exposed so
//! operators can watch growth.
//!
//! # Example
//!
//! ```rust
//! use kuba_writecache::config::InternConfig;
//! use kuba_writecache::intern::InternTable;
//! use std::sync::Arc;
//!
//! let table = InternTable::new(&InternConfig::default());
//! let a = table.intern(b"us-west-2").unwrap();
//! let b = table.intern(b"us-west-2").unwrap();
//! assert!(Arc::ptr_eq(&a, &b));
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::InternConfig;
use crate::error::InternError;
use crate::key::fnv1a_64;
use crate::metrics;

/// Number of length classes
pub const LENGTH_CLASSES: usize = 5;

#[derive(Debug, Default)]
struct BucketInner {
    /// Canonical instances, keyed by their own content
    items: HashSet<Arc<str>>,
    /// Entries ever inserted into this bucket
    count: u64,
    /// Sum of entry byte lengths, for the running average
    total_len: u64,
}

/// One shard of the intern table
#[derive(Debug, Default)]
struct InternBucket {
    inner: RwLock<BucketInner>,
}

impl InternBucket {
    fn intern(&self, s: &str) -> Arc<str> {
        // Optimistic path: the string is usually already interned
        {
            let inner = self.inner.read();
            if let Some(existing) = inner.items.get(s) {
                metrics::INTERN_HITS_TOTAL.inc();
                return Arc::clone(existing);
            }
        }

        let mut inner = self.inner.write();
        // Re-check: another writer may have won the lock-upgrade race
        if let Some(existing) = inner.items.get(s) {
            metrics::INTERN_HITS_TOTAL.inc();
            return Arc::clone(existing);
        }

        let canonical: Arc<str> = Arc::from(s);
        inner.items.insert(Arc::clone(&canonical));
        inner.count += 1;
        inner.total_len += s.len() as u64;
        metrics::INTERN_INSERTS_TOTAL.inc();
        canonical
    }
}

/// Statistics for one length class of the table
#[derive(Debug, Clone, PartialEq)]
pub struct InternClassStats {
    /// Length class index (0 = shortest)
    pub class: usize,
    /// Distinct strings held across the class's shards
    pub count: u64,
    /// Average byte length of the class's strings (0.0 when empty)
    pub average_len: f64,
}

/// Globally sharded, deduplicating string table
///
/// Not arena-backed: canonical instances are plain `Arc<str>` allocations
/// shared by every holder.
#[derive(Debug)]
pub struct InternTable {
    /// `classes[class][shard]`
    classes: Vec<Vec<InternBucket>>,
    /// Upper length bound (inclusive) for classes 0..4; the last class is
    /// unbounded
    class_bounds: [usize; LENGTH_CLASSES - 1],
    shards: u64,
}

impl InternTable {
    /// Create a table from validated configuration
    pub fn new(config: &InternConfig) -> Self {
        let classes = (0..LENGTH_CLASSES)
            .map(|_| {
                (0..config.shards)
                    .map(|_| InternBucket::default())
                    .collect()
            })
            .collect();
        Self {
            classes,
            class_bounds: config.class_bounds,
            shards: config.shards as u64,
        }
    }

    /// Intern a byte string, returning the shared canonical instance
    ///
    /// Rejects non-UTF-8 input as a local, recoverable error; series and
    /// field text is always UTF-8.
    pub fn intern(&self, bytes: &[u8]) -> Result<Arc<str>, InternError> {
        let s = std::str::from_utf8(bytes).map_err(|_| InternError::InvalidUtf8)?;
        Ok(self.intern_str(s))
    }

    /// Intern a string slice, returning the shared canonical instance
    pub fn intern_str(&self, s: &str) -> Arc<str> {
        let class = self.class_of(s.len());
        let shard = (fnv1a_64(s.as_bytes()) % self.shards) as usize;
        self.classes[class][shard].intern(s)
    }

    /// Total distinct strings held across all classes and shards
    pub fn len(&self) -> u64 {
        self.classes
            .iter()
            .flatten()
            .map(|b| b.inner.read().count)
            .sum()
    }

    /// Whether the table holds no strings
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Per-length-class statistics
    pub fn class_stats(&self) -> Vec<InternClassStats> {
        self.classes
            .iter()
            .enumerate()
            .map(|(class, buckets)| {
                let mut count = 0u64;
                let mut total_len = 0u64;
                for bucket in buckets {
                    let inner = bucket.inner.read();
                    count += inner.count;
                    total_len += inner.total_len;
                }
                InternClassStats {
                    class,
                    count,
                    average_len: if count == 0 {
                        0.0
                    } else {
                        total_len as f64 / count as f64
                    },
                }
            })
            .collect()
    }

    /// Length class for a string of `len` bytes
    fn class_of(&self, len: usize) -> usize {
        for (i, &bound) in self.class_bounds.iter().enumerate() {
            if len <= bound {
                return i;
            }
        }
        LENGTH_CLASSES - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> InternTable {
        InternTable::new(&InternConfig::default())
    }

    #[test]
    fn test_intern_returns_identical_instance() {
        let table = table();
        let a = table.intern(b"prod").unwrap();
        let b = table.intern(b"prod").unwrap();
        assert_eq!(a, b);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_distinct_strings_distinct_instances() {
        let table = table();
        let a = table.intern_str("server-1");
        let b = table.intern_str("server-2");
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let table = table();
        let err = table.intern(&[0xff, 0xfe, 0x00]).unwrap_err();
        assert_eq!(err, InternError::InvalidUtf8);
        // The failed input leaves no residue
        assert!(table.is_empty());
    }

    #[test]
    fn test_length_class_routing() {
        let table = table();
        assert_eq!(table.class_of(0), 0);
        assert_eq!(table.class_of(8), 0);
        assert_eq!(table.class_of(9), 1);
        assert_eq!(table.class_of(64), 1);
        assert_eq!(table.class_of(256), 2);
        assert_eq!(table.class_of(512), 3);
        assert_eq!(table.class_of(513), 4);
        assert_eq!(table.class_of(100_000), 4);
    }

    #[test]
    fn test_class_stats_track_counts_and_lengths() {
        let table = table();
        table.intern_str("ab"); // class 0, len 2
        table.intern_str("cdef"); // class 0, len 4
        table.intern_str(&"x".repeat(100)); // class 2

        let stats = table.class_stats();
        assert_eq!(stats[0].count, 2);
        assert!((stats[0].average_len - 3.0).abs() < f64::EPSILON);
        assert_eq!(stats[2].count, 1);
        assert_eq!(stats[1].count, 0);
        assert_eq!(stats[1].average_len, 0.0);
    }

    #[test]
    fn test_concurrent_intern_no_duplicates() {
        use std::thread;

        let table = Arc::new(table());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let table = Arc::clone(&table);
            handles.push(thread::spawn(move || {
                for i in 0..500 {
                    let s = format!("tag-value-{}", i % 20);
                    let canonical = table.intern_str(&s);
                    assert_eq!(&*canonical, s.as_str());
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // 20 distinct inputs, exactly 20 canonical instances
        assert_eq!(table.len(), 20);
    }
}
