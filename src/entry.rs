//! Per-(series, field) cache entry
//!
//! A [`SeriesEntry`] buffers the freshly written samples for one field of
//! one series until the flush path snapshots and evicts it. The cache store
//! hands out `Arc<SeriesEntry>`; the entry guards its own sample buffer
//! with a mutex so it can be appended to in place without holding the
//! store's shard lock.

use std::sync::Arc;

use parking_lot::Mutex;

/// A single field value
///
/// Covers the value types a field can carry on the write path. String
/// values hold shared canonical instances from the intern table, so a
/// million points tagged with the same text cost one allocation.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// 64-bit float
    Float(f64),
    /// 64-bit signed integer
    Integer(i64),
    /// Boolean
    Boolean(bool),
    /// Shared immutable string
    Str(Arc<str>),
}

impl FieldValue {
    /// Approximate in-memory size of the value in bytes
    pub fn size_bytes(&self) -> usize {
        match self {
            FieldValue::Float(_) | FieldValue::Integer(_) => 8,
            FieldValue::Boolean(_) => 1,
            // Shared strings are counted once per reference; the canonical
            // allocation lives in the intern table
            FieldValue::Str(s) => std::mem::size_of::<Arc<str>>() + s.len(),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

/// One buffered sample: timestamp plus value
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Timestamp in nanoseconds since the epoch
    pub timestamp: i64,
    /// Field value at that timestamp
    pub value: FieldValue,
}

impl Sample {
    /// Create a sample
    pub fn new(timestamp: i64, value: impl Into<FieldValue>) -> Self {
        Self {
            timestamp,
            value: value.into(),
        }
    }
}

/// Buffered samples for one (series, field) pair
///
/// Mutable in place; owned exclusively by the cache store slot that holds
/// it. Samples are kept in arrival order — deduplication and sorting are
/// the flush path's concern.
#[derive(Debug, Default)]
pub struct SeriesEntry {
    values: Mutex<Vec<Sample>>,
}

impl SeriesEntry {
    /// Create an empty entry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an entry pre-sized for an expected burst
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    /// Append one sample
    pub fn add(&self, sample: Sample) {
        self.values.lock().push(sample);
    }

    /// Append a batch of samples under one lock acquisition
    pub fn add_batch(&self, samples: impl IntoIterator<Item = Sample>) {
        let mut values = self.values.lock();
        values.extend(samples);
    }

    /// Point-in-time copy of the buffered samples
    ///
    /// Used by the flush path; the entry keeps buffering while the snapshot
    /// is written out.
    pub fn snapshot(&self) -> Vec<Sample> {
        self.values.lock().clone()
    }

    /// Drain the buffered samples, leaving the entry empty
    ///
    /// Used after a successful flush when the entry itself is kept.
    pub fn drain(&self) -> Vec<Sample> {
        std::mem::take(&mut *self.values.lock())
    }

    /// Discard the buffered samples without returning them
    ///
    /// Keeps the buffer's capacity for the next burst.
    pub fn clear(&self) {
        self.values.lock().clear();
    }

    /// Number of buffered samples
    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    /// Whether the entry holds no samples
    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }

    /// Approximate heap footprint of the buffered samples in bytes
    pub fn size_bytes(&self) -> usize {
        let values = self.values.lock();
        values
            .iter()
            .map(|s| std::mem::size_of::<i64>() + s.value.size_bytes())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_snapshot() {
        let entry = SeriesEntry::new();
        entry.add(Sample::new(100, 1.5));
        entry.add(Sample::new(200, 2.5));

        let snap = entry.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0], Sample::new(100, 1.5));
        assert_eq!(snap[1], Sample::new(200, 2.5));
        // Snapshot does not drain
        assert_eq!(entry.len(), 2);
    }

    #[test]
    fn test_add_batch() {
        let entry = SeriesEntry::with_capacity(4);
        entry.add_batch((0..4).map(|i| Sample::new(i, i as f64)));
        assert_eq!(entry.len(), 4);
    }

    #[test]
    fn test_drain_empties_entry() {
        let entry = SeriesEntry::new();
        entry.add(Sample::new(1, 10i64));
        entry.add(Sample::new(2, true));

        let drained = entry.drain();
        assert_eq!(drained.len(), 2);
        assert!(entry.is_empty());
        assert_eq!(drained[1].value, FieldValue::Boolean(true));
    }

    #[test]
    fn test_clear_discards_samples() {
        let entry = SeriesEntry::new();
        entry.add(Sample::new(1, 1.0));
        entry.add(Sample::new(2, 2.0));

        entry.clear();
        assert!(entry.is_empty());
        assert_eq!(entry.size_bytes(), 0);

        // The entry keeps buffering after a clear
        entry.add(Sample::new(3, 3.0));
        assert_eq!(entry.len(), 1);
    }

    #[test]
    fn test_mixed_value_types() {
        let entry = SeriesEntry::new();
        entry.add(Sample::new(1, 0.5));
        entry.add(Sample::new(2, -7i64));
        entry.add(Sample::new(3, false));
        entry.add(Sample {
            timestamp: 4,
            value: FieldValue::Str(Arc::from("ok")),
        });

        let snap = entry.snapshot();
        assert!(matches!(snap[0].value, FieldValue::Float(_)));
        assert!(matches!(snap[1].value, FieldValue::Integer(-7)));
        assert!(matches!(snap[3].value, FieldValue::Str(_)));
    }

    #[test]
    fn test_size_bytes_grows_with_samples() {
        let entry = SeriesEntry::new();
        assert_eq!(entry.size_bytes(), 0);
        entry.add(Sample::new(1, 1.0));
        let one = entry.size_bytes();
        entry.add(Sample::new(2, 2.0));
        assert_eq!(entry.size_bytes(), one * 2);
    }

    #[test]
    fn test_concurrent_appends() {
        use std::sync::Arc as StdArc;
        use std::thread;

        let entry = StdArc::new(SeriesEntry::new());
        let mut handles = Vec::new();
        for t in 0..4 {
            let entry = StdArc::clone(&entry);
            handles.push(thread::spawn(move || {
                for i in 0..250 {
                    entry.add(Sample::new(t * 1000 + i, i as f64));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(entry.len(), 1000);
    }
}
