//! Typed views over the sharded pool
//!
//! Thin, type-safe wrappers that compute the correct buffer size including
//! the fixed metadata prefix and expose `get`/`inc`/`dec` in terms of the
//! richer type instead of raw bytes:
//!
//! - [`StringPool`]: owned immutable strings. The prefix carries the shard
//!   id plus an FNV-1a content hash; the shard is derived from that hash at
//!   `get` time, so `dec` can recompute it from the buffer contents and
//!   detect caller corruption.
//! - [`SamplePool`]: fixed-size numeric sample records (timestamp + value).
//!
//! The metadata prefix is never exposed to callers. Reconstructing a typed
//! handle from raw bytes exactly inverts the embedding performed at `get`
//! time; any mismatch is [`PoolError::ShardMismatch`], treated as a fatal
//! usage error.

use std::sync::Arc;

use tracing::error;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::key::fnv1a_64;
use crate::metrics;
use crate::pool::{PooledBuf, ShardedPool, SHARD_PREFIX_LEN};

/// Byte length of the content-hash metadata field
const HASH_PREFIX_LEN: usize = 8;

/// Encoded byte length of one sample record: timestamp + value bits
const SAMPLE_RECORD_LEN: usize = 16;

/// Handle to a pooled immutable string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PooledStr {
    buf: PooledBuf,
}

impl PooledStr {
    /// The shard holding this string (diagnostics only)
    pub fn shard(&self) -> u8 {
        self.buf.shard()
    }
}

/// Immutable string view over pooled backing memory
///
/// Holds the backing buffer alive for the view's lifetime; the byte range
/// was validated as UTF-8 when the view was constructed.
#[derive(Debug, Clone)]
pub struct StrView {
    backing: Arc<Vec<u8>>,
    offset: usize,
    len: usize,
}

impl StrView {
    fn new(backing: Arc<Vec<u8>>, offset: usize, len: usize) -> Option<Self> {
        std::str::from_utf8(&backing[offset..offset + len]).ok()?;
        Some(Self {
            backing,
            offset,
            len,
        })
    }

    /// The string contents
    pub fn as_str(&self) -> &str {
        // UTF-8 validated in `new`
        std::str::from_utf8(&self.backing[self.offset..self.offset + self.len])
            .expect("pooled string bytes validated at view construction")
    }

    /// Byte length of the string
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the string is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl AsRef<str> for StrView {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Pool of owned, reference-counted strings
///
/// Buffer layout: `[shard id][content hash, 8 bytes LE][string bytes]`.
/// The shard is the content hash modulo the shard count, so equal strings
/// share a shard and `dec` can re-derive placement from content alone.
#[derive(Debug)]
pub struct StringPool {
    pool: ShardedPool,
}

impl StringPool {
    /// Create a string pool from validated configuration
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            pool: ShardedPool::with_prefix_len(config, SHARD_PREFIX_LEN + HASH_PREFIX_LEN),
        }
    }

    /// Allocate a pooled copy of `s`, refcount = 1
    pub fn get(&self, s: &str) -> Result<PooledStr, PoolError> {
        let hash = fnv1a_64(s.as_bytes());
        let shard = (hash % self.pool.shard_count() as u64) as usize;
        let buf = self
            .pool
            .get_with_meta(&hash.to_le_bytes(), s.as_bytes(), Some(shard))?;
        Ok(PooledStr { buf })
    }

    /// Share ownership of a pooled string
    pub fn inc(&self, s: &PooledStr) -> Result<(), PoolError> {
        self.pool.inc(&s.buf)
    }

    /// Drop ownership of a pooled string
    ///
    /// Recomputes the content hash from the buffer, re-derives the owning
    /// shard, and compares it against the embedded shard id before
    /// releasing. Returns `true` when the count reached zero.
    pub fn dec(&self, s: &PooledStr) -> Result<bool, PoolError> {
        let raw = match self.pool.raw_bytes(&s.buf) {
            Ok(raw) => raw,
            Err(PoolError::StaleHandle { slot, generation }) => {
                metrics::DOUBLE_RELEASE_TOTAL.inc();
                return Err(PoolError::DoubleRelease { slot, generation });
            }
            Err(e) => return Err(e),
        };
        self.verify_embedding(&s.buf, &raw)?;
        self.pool.release_unchecked(&s.buf)
    }

    /// Immutable view of the pooled string
    pub fn as_str(&self, s: &PooledStr) -> Result<StrView, PoolError> {
        let raw = self.pool.raw_bytes(&s.buf)?;
        self.verify_embedding(&s.buf, &raw)?;
        let offset = SHARD_PREFIX_LEN + HASH_PREFIX_LEN;
        let len = raw.len() - offset;
        StrView::new(raw, offset, len).ok_or_else(|| self.mismatch(&s.buf, s.buf.shard()))
    }

    /// Approximate count of live string references
    pub fn approximate_refs(&self) -> i64 {
        self.pool.approximate_refs()
    }

    /// Number of arena shards
    pub fn shard_count(&self) -> usize {
        self.pool.shard_count()
    }

    /// Check that the embedding performed at `get` time inverts exactly:
    /// stored shard id == shard id derived from the current content hash
    fn verify_embedding(&self, buf: &PooledBuf, raw: &[u8]) -> Result<(), PoolError> {
        let prefix_len = SHARD_PREFIX_LEN + HASH_PREFIX_LEN;
        if raw.len() < prefix_len {
            return Err(self.mismatch(buf, u8::MAX));
        }

        let stored_shard = raw[0];
        let mut stored_hash = [0u8; HASH_PREFIX_LEN];
        stored_hash.copy_from_slice(&raw[SHARD_PREFIX_LEN..prefix_len]);
        let stored_hash = u64::from_le_bytes(stored_hash);

        let computed_hash = fnv1a_64(&raw[prefix_len..]);
        let derived_shard = (computed_hash % self.pool.shard_count() as u64) as u8;

        if stored_shard != buf.shard()
            || stored_hash != computed_hash
            || derived_shard != stored_shard
        {
            return Err(self.mismatch(buf, derived_shard));
        }
        Ok(())
    }

    fn mismatch(&self, buf: &PooledBuf, found: u8) -> PoolError {
        metrics::SHARD_MISMATCH_TOTAL.inc();
        error!(
            expected = buf.shard(),
            found, "pooled string failed content-hash verification"
        );
        PoolError::ShardMismatch {
            expected: buf.shard(),
            found,
        }
    }
}

/// Handle to a pooled fixed-size sample record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PooledSample {
    buf: PooledBuf,
}

impl PooledSample {
    /// The shard holding this record (diagnostics only)
    pub fn shard(&self) -> u8 {
        self.buf.shard()
    }
}

/// Pool of fixed-size numeric sample records
///
/// Buffer layout: `[shard id][timestamp, 8 bytes LE][value bits, 8 bytes
/// LE]`. Records are exactly one size class, so the pool's slots are sized
/// to the record and never fragment.
#[derive(Debug)]
pub struct SamplePool {
    pool: ShardedPool,
}

impl SamplePool {
    /// Create a sample pool; shard and growth limits come from `config`,
    /// the slot size is fixed by the record encoding
    pub fn new(config: &PoolConfig) -> Self {
        let config = config.clone().with_slot_size(SAMPLE_RECORD_LEN);
        Self {
            pool: ShardedPool::new(&config),
        }
    }

    /// Allocate a record for `(timestamp, value)`, refcount = 1
    pub fn get(&self, timestamp: i64, value: f64) -> Result<PooledSample, PoolError> {
        let mut payload = [0u8; SAMPLE_RECORD_LEN];
        payload[..8].copy_from_slice(&timestamp.to_le_bytes());
        payload[8..].copy_from_slice(&value.to_bits().to_le_bytes());
        let buf = self.pool.get(&payload, None)?;
        Ok(PooledSample { buf })
    }

    /// Decode the record behind `sample`
    pub fn read(&self, sample: &PooledSample) -> Result<(i64, f64), PoolError> {
        let view = self.pool.view(&sample.buf)?;
        let bytes = view.as_bytes();
        if bytes.len() != SAMPLE_RECORD_LEN {
            return Err(PoolError::ShardMismatch {
                expected: sample.buf.shard(),
                found: u8::MAX,
            });
        }
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&bytes[..8]);
        let mut bits = [0u8; 8];
        bits.copy_from_slice(&bytes[8..]);
        Ok((i64::from_le_bytes(ts), f64::from_bits(u64::from_le_bytes(bits))))
    }

    /// Share ownership of a record
    pub fn inc(&self, sample: &PooledSample) -> Result<(), PoolError> {
        self.pool.inc(&sample.buf)
    }

    /// Drop ownership of a record; `true` when the count reached zero
    pub fn dec(&self, sample: &PooledSample) -> Result<bool, PoolError> {
        self.pool.dec(&sample.buf)
    }

    /// Approximate count of live record references
    pub fn approximate_refs(&self) -> i64 {
        self.pool.approximate_refs()
    }
}
