//! Error types for the write-path cache core

use thiserror::Error;

/// Main error type for the write cache
#[derive(Error, Debug)]
pub enum Error {
    /// Composite key error
    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    /// Pool/arena error
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// Intern table error
    #[error("Intern error: {0}")]
    Intern(#[from] InternError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Composite key errors
///
/// Always local and recoverable: reject the single input, keep serving others.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// A composite key string is missing the series/field separator
    #[error("Malformed composite key: missing separator {separator:?}")]
    MalformedKey {
        /// The separator that was expected in the input
        separator: &'static str,
    },
}

/// Pool and arena errors
///
/// `ArenaExhausted` and `DoubleRelease` are the only classes serious enough
/// to surface to an operator-visible metric/log; callers apply backpressure
/// on exhaustion. None of these are fatal to the process.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// A size class hit its configured maximum and no free slot exists
    ///
    /// The chosen policy is to propagate this to the caller; there is no
    /// silent fallback to unpooled heap allocation.
    #[error("Arena exhausted: all {capacity} slots of size {slot_size} are live")]
    ArenaExhausted {
        /// Configured maximum number of slots in the arena
        capacity: usize,
        /// Fixed slot capacity in bytes for this size class
        slot_size: usize,
    },

    /// The requested allocation does not fit in this size class's slots
    #[error("Allocation of {requested} bytes exceeds slot capacity of {capacity} bytes")]
    AllocationTooLarge {
        /// Requested payload size in bytes
        requested: usize,
        /// Slot capacity in bytes
        capacity: usize,
    },

    /// Release was called on a buffer whose count already reached zero
    ///
    /// Detected via the slot's generation counter rather than corrupting a
    /// subsequently allocated tenant of the same slot.
    #[error("Double release of slot {slot} (handle generation {generation})")]
    DoubleRelease {
        /// Slot index within the owning arena
        slot: u32,
        /// Generation captured by the offending handle
        generation: u32,
    },

    /// A handle refers to a slot lifetime that has already ended
    #[error("Stale handle for slot {slot} (handle generation {generation})")]
    StaleHandle {
        /// Slot index within the owning arena
        slot: u32,
        /// Generation captured by the handle
        generation: u32,
    },

    /// A buffer's embedded shard id disagrees with its handle
    ///
    /// Indicates caller corruption of the handle or the buffer contents.
    /// Fatal to the operation; never silently misrouted to another shard.
    #[error("Shard mismatch: handle says {expected}, buffer says {found}")]
    ShardMismatch {
        /// Shard id carried by the handle
        expected: u8,
        /// Shard id embedded in the buffer's metadata prefix
        found: u8,
    },
}

/// Intern table errors
///
/// Always local and recoverable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InternError {
    /// Input bytes were not valid UTF-8
    #[error("Cannot intern non-UTF-8 byte string")]
    InvalidUtf8,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::from(PoolError::ShardMismatch {
            expected: 3,
            found: 7,
        });
        assert_eq!(
            e.to_string(),
            "Pool error: Shard mismatch: handle says 3, buffer says 7"
        );
    }

    #[test]
    fn test_key_error_conversion() {
        let e: Error = KeyError::MalformedKey { separator: "#!~#" }.into();
        assert!(matches!(e, Error::Key(_)));
    }
}
