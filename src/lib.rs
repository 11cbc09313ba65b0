//! Kuba write cache - the in-memory write path of a time-series store
//!
//! This library provides the memory core sitting between ingestion and the
//! on-disk engine:
//! - Sharded concurrent cache store keyed by (series, field)
//! - Reference-counted buffer pools with one size class per arena
//! - Globally deduplicating string intern table
//! - Lock-scoped concurrency: no lock ever spans two shards

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arena;
pub mod engine;
pub mod entry;
pub mod error;
pub mod intern;
pub mod key;
pub mod store;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Sharded buffer pools and their typed string/sample wrappers
pub mod pool;

// Re-export main types
pub use config::WriteCacheConfig;
pub use engine::WriteCache;
pub use entry::{FieldValue, Sample, SeriesEntry};
pub use error::{Error, Result};
pub use key::{CompositeKey, FieldKey, SeriesKey};

#[cfg(test)]
mod tests {
    #[test]
    fn test_basic_sanity() {
        assert_eq!(2 + 2, 4);
    }
}
