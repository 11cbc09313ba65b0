//! Metrics and telemetry for the write cache
//!
//! Prometheus counters and gauges covering pool health, intern table
//! traffic, and the live-series population of the store.

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_gauge, Encoder, IntCounter, IntGauge, TextEncoder,
};

lazy_static! {
    // === Pool Health ===

    /// Allocation attempts rejected because an arena hit its growth limit
    pub static ref ARENA_EXHAUSTED_TOTAL: IntCounter = register_int_counter!(
        "writecache_arena_exhausted_total",
        "Allocations rejected because an arena reached its slot limit"
    ).unwrap();

    /// Release attempts against a slot that was already free
    pub static ref DOUBLE_RELEASE_TOTAL: IntCounter = register_int_counter!(
        "writecache_double_release_total",
        "Release attempts against an already-freed pool slot"
    ).unwrap();

    /// Handles whose embedded shard id disagreed with the slot contents
    pub static ref SHARD_MISMATCH_TOTAL: IntCounter = register_int_counter!(
        "writecache_shard_mismatch_total",
        "Pool handles whose embedded shard id failed verification"
    ).unwrap();

    // === Intern Table ===

    /// Intern lookups that found an existing canonical instance
    pub static ref INTERN_HITS_TOTAL: IntCounter = register_int_counter!(
        "writecache_intern_hits_total",
        "Intern lookups resolved to an existing canonical string"
    ).unwrap();

    /// Intern lookups that inserted a new canonical instance
    pub static ref INTERN_INSERTS_TOTAL: IntCounter = register_int_counter!(
        "writecache_intern_inserts_total",
        "Intern lookups that inserted a new canonical string"
    ).unwrap();

    // === Store Population ===

    /// Live series held by cache stores, aggregated across every store
    /// instance in the process. Per-store counts come from
    /// `CacheStore::len`, not this gauge.
    pub static ref STORE_SERIES: IntGauge = register_int_gauge!(
        "writecache_store_series",
        "Live series across all cache stores in the process"
    ).unwrap();
}

/// Get metrics in Prometheus text format
pub fn gather() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Invalid UTF-8 in metrics output: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_increment() {
        let before = INTERN_HITS_TOTAL.get();
        INTERN_HITS_TOTAL.inc();
        assert_eq!(INTERN_HITS_TOTAL.get(), before + 1);
    }

    #[test]
    fn test_gather_produces_text_format() {
        ARENA_EXHAUSTED_TOTAL.inc();
        let output = gather().unwrap();
        assert!(output.contains("writecache_arena_exhausted_total"));
    }
}
