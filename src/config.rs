//! Configuration for the write-path cache core
//!
//! Everything tunable — shard counts, slot sizes, growth limits, intern
//! length-class boundaries — is an explicit constructor parameter carried
//! in a config struct, owned by whichever top-level component wires the
//! cache together. Nothing is read from process environment at first use.
//!
//! Supports TOML files with serde defaults, so a partial file overrides
//! only the listed fields.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::intern::LENGTH_CLASSES;

/// Complete configuration for a [`WriteCache`](crate::engine::WriteCache)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WriteCacheConfig {
    /// Cache store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Buffer pool configuration
    #[serde(default)]
    pub pool: PoolConfig,

    /// String intern table configuration
    #[serde(default)]
    pub intern: InternConfig,
}

/// Cache store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Number of store shards (fixed at construction)
    #[serde(default = "default_store_shards")]
    pub shards: usize,
}

/// Buffer pool configuration (shared by the byte, string, and sample pools)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Number of independent arena shards
    #[serde(default = "default_pool_shards")]
    pub shards: usize,

    /// Payload capacity of one slot in bytes (one size class per pool)
    #[serde(default = "default_slot_size")]
    pub slot_size: usize,

    /// Maximum slots each shard's backing store may grow to; beyond this,
    /// allocations fail with `ArenaExhausted`
    #[serde(default = "default_max_slots_per_shard")]
    pub max_slots_per_shard: usize,
}

/// String intern table configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InternConfig {
    /// Shards per length class
    #[serde(default = "default_intern_shards")]
    pub shards: usize,

    /// Inclusive upper byte-length bounds of the first four length
    /// classes; the fifth class is unbounded
    #[serde(default = "default_class_bounds")]
    pub class_bounds: [usize; LENGTH_CLASSES - 1],
}

// Default value functions
fn default_store_shards() -> usize {
    16
}
fn default_pool_shards() -> usize {
    8
}
fn default_slot_size() -> usize {
    512
}
fn default_max_slots_per_shard() -> usize {
    16_384
}
fn default_intern_shards() -> usize {
    32
}
fn default_class_bounds() -> [usize; LENGTH_CLASSES - 1] {
    [8, 64, 256, 512]
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            shards: default_store_shards(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            shards: default_pool_shards(),
            slot_size: default_slot_size(),
            max_slots_per_shard: default_max_slots_per_shard(),
        }
    }
}

impl Default for InternConfig {
    fn default() -> Self {
        Self {
            shards: default_intern_shards(),
            class_bounds: default_class_bounds(),
        }
    }
}

impl StoreConfig {
    /// Set the shard count
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }
}

impl PoolConfig {
    /// Set the arena shard count
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    /// Set the slot payload capacity in bytes
    pub fn with_slot_size(mut self, slot_size: usize) -> Self {
        self.slot_size = slot_size;
        self
    }

    /// Set the per-shard slot growth limit
    pub fn with_max_slots_per_shard(mut self, max_slots: usize) -> Self {
        self.max_slots_per_shard = max_slots;
        self
    }
}

impl InternConfig {
    /// Set the per-class shard count
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    /// Set the length-class boundaries
    pub fn with_class_bounds(mut self, bounds: [usize; LENGTH_CLASSES - 1]) -> Self {
        self.class_bounds = bounds;
        self
    }
}

impl WriteCacheConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config file {}: {}", path, e))
        })?;

        toml::from_str(&contents).map_err(|e| {
            Error::Configuration(format!("Failed to parse config file {}: {}", path, e))
        })
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Configuration(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents).map_err(|e| {
            Error::Configuration(format!("Failed to write config file {}: {}", path, e))
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.store.shards == 0 {
            return Err(Error::Configuration("Store shards must be > 0".to_string()));
        }
        if self.pool.shards == 0 {
            return Err(Error::Configuration("Pool shards must be > 0".to_string()));
        }
        // The shard id is embedded in a single metadata byte
        if self.pool.shards > 256 {
            return Err(Error::Configuration(
                "Pool shards cannot exceed 256".to_string(),
            ));
        }
        if self.pool.slot_size == 0 {
            return Err(Error::Configuration(
                "Pool slot size must be > 0".to_string(),
            ));
        }
        if self.pool.max_slots_per_shard == 0 {
            return Err(Error::Configuration(
                "Pool max slots per shard must be > 0".to_string(),
            ));
        }
        if self.intern.shards == 0 {
            return Err(Error::Configuration(
                "Intern shards must be > 0".to_string(),
            ));
        }
        if self.intern.class_bounds.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::Configuration(
                "Intern class bounds must be strictly increasing".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = WriteCacheConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.store.shards, 16);
        assert_eq!(config.pool.slot_size, 512);
        assert_eq!(config.intern.class_bounds, [8, 64, 256, 512]);
    }

    #[test]
    fn test_zero_shards_rejected() {
        let mut config = WriteCacheConfig::default();
        config.store.shards = 0;
        assert!(config.validate().is_err());

        let mut config = WriteCacheConfig::default();
        config.pool.shards = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pool_shard_limit() {
        let mut config = WriteCacheConfig::default();
        config.pool.shards = 256;
        assert!(config.validate().is_ok());
        config.pool.shards = 257;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unordered_class_bounds_rejected() {
        let mut config = WriteCacheConfig::default();
        config.intern.class_bounds = [8, 64, 64, 512];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder_methods() {
        let config = WriteCacheConfig {
            store: StoreConfig::default().with_shards(32),
            pool: PoolConfig::default()
                .with_shards(4)
                .with_slot_size(1024)
                .with_max_slots_per_shard(100),
            intern: InternConfig::default().with_shards(8),
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.store.shards, 32);
        assert_eq!(config.pool.slot_size, 1024);
        assert_eq!(config.intern.shards, 8);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: WriteCacheConfig = toml::from_str(
            r#"
            [store]
            shards = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.store.shards, 8);
        assert_eq!(config.pool.shards, default_pool_shards());
        assert_eq!(config.intern.shards, default_intern_shards());
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("writecache.toml");
        let path = path.to_str().unwrap();

        let config = WriteCacheConfig {
            store: StoreConfig::default().with_shards(4),
            ..Default::default()
        };
        config.save_to_file(path).unwrap();

        let loaded = WriteCacheConfig::from_file(path).unwrap();
        assert_eq!(loaded.store.shards, 4);
        assert_eq!(loaded.pool.slot_size, config.pool.slot_size);
    }
}
