//! Metastore configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::catalog::property::StorageCacheInfo;
use crate::error::ConfigError;

/// When journal appends reach stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// fsync after every append.
    #[default]
    Full,
    /// Leave flushing to the OS. Faster, loses the tail on power failure.
    None,
}

/// Settings for a [`Metastore`](crate::api::Metastore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetastoreConfig {
    pub journal_sync: SyncMode,
    /// Cache policy applied when DDL properties do not name one.
    pub default_enable_cache: bool,
    pub default_cache_ttl_s: u64,
}

impl Default for MetastoreConfig {
    fn default() -> Self {
        Self {
            journal_sync: SyncMode::Full,
            default_enable_cache: true,
            default_cache_ttl_s: 0,
        }
    }
}

impl MetastoreConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn default_cache(&self) -> StorageCacheInfo {
        StorageCacheInfo::new(self.default_enable_cache, self.default_cache_ttl_s)
    }
}
