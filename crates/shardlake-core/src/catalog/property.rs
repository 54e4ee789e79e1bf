//! Storage descriptor of a lake table: shard backend info plus cache policy.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// DDL property toggling the local data cache for a lake table.
pub const PROPERTY_ENABLE_STORAGE_CACHE: &str = "enable_storage_cache";

/// DDL property with the cache TTL in seconds.
pub const PROPERTY_STORAGE_CACHE_TTL: &str = "storage_cache_ttl";

/// Object storage backend of a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageProvider {
    S3,
    Hdfs,
    Azure,
    Gcs,
}

/// Location of shard data in object storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStorageInfo {
    pub object_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// Backend-specific descriptor handed out by the shard service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardStorageInfo {
    pub provider: StorageProvider,
    pub object_storage: ObjectStorageInfo,
    /// Provider parameters (region, credentials profile, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

impl ShardStorageInfo {
    pub fn new(provider: StorageProvider, object_uri: impl Into<String>) -> Self {
        Self {
            provider,
            object_storage: ObjectStorageInfo {
                object_uri: object_uri.into(),
                endpoint: None,
            },
            params: BTreeMap::new(),
        }
    }

    /// Return a copy with the object URI replaced.
    pub(crate) fn with_object_uri(&self, object_uri: String) -> Self {
        Self {
            provider: self.provider,
            object_storage: ObjectStorageInfo {
                object_uri,
                endpoint: self.object_storage.endpoint.clone(),
            },
            params: self.params.clone(),
        }
    }
}

/// Local cache policy for shard data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageCacheInfo {
    pub enable_cache: bool,
    pub cache_ttl_s: u64,
}

impl StorageCacheInfo {
    pub fn new(enable_cache: bool, cache_ttl_s: u64) -> Self {
        Self {
            enable_cache,
            cache_ttl_s,
        }
    }

    /// Read the cache policy from DDL properties, falling back to `defaults`
    /// for keys that are absent.
    pub fn from_properties(
        properties: &BTreeMap<String, String>,
        defaults: StorageCacheInfo,
    ) -> Result<Self, StorageError> {
        let enable_cache = match properties.get(PROPERTY_ENABLE_STORAGE_CACHE) {
            None => defaults.enable_cache,
            Some(v) => match v.trim().to_ascii_lowercase().as_str() {
                "true" => true,
                "false" => false,
                _ => {
                    return Err(StorageError::InvalidProperty {
                        key: PROPERTY_ENABLE_STORAGE_CACHE.to_string(),
                        reason: format!("expected true or false, got '{v}'"),
                    });
                }
            },
        };

        let cache_ttl_s = match properties.get(PROPERTY_STORAGE_CACHE_TTL) {
            None => defaults.cache_ttl_s,
            Some(v) => v
                .trim()
                .parse::<u64>()
                .map_err(|_| StorageError::InvalidProperty {
                    key: PROPERTY_STORAGE_CACHE_TTL.to_string(),
                    reason: format!("expected a non-negative number of seconds, got '{v}'"),
                })?,
        };

        Ok(Self {
            enable_cache,
            cache_ttl_s,
        })
    }
}

/// The storage descriptor: shard backend info and cache policy, bound as one
/// record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageInfo {
    pub shard_storage: ShardStorageInfo,
    pub cache: StorageCacheInfo,
}

/// Lake-specific payload of a table. The storage record is created on the
/// first bind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LakeStorage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_info: Option<StorageInfo>,
}
