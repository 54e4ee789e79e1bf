//! Wire protocol: JSON-over-newlines request/response types.
//!
//! Each request is a single JSON line; each response is a single JSON line.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use shardlake_core::catalog::property::{ShardStorageInfo, StorageInfo};
use shardlake_core::types::{Column, KeysType, TabletId};

/// A request from a client.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    CreateDatabase {
        database: String,
    },
    ListDatabases,
    CreateTable {
        database: String,
        table: TableSpec,
    },
    CreateMaterializedView {
        database: String,
        table: String,
        base_tables: Vec<String>,
        columns: Vec<Column>,
    },
    BindStorage {
        database: String,
        table: String,
        storage: ShardStorageInfo,
        /// Missing cache fields take the configured defaults.
        #[serde(default)]
        enable_cache: Option<bool>,
        #[serde(default)]
        cache_ttl_s: Option<u64>,
    },
    DescribeStorage {
        database: String,
        table: String,
    },
    DescribeTable {
        database: String,
        table: String,
    },
    DropTable {
        database: String,
        table: String,
    },
    ListTables {
        database: String,
    },
    // -- Shard reclamation --
    PendingShards {
        #[serde(default)]
        limit: Option<usize>,
    },
    ConfirmReclaimed {
        tablet_ids: Vec<TabletId>,
    },
    Stats,
}

/// Table kinds a client can create directly. Views go through
/// `create_materialized_view`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKindWire {
    #[default]
    Lake,
    Olap,
}

/// Table definition in wire format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    #[serde(default)]
    pub kind: TableKindWire,
    pub columns: Vec<Column>,
    #[serde(default)]
    pub keys_type: KeysType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partitions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub temp_partitions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buckets: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rollups: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<ShardStorageInfo>,
}

/// Server counters returned by `stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsWire {
    pub databases: usize,
    pub tablets: usize,
    pub pending_shards: usize,
    pub journal_last_id: u64,
}

/// A response sent back to the client.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Response {
    Ok(OkResponse),
    Error(ErrorResponse),
}

/// Successful response variants.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum OkResponse {
    Id {
        ok: bool,
        id: u64,
    },
    Names {
        ok: bool,
        names: Vec<String>,
    },
    Storage {
        ok: bool,
        storage_group: String,
        storage: StorageInfo,
    },
    Table {
        ok: bool,
        table: Value,
    },
    Dropped {
        ok: bool,
        deferred: bool,
    },
    Shards {
        ok: bool,
        tablet_ids: Vec<TabletId>,
    },
    Stats {
        ok: bool,
        stats: StatsWire,
    },
    Empty {
        ok: bool,
    },
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub error: String,
    pub message: String,
}

impl Response {
    pub fn ok_empty() -> Self {
        Response::Ok(OkResponse::Empty { ok: true })
    }

    pub fn ok_id(id: u64) -> Self {
        Response::Ok(OkResponse::Id { ok: true, id })
    }

    pub fn ok_names(names: Vec<String>) -> Self {
        Response::Ok(OkResponse::Names { ok: true, names })
    }

    pub fn ok_storage(storage_group: String, storage: StorageInfo) -> Self {
        Response::Ok(OkResponse::Storage {
            ok: true,
            storage_group,
            storage,
        })
    }

    pub fn ok_table(table: Value) -> Self {
        Response::Ok(OkResponse::Table { ok: true, table })
    }

    pub fn ok_dropped(deferred: bool) -> Self {
        Response::Ok(OkResponse::Dropped { ok: true, deferred })
    }

    pub fn ok_shards(tablet_ids: Vec<TabletId>) -> Self {
        Response::Ok(OkResponse::Shards {
            ok: true,
            tablet_ids,
        })
    }

    pub fn ok_stats(stats: StatsWire) -> Self {
        Response::Ok(OkResponse::Stats { ok: true, stats })
    }

    pub fn error(error: impl Into<String>, message: impl Into<String>) -> Self {
        Response::Error(ErrorResponse {
            ok: false,
            error: error.into(),
            message: message.into(),
        })
    }
}
