//! Client library for connecting to a `shardlake-server` via Unix socket.
//!
//! Each method serializes a JSON-line request, sends it, reads a JSON-line
//! response, and returns the parsed result.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

use shardlake_core::catalog::property::{ShardStorageInfo, StorageInfo};
use shardlake_core::catalog::table::Table;
use shardlake_core::types::{Column, TabletId};

use crate::error::ClientError;
use crate::protocol::{ErrorResponse, StatsWire, TableSpec};

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Storage binding returned from `bind_storage` and `describe_storage`.
#[derive(Debug, Clone)]
pub struct StorageDescription {
    pub storage_group: String,
    pub storage: StorageInfo,
}

/// Client for a shardlake server.
pub struct ShardlakeClient {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    line_buf: String,
}

impl ShardlakeClient {
    /// Connect to a shardlake server at the given Unix socket path.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let stream = UnixStream::connect(path.as_ref()).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            line_buf: String::new(),
        })
    }

    /// Create a database. Returns its id.
    pub async fn create_database(&mut self, database: &str) -> Result<u64> {
        let req = json!({"op": "create_database", "database": database});
        let resp = self.send_request(&req).await?;
        id_from_response(&resp)
    }

    pub async fn list_databases(&mut self) -> Result<Vec<String>> {
        let resp = self.send_request(&json!({"op": "list_databases"})).await?;
        names_from_response(&resp)
    }

    /// Create a table. Returns its id.
    pub async fn create_table(&mut self, database: &str, table: &TableSpec) -> Result<u64> {
        let req = json!({
            "op": "create_table",
            "database": database,
            "table": table,
        });
        let resp = self.send_request(&req).await?;
        id_from_response(&resp)
    }

    /// Create a materialized view over `base_tables`. Returns its id.
    pub async fn create_materialized_view(
        &mut self,
        database: &str,
        table: &str,
        base_tables: &[&str],
        columns: &[Column],
    ) -> Result<u64> {
        let req = json!({
            "op": "create_materialized_view",
            "database": database,
            "table": table,
            "base_tables": base_tables,
            "columns": columns,
        });
        let resp = self.send_request(&req).await?;
        id_from_response(&resp)
    }

    /// Bind a storage descriptor. `None` cache fields take the server's
    /// defaults.
    pub async fn bind_storage(
        &mut self,
        database: &str,
        table: &str,
        storage: &ShardStorageInfo,
        enable_cache: Option<bool>,
        cache_ttl_s: Option<u64>,
    ) -> Result<StorageDescription> {
        let req = json!({
            "op": "bind_storage",
            "database": database,
            "table": table,
            "storage": storage,
            "enable_cache": enable_cache,
            "cache_ttl_s": cache_ttl_s,
        });
        let resp = self.send_request(&req).await?;
        storage_from_response(&resp)
    }

    pub async fn describe_storage(
        &mut self,
        database: &str,
        table: &str,
    ) -> Result<StorageDescription> {
        let req = json!({"op": "describe_storage", "database": database, "table": table});
        let resp = self.send_request(&req).await?;
        storage_from_response(&resp)
    }

    pub async fn describe_table(&mut self, database: &str, table: &str) -> Result<Table> {
        let req = json!({"op": "describe_table", "database": database, "table": table});
        let resp = self.send_request(&req).await?;
        field_from_response(&resp, "table")
    }

    /// Drop a table. Returns whether part of the drop was deferred to the
    /// server's drop worker.
    pub async fn drop_table(&mut self, database: &str, table: &str) -> Result<bool> {
        let req = json!({"op": "drop_table", "database": database, "table": table});
        let resp = self.send_request(&req).await?;
        field_from_response(&resp, "deferred")
    }

    pub async fn list_tables(&mut self, database: &str) -> Result<Vec<String>> {
        let req = json!({"op": "list_tables", "database": database});
        let resp = self.send_request(&req).await?;
        names_from_response(&resp)
    }

    /// Shard ids waiting for physical reclamation, at most `limit` of them.
    pub async fn pending_shards(&mut self, limit: Option<usize>) -> Result<Vec<TabletId>> {
        let req = json!({"op": "pending_shards", "limit": limit});
        let resp = self.send_request(&req).await?;
        field_from_response(&resp, "tablet_ids")
    }

    /// Report shards whose objects have been deleted.
    pub async fn confirm_reclaimed(&mut self, tablet_ids: &[TabletId]) -> Result<()> {
        let req = json!({"op": "confirm_reclaimed", "tablet_ids": tablet_ids});
        let resp = self.send_request(&req).await?;
        check_error(&resp)
    }

    pub async fn stats(&mut self) -> Result<StatsWire> {
        let resp = self.send_request(&json!({"op": "stats"})).await?;
        field_from_response(&resp, "stats")
    }

    /// Send a raw JSON request and return the raw response.
    pub async fn send_request(&mut self, req: &Value) -> Result<Value> {
        let mut data = serde_json::to_vec(req).map_err(ClientError::Serialization)?;
        data.push(b'\n');
        self.writer.write_all(&data).await?;
        self.writer.flush().await?;

        self.line_buf.clear();
        let n = self.reader.read_line(&mut self.line_buf).await?;
        if n == 0 {
            return Err(ClientError::Disconnected);
        }

        let resp: Value =
            serde_json::from_str(self.line_buf.trim()).map_err(ClientError::Serialization)?;
        Ok(resp)
    }
}

// ---------------------------------------------------------------------------
// Response parsing helpers
// ---------------------------------------------------------------------------

fn check_error(resp: &Value) -> Result<()> {
    if resp.get("ok").and_then(|v| v.as_bool()) == Some(true) {
        return Ok(());
    }
    let error = resp
        .get("error")
        .and_then(|e| e.as_str())
        .unwrap_or("Unknown")
        .to_string();
    let message = resp
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("")
        .to_string();
    Err(ClientError::Server(ErrorResponse {
        ok: false,
        error,
        message,
    }))
}

fn field_from_response<T: DeserializeOwned>(resp: &Value, field: &str) -> Result<T> {
    check_error(resp)?;
    let value = resp
        .get(field)
        .ok_or_else(|| ClientError::Protocol(format!("missing '{field}' in response")))?;
    serde_json::from_value(value.clone()).map_err(ClientError::Serialization)
}

fn id_from_response(resp: &Value) -> Result<u64> {
    field_from_response(resp, "id")
}

fn names_from_response(resp: &Value) -> Result<Vec<String>> {
    field_from_response(resp, "names")
}

fn storage_from_response(resp: &Value) -> Result<StorageDescription> {
    Ok(StorageDescription {
        storage_group: field_from_response(resp, "storage_group")?,
        storage: field_from_response(resp, "storage")?,
    })
}
