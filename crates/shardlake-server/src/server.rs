//! Unix domain socket server that wraps a leader `Metastore`.
//!
//! Each connected client sends JSON-line requests and receives JSON-line
//! responses. DDL is serialized by the metastore's catalog lock. Deferred
//! drop work is queued to a single worker task and run on the blocking pool.
//! The queue is drained before the server exits.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use shardlake_core::api::Metastore;
use shardlake_core::catalog::property::ShardStorageInfo;
use shardlake_core::config::MetastoreConfig;
use shardlake_core::error::Error as CoreError;
use shardlake_core::journal::{FileJournal, ReplayStats, replay_records};
use shardlake_core::lake::DeferredDrop;
use shardlake_core::types::Column;

use crate::protocol::{Request, Response, StatsWire, TableKindWire, TableSpec};

/// Default number of shard ids returned by `pending_shards`.
const DEFAULT_PENDING_LIMIT: usize = 1000;

/// Open the journal at `journal_path` and rebuild the metastore from it.
pub fn open_metastore(
    journal_path: &Path,
    config: MetastoreConfig,
) -> Result<(Metastore, ReplayStats), CoreError> {
    let (journal, records) = FileJournal::open(journal_path, config.journal_sync)?;
    let metastore = Metastore::new(Arc::new(journal), config);
    let stats = replay_records(&metastore, records, 0)?;
    Ok((metastore, stats))
}

/// A shardlake server listening on a Unix socket.
pub struct ShardlakeServer {
    metastore: Metastore,
    socket_path: PathBuf,
}

impl ShardlakeServer {
    pub fn new(metastore: Metastore, socket_path: PathBuf) -> Self {
        Self {
            metastore,
            socket_path,
        }
    }

    /// Run the server, accepting connections until a shutdown signal is received.
    ///
    /// On startup, removes any stale socket file and binds a new one.
    /// On shutdown (SIGINT or SIGTERM), removes the socket file before exiting.
    pub async fn run(&self) -> std::io::Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run the server until `shutdown` completes.
    ///
    /// Shutdown closes every connection, then waits for the drop worker to
    /// finish the drops already queued so their shards reach the journal.
    pub async fn run_until(&self, shutdown: impl Future<Output = ()>) -> std::io::Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        info!(path = %self.socket_path.display(), "server listening");

        let (drops_tx, drops_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_drop_worker(drops_rx));
        let mut connections = JoinSet::new();

        let accept_loop = async {
            loop {
                match listener.accept().await {
                    Ok((stream, _addr)) => {
                        while connections.try_join_next().is_some() {}
                        let metastore = self.metastore.clone();
                        let drops = drops_tx.clone();
                        connections.spawn(async move {
                            if let Err(e) = handle_connection(metastore, drops, stream).await {
                                warn!(error = %e, "connection handler error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "accept error");
                    }
                }
            }
        };

        tokio::select! {
            _ = accept_loop => {}
            _ = shutdown => {
                info!("shutdown signal received");
            }
        }

        // Every sender must go before the worker sees the end of the queue.
        connections.shutdown().await;
        drop(drops_tx);
        if let Err(e) = worker.await {
            error!(error = %e, "drop worker failed");
        }

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(error = %e, "failed to remove socket file on shutdown");
            } else {
                info!(path = %self.socket_path.display(), "socket file removed");
            }
        }

        Ok(())
    }
}

/// Run deferred drops one at a time, in the order the drops happened.
/// Returns once every sender is gone and the queue is empty.
async fn run_drop_worker(mut drops: mpsc::UnboundedReceiver<DeferredDrop>) {
    while let Some(task) = drops.recv().await {
        let table_id = task.table_id();
        match tokio::task::spawn_blocking(move || task.run()).await {
            Ok(Ok(summary)) => info!(
                table_id,
                tablets_purged = summary.tablets_purged,
                shards_queued = summary.shards_queued,
                "deferred drop finished"
            ),
            Ok(Err(e)) => error!(table_id, error = %e, "deferred drop failed"),
            Err(e) => error!(table_id, error = %e, "deferred drop task panicked"),
        }
    }
}

async fn handle_connection(
    metastore: Metastore,
    drops: mpsc::UnboundedSender<DeferredDrop>,
    stream: tokio::net::UnixStream,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(trimmed) {
            Ok(req) => dispatch(&metastore, &drops, req),
            Err(e) => Response::error("ParseError", e.to_string()),
        };

        let mut resp_bytes = match serde_json::to_vec(&response) {
            Ok(bytes) => bytes,
            Err(e) => {
                let fallback = Response::error("SerializationError", e.to_string());
                serde_json::to_vec(&fallback).map_err(std::io::Error::other)?
            }
        };
        resp_bytes.push(b'\n');

        writer.write_all(&resp_bytes).await?;
        writer.flush().await?;
    }

    Ok(())
}

fn dispatch(
    metastore: &Metastore,
    drops: &mpsc::UnboundedSender<DeferredDrop>,
    req: Request,
) -> Response {
    match req {
        Request::CreateDatabase { database } => match metastore.create_database(&database) {
            Ok(id) => Response::ok_id(id),
            Err(e) => core_error_to_response(e),
        },

        Request::ListDatabases => Response::ok_names(metastore.list_databases()),

        Request::CreateTable { database, table } => handle_create_table(metastore, &database, table),

        Request::CreateMaterializedView {
            database,
            table,
            base_tables,
            columns,
        } => handle_create_view(metastore, &database, &table, &base_tables, columns),

        Request::BindStorage {
            database,
            table,
            storage,
            enable_cache,
            cache_ttl_s,
        } => handle_bind_storage(metastore, &database, &table, &storage, enable_cache, cache_ttl_s),

        Request::DescribeStorage { database, table } => {
            match metastore.storage_info(&database, &table) {
                Ok(info) => {
                    let group = info.shard_storage.object_storage.object_uri.clone();
                    Response::ok_storage(group, info)
                }
                Err(e) => core_error_to_response(e),
            }
        }

        Request::DescribeTable { database, table } => {
            match metastore.describe_table(&database, &table) {
                Ok(table) => match serde_json::to_value(&table) {
                    Ok(value) => Response::ok_table(value),
                    Err(e) => Response::error("SerializationError", e.to_string()),
                },
                Err(e) => core_error_to_response(e),
            }
        }

        Request::DropTable { database, table } => handle_drop_table(metastore, drops, &database, &table),

        Request::ListTables { database } => match metastore.list_tables(&database) {
            Ok(names) => Response::ok_names(names),
            Err(e) => core_error_to_response(e),
        },

        Request::PendingShards { limit } => Response::ok_shards(
            metastore
                .shard_deleter()
                .take_batch(limit.unwrap_or(DEFAULT_PENDING_LIMIT)),
        ),

        Request::ConfirmReclaimed { tablet_ids } => {
            let ids = tablet_ids.into_iter().collect();
            match metastore.confirm_reclaimed(&ids) {
                Ok(()) => Response::ok_empty(),
                Err(e) => core_error_to_response(e),
            }
        }

        Request::Stats => Response::ok_stats(StatsWire {
            databases: metastore.list_databases().len(),
            tablets: metastore.tablet_index().len(),
            pending_shards: metastore.shard_deleter().pending_count(),
            journal_last_id: metastore.journal().last_id(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn handle_create_table(metastore: &Metastore, database: &str, spec: TableSpec) -> Response {
    let mut builder = metastore
        .create_table(database, &spec.name)
        .columns(spec.columns)
        .keys_type(spec.keys_type);
    builder = match spec.kind {
        TableKindWire::Lake => builder.lake(),
        TableKindWire::Olap => builder.olap(),
    };
    for name in &spec.partitions {
        builder = builder.partition(name);
    }
    for name in &spec.temp_partitions {
        builder = builder.temp_partition(name);
    }
    if let Some(buckets) = spec.buckets {
        builder = builder.buckets(buckets);
    }
    for name in &spec.rollups {
        builder = builder.rollup(name);
    }
    for (key, value) in &spec.properties {
        builder = builder.property(key, value);
    }
    if let Some(storage) = spec.storage {
        builder = builder.storage(storage);
    }

    match builder.execute() {
        Ok(id) => Response::ok_id(id),
        Err(e) => core_error_to_response(e),
    }
}

fn handle_create_view(
    metastore: &Metastore,
    database: &str,
    table: &str,
    base_tables: &[String],
    columns: Vec<Column>,
) -> Response {
    let bases: Vec<&str> = base_tables.iter().map(String::as_str).collect();
    match metastore.create_materialized_view(database, table, &bases, columns) {
        Ok(id) => Response::ok_id(id),
        Err(e) => core_error_to_response(e),
    }
}

fn handle_bind_storage(
    metastore: &Metastore,
    database: &str,
    table: &str,
    storage: &ShardStorageInfo,
    enable_cache: Option<bool>,
    cache_ttl_s: Option<u64>,
) -> Response {
    let defaults = metastore.config().default_cache();
    let result = metastore.bind_storage(
        database,
        table,
        storage,
        enable_cache.unwrap_or(defaults.enable_cache),
        cache_ttl_s.unwrap_or(defaults.cache_ttl_s),
    );
    match result.and_then(|_| metastore.storage_info(database, table)) {
        Ok(info) => {
            let group = info.shard_storage.object_storage.object_uri.clone();
            Response::ok_storage(group, info)
        }
        Err(e) => core_error_to_response(e),
    }
}

fn handle_drop_table(
    metastore: &Metastore,
    drops: &mpsc::UnboundedSender<DeferredDrop>,
    database: &str,
    table: &str,
) -> Response {
    match metastore.drop_table(database, table) {
        Ok(Some(task)) => {
            if let Err(mpsc::error::SendError(task)) = drops.send(task) {
                // Worker gone (shutting down): finish the drop here.
                warn!(table_id = task.table_id(), "drop worker unavailable, running inline");
                if let Err(e) = task.run() {
                    error!(error = %e, "deferred drop failed");
                }
            }
            Response::ok_dropped(true)
        }
        Ok(None) => Response::ok_dropped(false),
        Err(e) => core_error_to_response(e),
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to register SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}

fn core_error_to_response(err: CoreError) -> Response {
    Response::error(err.kind(), err.to_string())
}

