//! Integration tests for shardlake-server: start server, connect client, verify ops.

use serde_json::json;
use tempfile::tempdir;
use tokio::sync::oneshot;
use tokio::time::{Duration, sleep};

use shardlake_core::catalog::property::{ShardStorageInfo, StorageCacheInfo, StorageProvider};
use shardlake_core::config::MetastoreConfig;
use shardlake_core::types::{Column, ColumnType};
use shardlake_server::client::ShardlakeClient;
use shardlake_server::protocol::{StatsWire, TableKindWire, TableSpec};
use shardlake_server::server::{ShardlakeServer, open_metastore};

/// Start a server on a temp socket and return the socket path.
/// The server runs in a background tokio task.
async fn start_test_server() -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempdir().unwrap();
    let journal_path = dir.path().join("meta.journal");
    let socket_path = dir.path().join("test.sock");

    let (metastore, _) = open_metastore(&journal_path, MetastoreConfig::default()).unwrap();
    let server = ShardlakeServer::new(metastore, socket_path.clone());

    tokio::spawn(async move {
        server.run().await.unwrap();
    });

    // Give the server a moment to bind.
    sleep(Duration::from_millis(50)).await;

    (dir, socket_path)
}

fn lake_spec(name: &str, partitions: &[&str], buckets: u32) -> TableSpec {
    TableSpec {
        name: name.to_string(),
        kind: TableKindWire::Lake,
        columns: vec![
            Column::key("id", ColumnType::BigInt),
            Column::value("payload", ColumnType::Varchar),
        ],
        partitions: partitions.iter().map(|p| p.to_string()).collect(),
        buckets: Some(buckets),
        ..Default::default()
    }
}

fn s3(uri: &str) -> ShardStorageInfo {
    ShardStorageInfo::new(StorageProvider::S3, uri)
}

/// Poll `stats` until `done` holds, for up to a second.
async fn wait_for_stats(client: &mut ShardlakeClient, done: impl Fn(&StatsWire) -> bool) -> StatsWire {
    for _ in 0..100 {
        let stats = client.stats().await.unwrap();
        if done(&stats) {
            return stats;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_create_bind_describe() {
    let (_dir, sock) = start_test_server().await;
    let mut client = ShardlakeClient::connect(&sock).await.unwrap();

    client.create_database("sales").await.unwrap();
    assert_eq!(client.list_databases().await.unwrap(), vec!["sales"]);

    let table_id = client
        .create_table("sales", &lake_spec("orders", &["p0", "p1"], 2))
        .await
        .unwrap();
    assert_eq!(client.list_tables("sales").await.unwrap(), vec!["orders"]);

    let bound = client
        .bind_storage("sales", "orders", &s3("s3://bucket/wh"), Some(true), Some(60))
        .await
        .unwrap();
    assert_eq!(bound.storage_group, format!("s3://bucket/wh/{table_id}/"));

    // Rebind: the second TTL wins; the default cache flag fills the gap.
    client
        .bind_storage("sales", "orders", &s3("s3://bucket/wh"), None, Some(120))
        .await
        .unwrap();
    let described = client.describe_storage("sales", "orders").await.unwrap();
    assert_eq!(described.storage_group, bound.storage_group);
    assert_eq!(described.storage.cache, StorageCacheInfo::new(true, 120));

    let table = client.describe_table("sales", "orders").await.unwrap();
    assert_eq!(table.id, table_id);
    assert_eq!(table.partitions.len(), 2);
    assert_eq!(table.storage_group().unwrap(), bound.storage_group);

    let stats = client.stats().await.unwrap();
    assert_eq!(stats.databases, 1);
    assert_eq!(stats.tablets, 4);
}

#[tokio::test]
async fn test_drop_runs_deferred_work() {
    let (_dir, sock) = start_test_server().await;
    let mut client = ShardlakeClient::connect(&sock).await.unwrap();

    client.create_database("db").await.unwrap();
    client
        .create_table("db", &lake_spec("orders", &["p0", "p1", "p2"], 4))
        .await
        .unwrap();
    client
        .create_table(
            "db",
            &TableSpec {
                kind: TableKindWire::Olap,
                ..lake_spec("local", &[], 3)
            },
        )
        .await
        .unwrap();
    assert_eq!(client.stats().await.unwrap().tablets, 15);

    assert!(client.drop_table("db", "orders").await.unwrap());
    assert_eq!(client.list_tables("db").await.unwrap(), vec!["local"]);

    let stats = wait_for_stats(&mut client, |s| s.pending_shards == 12).await;
    assert_eq!(stats.tablets, 3);

    // Local tables purge inline and never queue shards.
    assert!(!client.drop_table("db", "local").await.unwrap());
    let stats = client.stats().await.unwrap();
    assert_eq!(stats.tablets, 0);
    assert_eq!(stats.pending_shards, 12);

    let batch = client.pending_shards(Some(5)).await.unwrap();
    assert_eq!(batch.len(), 5);
    client.confirm_reclaimed(&batch).await.unwrap();
    assert_eq!(client.stats().await.unwrap().pending_shards, 7);
}

#[tokio::test]
async fn test_drop_deactivates_view() {
    let (_dir, sock) = start_test_server().await;
    let mut client = ShardlakeClient::connect(&sock).await.unwrap();

    client.create_database("db").await.unwrap();
    client
        .create_table("db", &lake_spec("orders", &[], 1))
        .await
        .unwrap();
    client
        .create_materialized_view(
            "db",
            "orders_mv",
            &["orders"],
            &[Column::value("total", ColumnType::Double)],
        )
        .await
        .unwrap();
    assert!(client.describe_table("db", "orders_mv").await.unwrap().is_active());

    client.drop_table("db", "orders").await.unwrap();
    assert!(!client.describe_table("db", "orders_mv").await.unwrap().is_active());
}

#[tokio::test]
async fn test_errors() {
    let (_dir, sock) = start_test_server().await;
    let mut client = ShardlakeClient::connect(&sock).await.unwrap();

    client.create_database("db").await.unwrap();
    client
        .create_table("db", &lake_spec("orders", &[], 1))
        .await
        .unwrap();

    let err = client
        .bind_storage("db", "orders", &s3("bucket/10/"), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.server_kind(), Some("InvalidStorageLocation"));

    let err = client.describe_storage("db", "orders").await.unwrap_err();
    assert_eq!(err.server_kind(), Some("StoragePolicyMissing"));

    let err = client.drop_table("db", "ghost").await.unwrap_err();
    assert_eq!(err.server_kind(), Some("TableNotFound"));

    let err = client
        .create_table("db", &lake_spec("orders", &[], 1))
        .await
        .unwrap_err();
    assert_eq!(err.server_kind(), Some("TableAlreadyExists"));

    let err = client
        .create_materialized_view("db", "mv", &["ghost"], &[Column::value("x", ColumnType::Int)])
        .await
        .unwrap_err();
    assert_eq!(err.server_kind(), Some("UnknownBaseTable"));

    let resp = client
        .send_request(&json!({"op": "no_such_op"}))
        .await
        .unwrap();
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"], "ParseError");

    // The connection survives errors.
    assert_eq!(client.list_tables("db").await.unwrap(), vec!["orders"]);
}

#[test]
fn test_recovery_from_journal() {
    let dir = tempdir().unwrap();
    let journal_path = dir.path().join("meta.journal");

    let (group, dropped) = {
        let (metastore, stats) = open_metastore(&journal_path, MetastoreConfig::default()).unwrap();
        assert_eq!(stats.applied, 0);

        metastore.create_database("db").unwrap();
        for name in ["orders", "events"] {
            metastore
                .create_table("db", name)
                .column(Column::key("id", ColumnType::BigInt))
                .partition("p0")
                .buckets(2)
                .storage(s3("s3://bucket/wh"))
                .execute()
                .unwrap();
        }
        let dropped = metastore
            .describe_table("db", "orders")
            .unwrap()
            .tablet_ids(shardlake_core::catalog::table::IndexExtState::All);
        metastore
            .drop_table("db", "orders")
            .unwrap()
            .unwrap()
            .run()
            .unwrap();
        (metastore.storage_group("db", "events").unwrap(), dropped)
    };

    let (metastore, stats) = open_metastore(&journal_path, MetastoreConfig::default()).unwrap();
    assert_eq!(stats.tables_created, 2);
    assert_eq!(stats.tables_dropped, 1);
    assert_eq!(metastore.list_tables("db").unwrap(), vec!["events"]);
    assert_eq!(metastore.storage_group("db", "events").unwrap(), group);
    assert_eq!(metastore.tablet_index().len(), 2);
    assert_eq!(metastore.shard_deleter().pending(), dropped);

    // The journal stays locked while the metastore is open.
    match open_metastore(&journal_path, MetastoreConfig::default()) {
        Err(err) => assert_eq!(err.kind(), "JournalError"),
        Ok(_) => panic!("expected the journal to be locked"),
    }
}

#[tokio::test]
async fn test_shutdown_finishes_queued_drops() {
    let dir = tempdir().unwrap();
    let journal_path = dir.path().join("meta.journal");
    let socket_path = dir.path().join("test.sock");

    let (metastore, _) = open_metastore(&journal_path, MetastoreConfig::default()).unwrap();
    let server = ShardlakeServer::new(metastore, socket_path.clone());
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        server
            .run_until(async {
                stop_rx.await.ok();
            })
            .await
    });
    sleep(Duration::from_millis(50)).await;

    let mut client = ShardlakeClient::connect(&socket_path).await.unwrap();
    client.create_database("db").await.unwrap();
    let names = ["t0", "t1", "t2", "t3"];
    for name in names {
        client
            .create_table("db", &lake_spec(name, &["p0", "p1"], 3))
            .await
            .unwrap();
    }
    for name in names {
        assert!(client.drop_table("db", name).await.unwrap());
    }

    // Shut down right after the drops, with the client still connected.
    stop_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
    assert!(!socket_path.exists());

    let (metastore, stats) = open_metastore(&journal_path, MetastoreConfig::default()).unwrap();
    assert_eq!(stats.tables_dropped, 4);
    assert!(metastore.list_tables("db").unwrap().is_empty());
    assert_eq!(metastore.tablet_index().len(), 0);
    assert_eq!(metastore.shard_deleter().pending_count(), 24);
}
