//! Applying journal records to a metastore: the follower path, and recovery
//! on restart.

use tracing::{error, info};

use crate::api::Metastore;
use crate::error::Error;
use crate::types::JournalId;

use super::JournalRecord;

/// Counts of what a replay applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub applied: usize,
    /// Records at or below the starting id.
    pub skipped: usize,
    pub databases_created: usize,
    pub tables_created: usize,
    pub storage_binds: usize,
    pub tables_dropped: usize,
    /// `AddUnusedShards` and `RemoveUnusedShards` records.
    pub shard_records: usize,
    pub last_id: JournalId,
}

/// Apply `records` in order, skipping ids up to and including `after`.
///
/// Stops at the first record that fails to apply; records before it stay
/// applied.
pub fn replay_records(
    metastore: &Metastore,
    records: impl IntoIterator<Item = (JournalId, JournalRecord)>,
    after: JournalId,
) -> Result<ReplayStats, Error> {
    let mut stats = ReplayStats {
        last_id: after,
        ..Default::default()
    };

    for (id, record) in records {
        if id <= after {
            stats.skipped += 1;
            continue;
        }
        if let Err(e) = metastore.apply_record(&record) {
            error!(id, op = record.op_name(), error = %e, "journal replay failed");
            return Err(e);
        }

        match record {
            JournalRecord::CreateDatabase { .. } => stats.databases_created += 1,
            JournalRecord::CreateTable { .. } => stats.tables_created += 1,
            JournalRecord::BindStorage { .. } => stats.storage_binds += 1,
            JournalRecord::DropTable { .. } => stats.tables_dropped += 1,
            JournalRecord::AddUnusedShards { .. } | JournalRecord::RemoveUnusedShards { .. } => {
                stats.shard_records += 1
            }
        }
        stats.applied += 1;
        stats.last_id = id;
    }

    info!(
        applied = stats.applied,
        skipped = stats.skipped,
        last_id = stats.last_id,
        "journal replayed"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use super::*;
    use crate::catalog::property::{ShardStorageInfo, StorageProvider};
    use crate::config::MetastoreConfig;
    use crate::journal::{Journal, MemoryJournal};
    use crate::types::{Column, ColumnType};

    fn metastore() -> (Metastore, Arc<MemoryJournal>) {
        let journal = Arc::new(MemoryJournal::new());
        (
            Metastore::new(journal.clone(), MetastoreConfig::default()),
            journal,
        )
    }

    /// Leader history: two lake tables and a view over the first, storage
    /// bound, the first table dropped and part of its shards reclaimed.
    fn leader_history() -> (Metastore, Arc<MemoryJournal>, BTreeSet<u64>) {
        let (leader, journal) = metastore();
        leader.create_database("db").unwrap();
        for name in ["orders", "events"] {
            leader
                .create_table("db", name)
                .column(Column::key("id", ColumnType::BigInt))
                .column(Column::value("payload", ColumnType::Varchar))
                .partition("p0")
                .partition("p1")
                .buckets(3)
                .execute()
                .unwrap();
            leader
                .bind_storage(
                    "db",
                    name,
                    &ShardStorageInfo::new(StorageProvider::S3, "s3://bucket/wh"),
                    true,
                    60,
                )
                .unwrap();
        }
        leader
            .create_materialized_view(
                "db",
                "orders_mv",
                &["orders"],
                vec![Column::value("total", ColumnType::Double)],
            )
            .unwrap();

        let dropped = leader
            .describe_table("db", "orders")
            .unwrap()
            .tablet_ids(crate::catalog::table::IndexExtState::All);
        let task = leader.drop_table("db", "orders").unwrap().unwrap();
        task.run().unwrap();

        let reclaimed: BTreeSet<u64> = dropped.iter().copied().take(2).collect();
        leader.confirm_reclaimed(&reclaimed).unwrap();
        (leader, journal, dropped)
    }

    #[test]
    fn test_follower_matches_leader() {
        let (leader, journal, dropped) = leader_history();

        let (follower, follower_journal) = metastore();
        let stats = replay_records(&follower, journal.entries(), 0).unwrap();

        assert_eq!(stats.applied, journal.len());
        assert_eq!(stats.databases_created, 1);
        assert_eq!(stats.tables_created, 3);
        assert_eq!(stats.storage_binds, 2);
        assert_eq!(stats.tables_dropped, 1);
        assert_eq!(stats.shard_records, 2);
        assert_eq!(stats.last_id, journal.last_id());

        assert_eq!(
            follower.list_tables("db").unwrap(),
            leader.list_tables("db").unwrap()
        );
        assert_eq!(
            follower.storage_group("db", "events").unwrap(),
            leader.storage_group("db", "events").unwrap()
        );
        assert_eq!(
            follower.storage_info("db", "events").unwrap(),
            leader.storage_info("db", "events").unwrap()
        );
        assert!(!follower.describe_table("db", "orders_mv").unwrap().is_active());
        assert_eq!(follower.tablet_index().len(), leader.tablet_index().len());
        for id in &dropped {
            assert!(!follower.tablet_index().contains(*id));
        }
        assert_eq!(
            follower.shard_deleter().pending(),
            leader.shard_deleter().pending()
        );
        assert_eq!(follower.shard_deleter().pending_count(), dropped.len() - 2);

        // Replay never writes to the follower's own journal.
        assert!(follower_journal.is_empty());
    }

    #[test]
    fn test_replayed_ids_are_not_reused() {
        let (leader, journal, _) = leader_history();
        let (follower, _) = metastore();
        replay_records(&follower, journal.entries(), 0).unwrap();

        follower
            .create_table("db", "fresh")
            .column(Column::key("id", ColumnType::BigInt))
            .buckets(2)
            .execute()
            .unwrap();
        let fresh = follower.describe_table("db", "fresh").unwrap();
        let newest_leader_id = leader
            .describe_table("db", "orders_mv")
            .unwrap()
            .tablet_ids(crate::catalog::table::IndexExtState::All)
            .into_iter()
            .max()
            .unwrap();
        assert!(fresh.id > newest_leader_id);
        for id in fresh.tablet_ids(crate::catalog::table::IndexExtState::All) {
            assert!(leader.tablet_index().get(id).is_none());
        }
        assert_eq!(follower.tablet_index().count_for_table(fresh.id), 2);
    }

    #[test]
    fn test_skip_up_to_after() {
        let (_, journal, _) = leader_history();
        let entries = journal.entries();
        let (follower, _) = metastore();

        // First record only, then the rest.
        replay_records(&follower, entries.iter().take(1).cloned(), 0).unwrap();
        let stats = replay_records(&follower, entries.clone(), 1).unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.applied, entries.len() - 1);
        assert_eq!(follower.list_tables("db").unwrap().len(), 2);
    }

    #[test]
    fn test_replay_stops_on_bad_record() {
        let (follower, _) = metastore();
        let records = vec![
            (
                1,
                JournalRecord::CreateDatabase {
                    db_id: 1,
                    name: "db".to_string(),
                },
            ),
            (
                2,
                JournalRecord::DropTable {
                    db_id: 1,
                    table_id: 99,
                },
            ),
            (
                3,
                JournalRecord::CreateDatabase {
                    db_id: 2,
                    name: "other".to_string(),
                },
            ),
        ];
        let err = replay_records(&follower, records, 0).unwrap_err();
        assert_eq!(err.kind(), "TableNotFound");
        assert_eq!(follower.list_databases(), vec!["db".to_string()]);
    }
}
