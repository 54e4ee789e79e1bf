//! Cascading table drop.
//!
//! A drop moves through
//! `Requested → DependentsDeactivated → IndexPurged → ShardsQueued → Journaled`.
//! The first two steps run inline. The rest is captured in a
//! [`DeferredDrop`]: the leader hands it to its caller for scheduling, a
//! replaying node runs it inline with the shard steps switched off. Only the
//! leader queues shards for reclamation and journals that it did, so every
//! shard is accounted for exactly once across replicas.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::catalog::Database;
use crate::catalog::table::{IndexExtState, Table, TableKind};
use crate::catalog::tablet_index::TabletInvertedIndex;
use crate::error::{CatalogError, Error};
use crate::journal::{Journal, JournalRecord};
use crate::types::{TableId, TabletId};

use super::shard_deleter::ShardDeleter;

/// Shared structures a drop touches after the table has left the catalog.
#[derive(Clone)]
pub struct LakeContext {
    pub tablet_index: Arc<TabletInvertedIndex>,
    pub shard_deleter: Arc<ShardDeleter>,
    pub journal: Arc<dyn Journal>,
}

impl LakeContext {
    pub fn new(journal: Arc<dyn Journal>) -> Self {
        Self {
            tablet_index: Arc::new(TabletInvertedIndex::new()),
            shard_deleter: Arc::new(ShardDeleter::new()),
            journal,
        }
    }
}

/// What a completed drop did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DropSummary {
    pub table_id: TableId,
    /// Tablet index entries actually removed.
    pub tablets_purged: usize,
    /// Shard ids handed to the shard deleter (0 when replaying).
    pub shards_queued: usize,
}

/// The part of a drop that runs after the table is gone from the catalog.
#[must_use = "a deferred drop does nothing until it is run"]
pub struct DeferredDrop {
    table: Table,
    replay: bool,
    ctx: LakeContext,
}

impl std::fmt::Debug for DeferredDrop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredDrop")
            .field("table_id", &self.table.id)
            .field("table", &self.table.name)
            .field("replay", &self.replay)
            .finish()
    }
}

impl DeferredDrop {
    pub fn table_id(&self) -> TableId {
        self.table.id
    }

    pub fn table_name(&self) -> &str {
        &self.table.name
    }

    /// Purge the tablet index, then (leader only) queue the shards and
    /// journal the hand-off.
    ///
    /// A journal failure is returned: without the record followers would
    /// never learn about the queued shards.
    pub fn run(self) -> Result<DropSummary, Error> {
        let table = &self.table;
        let index = &self.ctx.tablet_index;

        let mut tablet_ids: BTreeSet<TabletId> = BTreeSet::new();
        let mut purged = 0usize;
        for partition in table.all_partitions() {
            for materialized in partition.materialized_indices(IndexExtState::All) {
                for tablet in &materialized.tablets {
                    if index.delete_tablet(tablet.id) {
                        purged += 1;
                    }
                    tablet_ids.insert(tablet.id);
                }
            }
        }
        debug!(
            table_id = table.id,
            tablets = tablet_ids.len(),
            purged,
            replay = self.replay,
            "tablet index purged"
        );

        let mut summary = DropSummary {
            table_id: table.id,
            tablets_purged: purged,
            shards_queued: 0,
        };

        if self.replay || !table.kind.capability().reclaims_shards() {
            return Ok(summary);
        }

        self.ctx.shard_deleter.add_unused_shard_ids(&tablet_ids);
        summary.shards_queued = tablet_ids.len();

        self.ctx
            .journal
            .append(&JournalRecord::AddUnusedShards { tablet_ids })?;

        info!(
            table_id = table.id,
            table = %table.name,
            shards = summary.shards_queued,
            "dropped lake table shards queued for reclamation"
        );
        Ok(summary)
    }
}

/// Drop `table_id` from `db`.
///
/// The table leaves the catalog before anything else happens, so no lookup
/// sees it half dropped. Dependent views are then forced inactive. With
/// `replay = false` on a lake table the remaining work is returned for the
/// caller to schedule; otherwise it runs before this returns.
pub fn drop_table(
    db: &mut Database,
    table_id: TableId,
    ctx: &LakeContext,
    replay: bool,
) -> Result<Option<DeferredDrop>, Error> {
    let table = db
        .forget_table(table_id)
        .ok_or_else(|| CatalogError::table_not_found(table_id))?;

    deactivate_dependents(db, &table);
    if let TableKind::MaterializedView(view) = &table.kind {
        for base_id in &view.base_tables {
            if let Some(base) = db.table_mut(*base_id) {
                base.related_views.remove(&table.id);
            }
        }
    }

    let task = DeferredDrop {
        table,
        replay,
        ctx: ctx.clone(),
    };

    if replay || !task.table.kind.capability().reclaims_shards() {
        task.run()?;
        return Ok(None);
    }
    Ok(Some(task))
}

fn deactivate_dependents(db: &mut Database, table: &Table) {
    for view_id in &table.related_views {
        if db.deactivate_view(*view_id) {
            debug!(table_id = table.id, view_id, "dependent view deactivated");
        } else {
            debug!(table_id = table.id, view_id, "dependent view already gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::table::tests::{lake, make_table};
    use crate::catalog::table::{IndexState, MaterializedIndex, Tablet, ViewState};
    use crate::journal::MemoryJournal;

    struct Fixture {
        db: Database,
        ctx: LakeContext,
        journal: Arc<MemoryJournal>,
    }

    /// A database with one lake table (id 10, 3 partitions × 4 tablets), a
    /// shadow index on the first partition (2 tablets) and one temporary
    /// partition (4 tablets): 18 tablets in total.
    fn fixture() -> Fixture {
        let journal = Arc::new(MemoryJournal::new());
        let ctx = LakeContext::new(journal.clone());
        let mut db = Database::new(1, "lake");

        let mut next = 1000;
        let mut table = make_table(10, lake(), 3, 4, &mut next);
        let first = table.partitions.values_mut().next().unwrap();
        first.indices.insert(
            next,
            MaterializedIndex {
                id: next,
                name: "shadow".to_string(),
                state: IndexState::Shadow,
                tablets: vec![Tablet { id: next + 1 }, Tablet { id: next + 2 }],
            },
        );
        next += 3;
        table.temp_partitions = make_table(99, lake(), 1, 4, &mut next).partitions;

        ctx.tablet_index.add_table(1, &table).unwrap();
        db.add_table(table).unwrap();

        Fixture { db, ctx, journal }
    }

    fn add_view(db: &mut Database, id: TableId, base: TableId, next: &mut u64) {
        let view = make_table(
            id,
            TableKind::MaterializedView(ViewState {
                base_tables: vec![base],
                active: true,
            }),
            1,
            1,
            next,
        );
        db.add_table(view).unwrap();
        db.table_mut(base).unwrap().related_views.insert(id);
    }

    #[test]
    fn test_leader_drop_is_deferred() {
        let mut f = fixture();
        let total = f.ctx.tablet_index.len();
        assert_eq!(total, 18);

        let task = drop_table(&mut f.db, 10, &f.ctx, false)
            .unwrap()
            .expect("lake drop on the leader is deferred");

        // Forgotten immediately; index untouched until the task runs.
        assert!(f.db.table(10).is_none());
        assert!(f.db.table_by_name("t10").is_none());
        assert_eq!(f.ctx.tablet_index.len(), total);
        assert_eq!(f.ctx.shard_deleter.pending_count(), 0);
        assert!(f.journal.is_empty());
        assert_eq!(task.table_id(), 10);

        let summary = task.run().unwrap();
        assert_eq!(
            summary,
            DropSummary {
                table_id: 10,
                tablets_purged: 18,
                shards_queued: 18,
            }
        );
        assert!(f.ctx.tablet_index.is_empty());
        assert_eq!(f.ctx.shard_deleter.pending_count(), 18);

        let records = f.journal.unused_shard_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0], f.ctx.shard_deleter.pending());
        assert_eq!(f.journal.len(), 1);
    }

    #[test]
    fn test_replay_drop_only_purges_index() {
        let mut f = fixture();

        let task = drop_table(&mut f.db, 10, &f.ctx, true).unwrap();
        assert!(task.is_none());

        assert!(f.db.table(10).is_none());
        assert!(f.ctx.tablet_index.is_empty());
        assert_eq!(f.ctx.shard_deleter.pending_count(), 0);
        assert!(f.journal.is_empty());
    }

    #[test]
    fn test_dependents_deactivated_and_missing_tolerated() {
        let mut f = fixture();
        let mut next = 5000;
        add_view(&mut f.db, 20, 10, &mut next);
        add_view(&mut f.db, 21, 10, &mut next);
        add_view(&mut f.db, 22, 10, &mut next);
        // A dependent that was already removed.
        f.db.table_mut(10).unwrap().related_views.insert(23);

        let task = drop_table(&mut f.db, 10, &f.ctx, false).unwrap().unwrap();
        for id in [20, 21, 22] {
            assert!(!f.db.table(id).unwrap().is_active(), "view {id}");
        }
        task.run().unwrap();
    }

    #[test]
    fn test_replay_deactivates_dependents_too() {
        let mut f = fixture();
        let mut next = 5000;
        add_view(&mut f.db, 20, 10, &mut next);

        drop_table(&mut f.db, 10, &f.ctx, true).unwrap();
        assert!(!f.db.table(20).unwrap().is_active());
    }

    #[test]
    fn test_journal_failure_surfaces() {
        let mut f = fixture();
        f.journal.set_fail_appends(true);

        let task = drop_table(&mut f.db, 10, &f.ctx, false).unwrap().unwrap();
        let err = task.run().unwrap_err();
        assert!(matches!(err, Error::Journal(_)));
        // Queued before the append was attempted.
        assert_eq!(f.ctx.shard_deleter.pending_count(), 18);
    }

    #[test]
    fn test_drop_missing_table() {
        let mut f = fixture();
        let err = drop_table(&mut f.db, 77, &f.ctx, false).unwrap_err();
        assert!(matches!(err, Error::Catalog(CatalogError::TableNotFound(_))));
        assert_eq!(f.ctx.tablet_index.len(), 18);
    }

    #[test]
    fn test_olap_drop_never_queues_shards() {
        let journal = Arc::new(MemoryJournal::new());
        let ctx = LakeContext::new(journal.clone());
        let mut db = Database::new(1, "local");
        let table = make_table(30, TableKind::Olap, 2, 2, &mut 100);
        ctx.tablet_index.add_table(1, &table).unwrap();
        db.add_table(table).unwrap();

        assert!(drop_table(&mut db, 30, &ctx, false).unwrap().is_none());
        assert!(ctx.tablet_index.is_empty());
        assert_eq!(ctx.shard_deleter.pending_count(), 0);
        assert!(journal.is_empty());
    }

    #[test]
    fn test_view_drop_unlinks_from_base() {
        let mut f = fixture();
        let mut next = 5000;
        add_view(&mut f.db, 20, 10, &mut next);
        f.ctx
            .tablet_index
            .add_table(1, f.db.table(20).unwrap())
            .unwrap();

        assert!(drop_table(&mut f.db, 20, &f.ctx, false).unwrap().is_none());
        assert!(f.db.table(10).unwrap().related_views.is_empty());
        assert_eq!(f.ctx.tablet_index.len(), 18);
    }

    #[test]
    fn test_shared_tablet_ids_deduplicated() {
        // Two indices referencing the same tablet yield one queued id.
        let journal = Arc::new(MemoryJournal::new());
        let ctx = LakeContext::new(journal.clone());
        let mut db = Database::new(1, "lake");
        let mut table = make_table(40, lake(), 1, 2, &mut 100);
        let partition = table.partitions.values_mut().next().unwrap();
        let base_tablets = partition.base_index().unwrap().tablets.clone();
        partition.indices.insert(
            500,
            MaterializedIndex {
                id: 500,
                name: "alias".to_string(),
                state: IndexState::Normal,
                tablets: base_tablets,
            },
        );
        db.add_table(table).unwrap();

        let summary = drop_table(&mut db, 40, &ctx, false)
            .unwrap()
            .unwrap()
            .run()
            .unwrap();
        assert_eq!(summary.shards_queued, 2);
        assert_eq!(journal.unused_shard_records()[0].len(), 2);
    }
}
