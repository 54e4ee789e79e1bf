//! The `Metastore` handle: a clonable, thread-safe entry point to the catalog.
//!
//! Every DDL change is appended to the journal before it is applied, so a
//! replica replaying the journal reaches the same catalog. Deferred drop work
//! is handed back to the caller as a [`DeferredDrop`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::catalog::property::{ShardStorageInfo, StorageCacheInfo, StorageInfo};
use crate::catalog::table::{IndexExtState, Table, TableKind};
use crate::catalog::tablet_index::TabletInvertedIndex;
use crate::codec;
use crate::config::MetastoreConfig;
use crate::error::{CatalogError, Error, StorageError};
use crate::journal::{Journal, JournalRecord};
use crate::lake::{DeferredDrop, LakeContext, ShardDeleter, cascade};
use crate::location::derive_storage_group;
use crate::types::{Column, DbId, JournalId, TableId, TabletId};

use super::builders::TableBuilder;

struct MetastoreInner {
    /// Catalog-wide mutation lock. Writers (DDL on the leader, replay on a
    /// follower) hold it exclusively for the whole command.
    catalog: RwLock<Catalog>,
    ctx: LakeContext,
    config: MetastoreConfig,
    /// Next id handed out for databases, tables, partitions, indices and
    /// tablets. One sequence for all of them.
    next_id: AtomicU64,
}

/// The metastore handle.
///
/// `Metastore` is cheaply clonable (`Arc`-based) and `Send + Sync`. Every
/// mutation is journaled before it is applied; replay applies the same
/// records through [`apply_record`](Self::apply_record).
#[derive(Clone)]
pub struct Metastore {
    inner: Arc<MetastoreInner>,
}

impl Metastore {
    /// Create an empty metastore writing to `journal`.
    pub fn new(journal: Arc<dyn Journal>, config: MetastoreConfig) -> Self {
        Self {
            inner: Arc::new(MetastoreInner {
                catalog: RwLock::new(Catalog::new()),
                ctx: LakeContext::new(journal),
                config,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &MetastoreConfig {
        &self.inner.config
    }

    pub fn tablet_index(&self) -> &TabletInvertedIndex {
        &self.inner.ctx.tablet_index
    }

    pub fn shard_deleter(&self) -> &ShardDeleter {
        &self.inner.ctx.shard_deleter
    }

    pub fn journal(&self) -> &Arc<dyn Journal> {
        &self.inner.ctx.journal
    }

    pub(crate) fn allocate_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Make sure ids up to `id` are never handed out again.
    pub(crate) fn observe_id(&self, id: u64) {
        self.inner.next_id.fetch_max(id + 1, Ordering::SeqCst);
    }

    pub(crate) fn catalog(&self) -> &RwLock<Catalog> {
        &self.inner.catalog
    }

    fn append(&self, record: &JournalRecord) -> Result<JournalId, Error> {
        Ok(self.inner.ctx.journal.append(record)?)
    }

    // -----------------------------------------------------------------------
    // Databases
    // -----------------------------------------------------------------------

    pub fn create_database(&self, name: &str) -> Result<DbId, Error> {
        let mut catalog = self.inner.catalog.write();
        if catalog.database_by_name(name).is_ok() {
            return Err(CatalogError::DatabaseAlreadyExists(name.to_string()).into());
        }
        let db_id = self.allocate_id();
        self.append(&JournalRecord::CreateDatabase {
            db_id,
            name: name.to_string(),
        })?;
        catalog.create_database(db_id, name)?;
        info!(db_id, db = name, "database created");
        Ok(db_id)
    }

    pub fn list_databases(&self) -> Vec<String> {
        self.inner
            .catalog
            .read()
            .databases()
            .map(|db| db.name.clone())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Tables
    // -----------------------------------------------------------------------

    /// Start building a table in database `db`.
    pub fn create_table(&self, db: &str, name: &str) -> TableBuilder<'_> {
        TableBuilder::new(self, db.to_string(), name.to_string())
    }

    /// Create a materialized view over `base_tables` with the given columns.
    /// The view starts active; dropping any base table deactivates it.
    pub fn create_materialized_view(
        &self,
        db: &str,
        name: &str,
        base_tables: &[&str],
        columns: Vec<Column>,
    ) -> Result<TableId, Error> {
        self.create_table(db, name)
            .materialized_view(base_tables)
            .columns(columns)
            .execute()
    }

    /// Journal and register a fully built table. Called by the builder with
    /// the catalog write guard held.
    pub(crate) fn commit_table(
        &self,
        catalog: &mut Catalog,
        db_id: DbId,
        table: Table,
    ) -> Result<TableId, Error> {
        let table_id = table.id;
        let name = table.name.clone();
        self.append(&JournalRecord::CreateTable {
            db_id,
            table: table.clone(),
        })?;
        self.register_table(catalog, db_id, table)?;
        info!(db_id, table_id, table = %name, "table created");
        Ok(table_id)
    }

    /// Insert `table` into the catalog and its tablets into the index.
    fn register_table(&self, catalog: &mut Catalog, db_id: DbId, table: Table) -> Result<(), Error> {
        let db = catalog.database_mut(db_id)?;
        if db.table_by_name(&table.name).is_some() {
            return Err(CatalogError::TableAlreadyExists(table.name).into());
        }

        self.inner.ctx.tablet_index.add_table(db_id, &table)?;
        self.observe_id(max_id(&table));

        if let TableKind::MaterializedView(view) = &table.kind {
            for base_id in &view.base_tables {
                if let Some(base) = db.table_mut(*base_id) {
                    base.related_views.insert(table.id);
                }
            }
        }
        db.add_table(table)?;
        Ok(())
    }

    pub fn list_tables(&self, db: &str) -> Result<Vec<String>, Error> {
        let catalog = self.inner.catalog.read();
        Ok(catalog
            .database_by_name(db)?
            .tables()
            .map(|t| t.name.clone())
            .collect())
    }

    /// A snapshot of the table's current metadata.
    pub fn describe_table(&self, db: &str, table: &str) -> Result<Table, Error> {
        let catalog = self.inner.catalog.read();
        let (db_id, table_id) = resolve(&catalog, db, table)?;
        Ok(catalog.table(db_id, table_id)?.clone())
    }

    // -----------------------------------------------------------------------
    // Storage binding
    // -----------------------------------------------------------------------

    /// Bind `shard_storage` and a cache policy to a lake table, replacing any
    /// previous binding. Returns the table's storage group.
    pub fn bind_storage(
        &self,
        db: &str,
        table: &str,
        shard_storage: &ShardStorageInfo,
        enable_cache: bool,
        cache_ttl_s: u64,
    ) -> Result<String, Error> {
        let mut catalog = self.inner.catalog.write();
        let (db_id, table_id) = resolve(&catalog, db, table)?;

        let target = catalog.table(db_id, table_id)?;
        if !target.is_lake() {
            return Err(StorageError::UnsupportedOperation {
                op: "bind_storage",
                kind: target.kind_name(),
                table_id,
            }
            .into());
        }
        // Validate before journaling so the record always applies.
        derive_storage_group(&shard_storage.object_storage.object_uri, table_id)?;

        self.append(&JournalRecord::BindStorage {
            db_id,
            table_id,
            shard_storage: shard_storage.clone(),
            enable_cache,
            cache_ttl_s,
        })?;

        let target = catalog.table_mut(db_id, table_id)?;
        target.set_storage_info(shard_storage, enable_cache, cache_ttl_s)?;
        let group = target.storage_group()?.to_string();
        info!(db_id, table_id, storage_group = %group, enable_cache, cache_ttl_s, "storage bound");
        Ok(group)
    }

    /// [`bind_storage`](Self::bind_storage) with the cache policy read from
    /// DDL properties, defaulting to the configured policy.
    pub fn bind_storage_with_properties(
        &self,
        db: &str,
        table: &str,
        shard_storage: &ShardStorageInfo,
        properties: &BTreeMap<String, String>,
    ) -> Result<String, Error> {
        let cache = StorageCacheInfo::from_properties(properties, self.inner.config.default_cache())?;
        self.bind_storage(db, table, shard_storage, cache.enable_cache, cache.cache_ttl_s)
    }

    pub fn storage_group(&self, db: &str, table: &str) -> Result<String, Error> {
        let catalog = self.inner.catalog.read();
        let (db_id, table_id) = resolve(&catalog, db, table)?;
        Ok(catalog.table(db_id, table_id)?.storage_group()?.to_string())
    }

    pub fn storage_info(&self, db: &str, table: &str) -> Result<StorageInfo, Error> {
        let catalog = self.inner.catalog.read();
        let (db_id, table_id) = resolve(&catalog, db, table)?;
        let table = catalog.table(db_id, table_id)?;
        Ok(StorageInfo {
            shard_storage: table.shard_storage_info()?.clone(),
            cache: table.storage_cache_info()?,
        })
    }

    // -----------------------------------------------------------------------
    // Drop
    // -----------------------------------------------------------------------

    /// Drop a table.
    ///
    /// The drop is journaled, the table leaves the catalog and its dependent
    /// views are deactivated before this returns. For lake tables the
    /// returned [`DeferredDrop`] purges the tablet index and hands the shards
    /// to the shard deleter; the caller must run it.
    pub fn drop_table(&self, db: &str, table: &str) -> Result<Option<DeferredDrop>, Error> {
        let mut catalog = self.inner.catalog.write();
        let (db_id, table_id) = resolve(&catalog, db, table)?;

        self.append(&JournalRecord::DropTable { db_id, table_id })?;
        let task = cascade::drop_table(catalog.database_mut(db_id)?, table_id, &self.inner.ctx, false)?;
        info!(db_id, table_id, table, deferred = task.is_some(), "table dropped");
        Ok(task)
    }

    /// Record that the objects of `tablet_ids` have been physically deleted.
    pub fn confirm_reclaimed(&self, tablet_ids: &BTreeSet<TabletId>) -> Result<(), Error> {
        if tablet_ids.is_empty() {
            return Ok(());
        }
        self.append(&JournalRecord::RemoveUnusedShards {
            tablet_ids: tablet_ids.clone(),
        })?;
        self.inner.ctx.shard_deleter.remove(tablet_ids);
        debug!(shards = tablet_ids.len(), "shard reclamation confirmed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Persistence and copies
    // -----------------------------------------------------------------------

    /// Encode a table's metadata.
    pub fn persist_table(&self, db: &str, table: &str) -> Result<Vec<u8>, Error> {
        let catalog = self.inner.catalog.read();
        let (db_id, table_id) = resolve(&catalog, db, table)?;
        Ok(codec::encode(catalog.table(db_id, table_id)?)?)
    }

    /// Decode metadata produced by [`persist_table`](Self::persist_table).
    pub fn restore_table(data: &[u8]) -> Result<Table, Error> {
        Ok(codec::decode(data)?)
    }

    /// A detached copy of a table's full metadata.
    pub fn deep_copy_table(&self, db: &str, table: &str) -> Result<Table, Error> {
        let catalog = self.inner.catalog.read();
        let (db_id, table_id) = resolve(&catalog, db, table)?;
        Ok(codec::deep_copy(catalog.table(db_id, table_id)?)?)
    }

    /// A detached copy of a table restricted to `reserved_partitions`, with
    /// its state reset and shadow indices left out.
    pub fn selective_copy_table(
        &self,
        db: &str,
        table: &str,
        reserved_partitions: Option<&[&str]>,
    ) -> Result<Table, Error> {
        let catalog = self.inner.catalog.read();
        let (db_id, table_id) = resolve(&catalog, db, table)?;
        Ok(codec::selective_copy(
            catalog.table(db_id, table_id)?,
            reserved_partitions,
            true,
            IndexExtState::Visible,
        )?)
    }

    // -----------------------------------------------------------------------
    // Replay
    // -----------------------------------------------------------------------

    /// Apply a journal record written by a leader.
    ///
    /// Drops run in replay mode: the catalog and tablet index are cleaned up
    /// but nothing is queued or journaled. Shard hand-offs arrive as their
    /// own records and are mirrored into the shard deleter.
    pub fn apply_record(&self, record: &JournalRecord) -> Result<(), Error> {
        let mut catalog = self.inner.catalog.write();
        match record {
            JournalRecord::CreateDatabase { db_id, name } => {
                catalog.create_database(*db_id, name)?;
                self.observe_id(*db_id);
            }
            JournalRecord::CreateTable { db_id, table } => {
                self.register_table(&mut catalog, *db_id, table.clone())?;
            }
            JournalRecord::BindStorage {
                db_id,
                table_id,
                shard_storage,
                enable_cache,
                cache_ttl_s,
            } => {
                catalog.table_mut(*db_id, *table_id)?.set_storage_info(
                    shard_storage,
                    *enable_cache,
                    *cache_ttl_s,
                )?;
            }
            JournalRecord::DropTable { db_id, table_id } => {
                let db = catalog.database_mut(*db_id)?;
                let task = cascade::drop_table(db, *table_id, &self.inner.ctx, true)?;
                debug_assert!(task.is_none());
            }
            JournalRecord::AddUnusedShards { tablet_ids } => {
                self.inner.ctx.shard_deleter.add_unused_shard_ids(tablet_ids);
            }
            JournalRecord::RemoveUnusedShards { tablet_ids } => {
                self.inner.ctx.shard_deleter.remove(tablet_ids);
            }
        }
        debug!(op = record.op_name(), "journal record applied");
        Ok(())
    }
}

/// Look up `(db_id, table_id)` by name.
fn resolve(catalog: &Catalog, db: &str, table: &str) -> Result<(DbId, TableId), CatalogError> {
    let database = catalog.database_by_name(db)?;
    let table = database
        .table_by_name(table)
        .ok_or_else(|| CatalogError::TableNotFound(format!("{db}.{table}")))?;
    Ok((database.id, table.id))
}

/// Largest id used anywhere in `table`.
fn max_id(table: &Table) -> u64 {
    let mut max = table.id;
    for partition in table.all_partitions() {
        max = max.max(partition.id);
        for index in partition.materialized_indices(IndexExtState::All) {
            max = max.max(index.id);
            for tablet in &index.tablets {
                max = max.max(tablet.id);
            }
        }
    }
    max
}
