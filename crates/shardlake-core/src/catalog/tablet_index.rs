//! Tablet inverted index: tablet id → owning table coordinates.
//!
//! Query threads look tablets up while DDL adds and purges entries, so the
//! map sits behind its own lock. A lookup racing a purge sees the entry
//! either whole or not at all.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::catalog::table::{IndexExtState, Table};
use crate::error::CatalogError;
use crate::types::{DbId, IndexId, PartitionId, TableId, TabletId};

/// Where a tablet lives in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TabletMeta {
    pub db_id: DbId,
    pub table_id: TableId,
    pub partition_id: PartitionId,
    pub index_id: IndexId,
}

#[derive(Default)]
pub struct TabletInvertedIndex {
    tablets: RwLock<HashMap<TabletId, TabletMeta>>,
}

impl TabletInvertedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one tablet. Tablet ids are unique across the catalog.
    pub fn add_tablet(&self, tablet_id: TabletId, meta: TabletMeta) -> Result<(), CatalogError> {
        let mut tablets = self.tablets.write();
        if tablets.contains_key(&tablet_id) {
            return Err(CatalogError::DuplicateTablet(tablet_id));
        }
        tablets.insert(tablet_id, meta);
        Ok(())
    }

    /// Register every tablet of `table`, including shadow indices.
    ///
    /// All-or-nothing: on a duplicate nothing is inserted.
    pub fn add_table(&self, db_id: DbId, table: &Table) -> Result<usize, CatalogError> {
        let mut entries = Vec::new();
        for partition in table.all_partitions() {
            for index in partition.materialized_indices(IndexExtState::All) {
                for tablet in &index.tablets {
                    entries.push((
                        tablet.id,
                        TabletMeta {
                            db_id,
                            table_id: table.id,
                            partition_id: partition.id,
                            index_id: index.id,
                        },
                    ));
                }
            }
        }

        let mut tablets = self.tablets.write();
        let mut seen = HashSet::with_capacity(entries.len());
        for (id, _) in &entries {
            if tablets.contains_key(id) || !seen.insert(*id) {
                return Err(CatalogError::DuplicateTablet(*id));
            }
        }
        let count = entries.len();
        tablets.extend(entries);
        Ok(count)
    }

    /// Remove a tablet. Returns whether it was present.
    pub fn delete_tablet(&self, tablet_id: TabletId) -> bool {
        self.tablets.write().remove(&tablet_id).is_some()
    }

    pub fn get(&self, tablet_id: TabletId) -> Option<TabletMeta> {
        self.tablets.read().get(&tablet_id).copied()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, tablet_id: TabletId) -> bool {
        self.tablets.read().contains_key(&tablet_id)
    }

    pub fn len(&self) -> usize {
        self.tablets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tablets.read().is_empty()
    }

    /// Number of tablets registered for `table_id`.
    #[cfg(test)]
    pub(crate) fn count_for_table(&self, table_id: TableId) -> usize {
        self.tablets
            .read()
            .values()
            .filter(|m| m.table_id == table_id)
            .count()
    }
}
