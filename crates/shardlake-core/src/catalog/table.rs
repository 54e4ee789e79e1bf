//! Table model: tables, partitions, materialized indices, tablets.
//!
//! Fields shared by every table live on [`Table`]; what differs per kind
//! lives in the [`TableKind`] payload and is reached through the
//! [`StorageCapability`] trait.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::location::derive_storage_group;
use crate::types::{
    DistributionInfo, IndexId, PartitionId, PartitionInfo, TableId, TableSchema, TabletId,
};

use super::property::{LakeStorage, ShardStorageInfo, StorageCacheInfo, StorageInfo};

/// A reference to one external shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tablet {
    pub id: TabletId,
}

/// State of a materialized index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IndexState {
    #[default]
    Normal,
    /// Being built by an in-flight schema change or rollup job. Not visible
    /// to queries, but its tablets exist.
    Shadow,
}

/// Which indices of a partition a walk should see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexExtState {
    Visible,
    All,
}

/// One physical layout (base or rollup) of a partition's data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializedIndex {
    pub id: IndexId,
    pub name: String,
    #[serde(default)]
    pub state: IndexState,
    pub tablets: Vec<Tablet>,
}

/// A range or bucket of a table's data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub id: PartitionId,
    pub name: String,
    pub base_index_id: IndexId,
    pub indices: BTreeMap<IndexId, MaterializedIndex>,
}

impl Partition {
    /// Indices of this partition, filtered by `ext`.
    pub fn materialized_indices(&self, ext: IndexExtState) -> Vec<&MaterializedIndex> {
        self.indices
            .values()
            .filter(|idx| ext == IndexExtState::All || idx.state == IndexState::Normal)
            .collect()
    }

    pub fn base_index(&self) -> Option<&MaterializedIndex> {
        self.indices.get(&self.base_index_id)
    }

    /// Remove every shadow index.
    pub(crate) fn drop_shadow_indices(&mut self) {
        self.indices.retain(|_, idx| idx.state == IndexState::Normal);
    }
}

/// Overall state of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TableState {
    #[default]
    Normal,
    SchemaChange,
    Rollup,
}

/// State owned by a materialized view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewState {
    pub base_tables: Vec<TableId>,
    pub active: bool,
}

/// Kind of a table together with its kind-specific payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum TableKind {
    /// Tablets stored on local replicas.
    Olap,
    /// Tablets stored as shards in object storage.
    Lake(LakeStorage),
    /// A derived table maintained from base tables.
    MaterializedView(ViewState),
}

impl TableKind {
    /// Tag naming this kind in encoded metadata.
    pub fn tag(&self) -> &'static str {
        match self {
            TableKind::Olap => "OLAP",
            TableKind::Lake(_) => "LAKE",
            TableKind::MaterializedView(_) => "MATERIALIZED_VIEW",
        }
    }

    pub fn capability(&self) -> &dyn StorageCapability {
        match self {
            TableKind::Lake(lake) => lake,
            TableKind::Olap | TableKind::MaterializedView(_) => &LocalStorage,
        }
    }
}

/// Storage behavior that differs per table kind.
pub trait StorageCapability {
    /// Whether tablets of a dropped table are handed to the shard deleter for
    /// asynchronous physical reclamation.
    fn reclaims_shards(&self) -> bool;

    /// The bound storage descriptor, if this kind has one and it is set.
    fn storage_info(&self) -> Option<&StorageInfo>;
}

impl StorageCapability for LakeStorage {
    fn reclaims_shards(&self) -> bool {
        true
    }

    fn storage_info(&self) -> Option<&StorageInfo> {
        self.storage_info.as_ref()
    }
}

/// Payload-free capability of tables whose replicas are local.
struct LocalStorage;

impl StorageCapability for LocalStorage {
    fn reclaims_shards(&self) -> bool {
        false
    }

    fn storage_info(&self) -> Option<&StorageInfo> {
        None
    }
}

/// A catalog table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub id: TableId,
    pub name: String,
    pub schema: TableSchema,
    pub partition_info: PartitionInfo,
    pub distribution: DistributionInfo,
    #[serde(default)]
    pub state: TableState,
    pub partitions: BTreeMap<PartitionId, Partition>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub temp_partitions: BTreeMap<PartitionId, Partition>,
    /// Free-form DDL properties.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
    /// Materialized views built on top of this table.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub related_views: BTreeSet<TableId>,
    pub kind: TableKind,
}

impl Table {
    /// Regular and temporary partitions.
    pub fn all_partitions(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.values().chain(self.temp_partitions.values())
    }

    pub fn partition_by_name(&self, name: &str) -> Option<&Partition> {
        self.partitions.values().find(|p| p.name == name)
    }

    /// Every tablet id reachable from this table, deduplicated.
    pub fn tablet_ids(&self, ext: IndexExtState) -> BTreeSet<TabletId> {
        let mut ids = BTreeSet::new();
        for partition in self.all_partitions() {
            for index in partition.materialized_indices(ext) {
                ids.extend(index.tablets.iter().map(|t| t.id));
            }
        }
        ids
    }

    pub fn is_lake(&self) -> bool {
        matches!(self.kind, TableKind::Lake(_))
    }

    pub fn kind_name(&self) -> &'static str {
        self.kind.tag()
    }

    /// Bind the storage descriptor.
    ///
    /// The object URI of `shard_storage` is replaced by the storage group of
    /// this table, then the descriptor and cache policy replace whatever was
    /// bound before.
    pub fn set_storage_info(
        &mut self,
        shard_storage: &ShardStorageInfo,
        enable_cache: bool,
        cache_ttl_s: u64,
    ) -> Result<(), StorageError> {
        let table_id = self.id;
        let kind = self.kind.tag();
        let TableKind::Lake(lake) = &mut self.kind else {
            return Err(StorageError::UnsupportedOperation {
                op: "set_storage_info",
                kind,
                table_id,
            });
        };

        let storage_group =
            derive_storage_group(&shard_storage.object_storage.object_uri, table_id)?;

        lake.storage_info = Some(StorageInfo {
            shard_storage: shard_storage.with_object_uri(storage_group),
            cache: StorageCacheInfo::new(enable_cache, cache_ttl_s),
        });
        Ok(())
    }

    fn storage_info(&self) -> Result<&StorageInfo, StorageError> {
        self.kind
            .capability()
            .storage_info()
            .ok_or(StorageError::StoragePolicyMissing { table_id: self.id })
    }

    /// The effective object storage URI of this table.
    pub fn storage_group(&self) -> Result<&str, StorageError> {
        Ok(&self.storage_info()?.shard_storage.object_storage.object_uri)
    }

    pub fn shard_storage_info(&self) -> Result<&ShardStorageInfo, StorageError> {
        Ok(&self.storage_info()?.shard_storage)
    }

    pub fn storage_cache_info(&self) -> Result<StorageCacheInfo, StorageError> {
        Ok(self.storage_info()?.cache)
    }

    /// Mark this materialized view active or inactive. No-op on other kinds.
    pub fn set_active(&mut self, active: bool) -> bool {
        match &mut self.kind {
            TableKind::MaterializedView(view) => {
                view.active = active;
                true
            }
            _ => false,
        }
    }

    pub fn is_active(&self) -> bool {
        match &self.kind {
            TableKind::MaterializedView(view) => view.active,
            _ => true,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::property::StorageProvider;
    use crate::types::{Column, ColumnType, KeysType};

    /// Build a table with `partitions` partitions, each with a base index of
    /// `buckets` tablets. Ids are allocated from `next_id`.
    pub(crate) fn make_table(
        id: TableId,
        kind: TableKind,
        partitions: usize,
        buckets: usize,
        next_id: &mut u64,
    ) -> Table {
        let mut parts = BTreeMap::new();
        for p in 0..partitions {
            let pid = *next_id;
            let iid = *next_id + 1;
            *next_id += 2;
            let tablets = (0..buckets)
                .map(|_| {
                    let t = Tablet { id: *next_id };
                    *next_id += 1;
                    t
                })
                .collect();
            let mut indices = BTreeMap::new();
            indices.insert(
                iid,
                MaterializedIndex {
                    id: iid,
                    name: format!("t{id}"),
                    state: IndexState::Normal,
                    tablets,
                },
            );
            parts.insert(
                pid,
                Partition {
                    id: pid,
                    name: format!("p{p}"),
                    base_index_id: iid,
                    indices,
                },
            );
        }

        Table {
            id,
            name: format!("t{id}"),
            schema: TableSchema {
                columns: vec![
                    Column::key("k1", ColumnType::BigInt),
                    Column::value("v1", ColumnType::Varchar),
                ],
                keys_type: KeysType::Duplicate,
            },
            partition_info: PartitionInfo::Range {
                columns: vec!["k1".to_string()],
            },
            distribution: DistributionInfo::Hash {
                columns: vec!["k1".to_string()],
                buckets: buckets as u32,
            },
            state: TableState::Normal,
            partitions: parts,
            temp_partitions: BTreeMap::new(),
            properties: BTreeMap::new(),
            related_views: BTreeSet::new(),
            kind,
        }
    }

    pub(crate) fn lake() -> TableKind {
        TableKind::Lake(LakeStorage::default())
    }

    #[test]
    fn test_storage_missing_before_bind() {
        let table = make_table(10, lake(), 1, 1, &mut 100);
        match table.storage_group() {
            Err(StorageError::StoragePolicyMissing { table_id }) => assert_eq!(table_id, 10),
            other => panic!("expected StoragePolicyMissing, got {other:?}"),
        }
        assert!(table.storage_cache_info().is_err());
    }

    #[test]
    fn test_set_storage_info_scopes_uri_by_table_id() {
        let mut table = make_table(10, lake(), 1, 1, &mut 100);
        let info = ShardStorageInfo::new(StorageProvider::S3, "s3://bucket/svc");
        table.set_storage_info(&info, true, 60).unwrap();

        assert_eq!(table.storage_group().unwrap(), "s3://bucket/svc/10/");
        assert_eq!(
            table.storage_cache_info().unwrap(),
            StorageCacheInfo::new(true, 60)
        );
        assert_eq!(
            table.shard_storage_info().unwrap().provider,
            StorageProvider::S3
        );
    }

    #[test]
    fn test_rebind_overwrites() {
        let mut table = make_table(10, lake(), 1, 1, &mut 100);
        let first = ShardStorageInfo::new(StorageProvider::S3, "s3://bucket/a");
        let mut second = ShardStorageInfo::new(StorageProvider::S3, "s3://other/b");
        second.params.insert("region".to_string(), "eu-central-1".to_string());

        table.set_storage_info(&first, true, 30).unwrap();
        table.set_storage_info(&second, false, 90).unwrap();

        assert_eq!(table.storage_group().unwrap(), "s3://other/b/10/");
        assert_eq!(
            table.storage_cache_info().unwrap(),
            StorageCacheInfo::new(false, 90)
        );
        assert_eq!(table.shard_storage_info().unwrap().params, second.params);
    }

    #[test]
    fn test_invalid_uri_leaves_previous_binding() {
        let mut table = make_table(10, lake(), 1, 1, &mut 100);
        let good = ShardStorageInfo::new(StorageProvider::S3, "s3://bucket");
        table.set_storage_info(&good, true, 30).unwrap();

        let bad = ShardStorageInfo::new(StorageProvider::S3, "bucket");
        assert!(matches!(
            table.set_storage_info(&bad, false, 0),
            Err(StorageError::InvalidStorageLocation { .. })
        ));
        assert_eq!(table.storage_group().unwrap(), "s3://bucket/10/");
    }

    #[test]
    fn test_bind_on_olap_unsupported() {
        let mut table = make_table(10, TableKind::Olap, 1, 1, &mut 100);
        let info = ShardStorageInfo::new(StorageProvider::S3, "s3://bucket");
        assert!(matches!(
            table.set_storage_info(&info, true, 0),
            Err(StorageError::UnsupportedOperation { .. })
        ));
    }

    #[test]
    fn test_tablet_ids_include_shadow_and_temp() {
        let mut next = 100;
        let mut table = make_table(10, lake(), 2, 3, &mut next);

        let partition = table.partitions.values_mut().next().unwrap();
        partition.indices.insert(
            900,
            MaterializedIndex {
                id: 900,
                name: "shadow".to_string(),
                state: IndexState::Shadow,
                tablets: vec![Tablet { id: 901 }, Tablet { id: 902 }],
            },
        );
        let temp = make_table(11, lake(), 1, 2, &mut next);
        table.temp_partitions = temp.partitions;

        assert_eq!(table.tablet_ids(IndexExtState::Visible).len(), 2 * 3 + 2);
        assert_eq!(table.tablet_ids(IndexExtState::All).len(), 2 * 3 + 2 + 2);
    }
}
