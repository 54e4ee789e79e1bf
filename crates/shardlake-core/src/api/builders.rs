//! Builder for `Metastore::create_table`.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::catalog::property::{LakeStorage, ShardStorageInfo, StorageCacheInfo};
use crate::catalog::table::{
    IndexState, MaterializedIndex, Partition, Table, TableKind, TableState, Tablet, ViewState,
};
use crate::error::{CatalogError, Error};
use crate::types::{Column, DistributionInfo, KeysType, PartitionInfo, TableId, TableSchema};

use super::metastore::Metastore;

// ---------------------------------------------------------------------------
// TableBuilder
// ---------------------------------------------------------------------------

enum KindSpec {
    Olap,
    Lake,
    MaterializedView(Vec<String>),
}

/// Builder for creating a new table.
///
/// Defaults to a lake table with a single partition named after the table,
/// hash-distributed on the key columns into one bucket.
pub struct TableBuilder<'a> {
    metastore: &'a Metastore,
    db: String,
    name: String,
    kind: KindSpec,
    columns: Vec<Column>,
    keys_type: KeysType,
    partition_columns: Option<Vec<String>>,
    partitions: Vec<String>,
    temp_partitions: Vec<String>,
    distribution_columns: Option<Vec<String>>,
    random_distribution: bool,
    buckets: u32,
    rollups: Vec<String>,
    properties: BTreeMap<String, String>,
    storage: Option<ShardStorageInfo>,
}

impl<'a> TableBuilder<'a> {
    pub(crate) fn new(metastore: &'a Metastore, db: String, name: String) -> Self {
        Self {
            metastore,
            db,
            name,
            kind: KindSpec::Lake,
            columns: Vec::new(),
            keys_type: KeysType::default(),
            partition_columns: None,
            partitions: Vec::new(),
            temp_partitions: Vec::new(),
            distribution_columns: None,
            random_distribution: false,
            buckets: 1,
            rollups: Vec::new(),
            properties: BTreeMap::new(),
            storage: None,
        }
    }

    /// Shard-backed table (the default).
    pub fn lake(mut self) -> Self {
        self.kind = KindSpec::Lake;
        self
    }

    /// Table stored on local replicas.
    pub fn olap(mut self) -> Self {
        self.kind = KindSpec::Olap;
        self
    }

    /// Materialized view over tables of the same database.
    pub fn materialized_view(mut self, base_tables: &[&str]) -> Self {
        self.kind = KindSpec::MaterializedView(base_tables.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn columns(mut self, columns: impl IntoIterator<Item = Column>) -> Self {
        self.columns.extend(columns);
        self
    }

    pub fn keys_type(mut self, keys_type: KeysType) -> Self {
        self.keys_type = keys_type;
        self
    }

    /// Range-partition on `columns`. Defaults to the first key column when
    /// partitions are named without this.
    pub fn partition_by(mut self, columns: &[&str]) -> Self {
        self.partition_columns = Some(columns.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn partition(mut self, name: &str) -> Self {
        self.partitions.push(name.to_string());
        self
    }

    pub fn temp_partition(mut self, name: &str) -> Self {
        self.temp_partitions.push(name.to_string());
        self
    }

    /// Hash-distribute on `columns` instead of the key columns.
    pub fn distributed_by(mut self, columns: &[&str]) -> Self {
        self.distribution_columns = Some(columns.iter().map(|s| s.to_string()).collect());
        self.random_distribution = false;
        self
    }

    pub fn random_distribution(mut self) -> Self {
        self.random_distribution = true;
        self
    }

    /// Tablets per materialized index.
    pub fn buckets(mut self, buckets: u32) -> Self {
        self.buckets = buckets;
        self
    }

    /// Add a rollup index to every partition.
    pub fn rollup(mut self, name: &str) -> Self {
        self.rollups.push(name.to_string());
        self
    }

    pub fn property(mut self, key: &str, value: &str) -> Self {
        self.properties.insert(key.to_string(), value.to_string());
        self
    }

    /// Bind a storage descriptor at creation. The cache policy comes from the
    /// table properties, or the configured defaults.
    pub fn storage(mut self, shard_storage: ShardStorageInfo) -> Self {
        self.storage = Some(shard_storage);
        self
    }

    /// Execute the table creation. Returns the new table id.
    pub fn execute(self) -> Result<TableId, Error> {
        let schema = TableSchema {
            columns: self.columns.clone(),
            keys_type: self.keys_type,
        };
        let needs_keys = !matches!(self.kind, KindSpec::MaterializedView(_));
        validate_schema(&schema, needs_keys)?;
        let partition_info = self.partition_info(&schema)?;
        let distribution = self.distribution(&schema)?;
        self.validate_names()?;

        let cache = match self.kind {
            KindSpec::Lake => Some(StorageCacheInfo::from_properties(
                &self.properties,
                self.metastore.config().default_cache(),
            )?),
            _ => {
                if self.storage.is_some() {
                    return Err(invalid("only lake tables take a storage descriptor"));
                }
                None
            }
        };

        let metastore = self.metastore;
        let mut catalog = metastore.catalog().write();

        let (db_id, kind) = {
            let database = catalog.database_by_name(&self.db)?;
            if database.table_by_name(&self.name).is_some() {
                return Err(CatalogError::TableAlreadyExists(self.name).into());
            }
            let kind = match &self.kind {
                KindSpec::Olap => TableKind::Olap,
                KindSpec::Lake => TableKind::Lake(LakeStorage::default()),
                KindSpec::MaterializedView(bases) => {
                    if bases.is_empty() {
                        return Err(invalid("a materialized view needs a base table"));
                    }
                    let base_tables = bases
                        .iter()
                        .map(|base| {
                            database
                                .table_by_name(base)
                                .map(|t| t.id)
                                .ok_or_else(|| CatalogError::UnknownBaseTable(base.clone()))
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    TableKind::MaterializedView(ViewState {
                        base_tables,
                        active: true,
                    })
                }
            };
            (database.id, kind)
        };

        let table_id = metastore.allocate_id();
        let partition_names = if self.partitions.is_empty() {
            vec![self.name.clone()]
        } else {
            self.partitions.clone()
        };
        let partitions = self.allocate_partitions(&partition_names);
        let temp_partitions = self.allocate_partitions(&self.temp_partitions);

        let mut table = Table {
            id: table_id,
            name: self.name,
            schema,
            partition_info,
            distribution,
            state: TableState::Normal,
            partitions,
            temp_partitions,
            properties: self.properties,
            related_views: BTreeSet::new(),
            kind,
        };
        if let (Some(shard_storage), Some(cache)) = (&self.storage, cache) {
            table.set_storage_info(shard_storage, cache.enable_cache, cache.cache_ttl_s)?;
        }

        metastore.commit_table(&mut catalog, db_id, table)
    }

    fn partition_info(&self, schema: &TableSchema) -> Result<PartitionInfo, Error> {
        if self.partitions.is_empty() && self.temp_partitions.is_empty() {
            if self.partition_columns.is_some() {
                return Err(invalid("partition columns given without partitions"));
            }
            return Ok(PartitionInfo::Unpartitioned);
        }
        let columns = match &self.partition_columns {
            Some(columns) => columns.clone(),
            None => match schema.key_columns().first() {
                Some(first) => vec![first.to_string()],
                None => return Err(invalid("partitioned table needs a key column")),
            },
        };
        check_columns_exist(schema, &columns)?;
        Ok(PartitionInfo::Range { columns })
    }

    fn distribution(&self, schema: &TableSchema) -> Result<DistributionInfo, Error> {
        if self.buckets == 0 {
            return Err(invalid("bucket count must be positive"));
        }
        if self.random_distribution {
            return Ok(DistributionInfo::Random {
                buckets: self.buckets,
            });
        }
        let columns = match &self.distribution_columns {
            Some(columns) => columns.clone(),
            None => schema.key_columns().iter().map(|c| c.to_string()).collect(),
        };
        if columns.is_empty() {
            return Ok(DistributionInfo::Random {
                buckets: self.buckets,
            });
        }
        check_columns_exist(schema, &columns)?;
        Ok(DistributionInfo::Hash {
            columns,
            buckets: self.buckets,
        })
    }

    fn validate_names(&self) -> Result<(), Error> {
        let mut partitions = HashSet::new();
        for name in self.partitions.iter().chain(&self.temp_partitions) {
            if !partitions.insert(name.as_str()) {
                return Err(invalid(&format!("duplicate partition '{name}'")));
            }
        }
        let mut indices = HashSet::from([self.name.as_str()]);
        for name in &self.rollups {
            if !indices.insert(name.as_str()) {
                return Err(invalid(&format!("duplicate index '{name}'")));
            }
        }
        Ok(())
    }

    /// Create partitions with fresh ids: a base index plus one index per
    /// rollup, each with `buckets` tablets.
    fn allocate_partitions(&self, names: &[String]) -> BTreeMap<u64, Partition> {
        let metastore = self.metastore;
        let mut partitions = BTreeMap::new();
        for name in names {
            let partition_id = metastore.allocate_id();
            let mut indices = BTreeMap::new();
            let mut base_index_id = 0;
            for (i, index_name) in std::iter::once(&self.name).chain(&self.rollups).enumerate() {
                let index_id = metastore.allocate_id();
                if i == 0 {
                    base_index_id = index_id;
                }
                let tablets = (0..self.buckets)
                    .map(|_| Tablet {
                        id: metastore.allocate_id(),
                    })
                    .collect();
                indices.insert(
                    index_id,
                    MaterializedIndex {
                        id: index_id,
                        name: index_name.clone(),
                        state: IndexState::Normal,
                        tablets,
                    },
                );
            }
            partitions.insert(
                partition_id,
                Partition {
                    id: partition_id,
                    name: name.clone(),
                    base_index_id,
                    indices,
                },
            );
        }
        partitions
    }
}

fn invalid(reason: &str) -> Error {
    CatalogError::InvalidDefinition(reason.to_string()).into()
}

fn validate_schema(schema: &TableSchema, needs_keys: bool) -> Result<(), Error> {
    if schema.columns.is_empty() {
        return Err(invalid("table has no columns"));
    }
    let mut seen = HashSet::new();
    for column in &schema.columns {
        if !seen.insert(column.name.as_str()) {
            return Err(invalid(&format!("duplicate column '{}'", column.name)));
        }
    }
    if needs_keys && schema.key_columns().is_empty() {
        return Err(invalid("table needs at least one key column"));
    }
    Ok(())
}

fn check_columns_exist(schema: &TableSchema, columns: &[String]) -> Result<(), Error> {
    for name in columns {
        if schema.column(name).is_none() {
            return Err(invalid(&format!("unknown column '{name}'")));
        }
    }
    Ok(())
}
