//! Core types: catalog identifiers, column definitions, table schemas.

use serde::{Deserialize, Serialize};

/// Database identifier.
pub type DbId = u64;

/// Table identifier, unique across the catalog.
pub type TableId = u64;

/// Partition identifier.
pub type PartitionId = u64;

/// Materialized index identifier.
pub type IndexId = u64;

/// Tablet identifier. Globally unique; names one external shard.
pub type TabletId = u64;

/// Sequence number of a record in the journal.
pub type JournalId = u64;

/// The value type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Boolean,
    Int,
    BigInt,
    Double,
    Varchar,
    Date,
    Datetime,
}

/// How rows with equal key columns are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KeysType {
    #[default]
    Duplicate,
    Aggregate,
    Unique,
    Primary,
}

/// A column definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    /// Key columns come first in the schema.
    pub is_key: bool,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl Column {
    pub fn key(name: &str, column_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            column_type,
            is_key: true,
            nullable: false,
        }
    }

    pub fn value(name: &str, column_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            column_type,
            is_key: false,
            nullable: true,
        }
    }
}

/// Schema definition for a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<Column>,
    pub keys_type: KeysType,
}

impl TableSchema {
    /// Names of the key columns, in schema order.
    pub fn key_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.is_key)
            .map(|c| c.name.as_str())
            .collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// How a table's rows are split into partitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartitionInfo {
    /// A single implicit partition named after the table.
    Unpartitioned,
    /// Range partitioning on the given columns.
    Range { columns: Vec<String> },
    /// List partitioning on the given columns.
    List { columns: Vec<String> },
}

/// How rows within a partition are spread over tablets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DistributionInfo {
    Hash { columns: Vec<String>, buckets: u32 },
    Random { buckets: u32 },
}

impl DistributionInfo {
    pub fn buckets(&self) -> u32 {
        match self {
            DistributionInfo::Hash { buckets, .. } | DistributionInfo::Random { buckets } => {
                *buckets
            }
        }
    }
}
