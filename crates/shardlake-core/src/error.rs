//! Error types for all shardlake operations.

use std::io;
use thiserror::Error;

use crate::types::{DbId, TableId, TabletId};

/// Top-level error type for shardlake operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Short, stable name of the error kind (used on the wire).
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Storage(e) => match e {
                StorageError::InvalidStorageLocation { .. } => "InvalidStorageLocation",
                StorageError::StoragePolicyMissing { .. } => "StoragePolicyMissing",
                StorageError::InvalidProperty { .. } => "InvalidProperty",
                StorageError::UnsupportedOperation { .. } => "UnsupportedOperation",
            },
            Error::Codec(e) => match e {
                CodecError::CorruptMetadata(_) => "CorruptMetadata",
                CodecError::CopyFailed { .. } => "CopyFailed",
            },
            Error::Catalog(e) => match e {
                CatalogError::DatabaseNotFound(_) => "DatabaseNotFound",
                CatalogError::DatabaseAlreadyExists(_) => "DatabaseAlreadyExists",
                CatalogError::TableNotFound(_) => "TableNotFound",
                CatalogError::TableAlreadyExists(_) => "TableAlreadyExists",
                CatalogError::DuplicateTablet(_) => "DuplicateTablet",
                CatalogError::UnknownBaseTable(_) => "UnknownBaseTable",
                CatalogError::InvalidDefinition(_) => "InvalidDefinition",
            },
            Error::Journal(_) => "JournalError",
            Error::Config(_) => "ConfigError",
            Error::Io(_) => "IoError",
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid storage path [{path}]: {reason}")]
    InvalidStorageLocation { path: String, reason: String },

    #[error("storage info not set for table {table_id}")]
    StoragePolicyMissing { table_id: TableId },

    #[error("invalid property '{key}': {reason}")]
    InvalidProperty { key: String, reason: String },

    #[error("operation '{op}' is not supported on {kind} table {table_id}")]
    UnsupportedOperation {
        op: &'static str,
        kind: &'static str,
        table_id: TableId,
    },
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("corrupt table metadata: {0}")]
    CorruptMetadata(String),

    #[error("failed to copy table '{table}': {reason}")]
    CopyFailed { table: String, reason: String },
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("database not found: {0}")]
    DatabaseNotFound(String),

    #[error("database already exists: {0}")]
    DatabaseAlreadyExists(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("table already exists: {0}")]
    TableAlreadyExists(String),

    #[error("tablet {0} is already registered")]
    DuplicateTablet(TabletId),

    #[error("base table does not exist: {0}")]
    UnknownBaseTable(String),

    #[error("invalid table definition: {0}")]
    InvalidDefinition(String),
}

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupted journal at offset {offset}: {reason}")]
    Corrupted { offset: u64, reason: String },

    #[error("journal file is locked")]
    Locked,

    #[error("failed to serialize journal record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("journal unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read { path: String, source: io::Error },

    #[error("invalid config: {0}")]
    Parse(String),
}

impl CatalogError {
    pub(crate) fn db_not_found(db_id: DbId) -> Self {
        CatalogError::DatabaseNotFound(format!("id={db_id}"))
    }

    pub(crate) fn table_not_found(table_id: TableId) -> Self {
        CatalogError::TableNotFound(format!("id={table_id}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
