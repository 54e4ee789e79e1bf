//! # shardlake
//!
//! Catalog lifecycle core for tables whose data lives in an external shard
//! service ("lake" tables).
//!
//! The crate binds storage descriptors to tables, derives each table's
//! storage group, cascades drops through the tablet index and the
//! shard-deletion accumulator, and journals every mutation so a follower
//! (or a restarting node) can replay it.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use shardlake_core::api::Metastore;
//! use shardlake_core::catalog::property::{ShardStorageInfo, StorageProvider};
//! use shardlake_core::config::MetastoreConfig;
//! use shardlake_core::journal::MemoryJournal;
//! use shardlake_core::types::{Column, ColumnType};
//!
//! let metastore = Metastore::new(Arc::new(MemoryJournal::new()), MetastoreConfig::default());
//! metastore.create_database("sales").unwrap();
//!
//! metastore
//!     .create_table("sales", "orders")
//!     .column(Column::key("order_id", ColumnType::BigInt))
//!     .column(Column::value("amount", ColumnType::Double))
//!     .buckets(4)
//!     .execute()
//!     .unwrap();
//!
//! let group = metastore
//!     .bind_storage(
//!         "sales",
//!         "orders",
//!         &ShardStorageInfo::new(StorageProvider::S3, "s3://bucket/warehouse"),
//!         true,
//!         3600,
//!     )
//!     .unwrap();
//! assert!(group.starts_with("s3://bucket/warehouse/"));
//!
//! // The returned work item purges the tablet index and queues the shards.
//! if let Some(task) = metastore.drop_table("sales", "orders").unwrap() {
//!     task.run().unwrap();
//! }
//! ```

pub mod api;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod error;
pub mod journal;
pub mod lake;
pub mod location;
pub mod types;
