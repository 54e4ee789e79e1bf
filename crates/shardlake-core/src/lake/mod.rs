//! Lake tables: cascading drop and the shard deleter.

pub mod cascade;
pub mod shard_deleter;

pub use cascade::{DeferredDrop, DropSummary, LakeContext, drop_table};
pub use shard_deleter::ShardDeleter;
