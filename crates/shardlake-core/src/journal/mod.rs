//! Metadata journal: the ordered log of catalog mutations that followers
//! replay and a restarting node recovers from.

pub mod file;
pub mod lock;
pub mod replay;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::catalog::property::ShardStorageInfo;
use crate::catalog::table::Table;
use crate::error::JournalError;
use crate::types::{DbId, JournalId, TableId, TabletId};

pub use file::FileJournal;
pub use replay::{ReplayStats, replay_records};

/// One catalog mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalRecord {
    CreateDatabase {
        db_id: DbId,
        name: String,
    },
    CreateTable {
        db_id: DbId,
        table: Table,
    },
    BindStorage {
        db_id: DbId,
        table_id: TableId,
        shard_storage: ShardStorageInfo,
        enable_cache: bool,
        cache_ttl_s: u64,
    },
    DropTable {
        db_id: DbId,
        table_id: TableId,
    },
    /// Shards of a dropped lake table handed to the shard deleter.
    AddUnusedShards {
        tablet_ids: BTreeSet<TabletId>,
    },
    /// Shards whose objects have been physically deleted.
    RemoveUnusedShards {
        tablet_ids: BTreeSet<TabletId>,
    },
}

impl JournalRecord {
    pub fn op_name(&self) -> &'static str {
        match self {
            JournalRecord::CreateDatabase { .. } => "create_database",
            JournalRecord::CreateTable { .. } => "create_table",
            JournalRecord::BindStorage { .. } => "bind_storage",
            JournalRecord::DropTable { .. } => "drop_table",
            JournalRecord::AddUnusedShards { .. } => "add_unused_shards",
            JournalRecord::RemoveUnusedShards { .. } => "remove_unused_shards",
        }
    }
}

/// Append-only, ordered sink for journal records.
///
/// An append that returns `Ok` is durable according to the journal's sync
/// policy and will be seen by replay.
pub trait Journal: Send + Sync {
    fn append(&self, record: &JournalRecord) -> Result<JournalId, JournalError>;

    /// Id of the last appended record, 0 when empty.
    fn last_id(&self) -> JournalId;
}

/// A journal kept in memory. Used by tests and by embedders that replicate
/// records themselves.
#[derive(Default)]
pub struct MemoryJournal {
    records: Mutex<Vec<JournalRecord>>,
    fail_appends: AtomicBool,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following append fail (or succeed again).
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<JournalRecord> {
        self.records.lock().clone()
    }

    /// Records paired with their ids, as replay consumes them.
    pub fn entries(&self) -> Vec<(JournalId, JournalRecord)> {
        self.records
            .lock()
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, r)| (i as JournalId + 1, r))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// The tablet id sets of every `AddUnusedShards` record, in order.
    pub fn unused_shard_records(&self) -> Vec<BTreeSet<TabletId>> {
        self.records
            .lock()
            .iter()
            .filter_map(|r| match r {
                JournalRecord::AddUnusedShards { tablet_ids } => Some(tablet_ids.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Journal for MemoryJournal {
    fn append(&self, record: &JournalRecord) -> Result<JournalId, JournalError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(JournalError::Unavailable("appends disabled".to_string()));
        }
        let mut records = self.records.lock();
        records.push(record.clone());
        Ok(records.len() as JournalId)
    }

    fn last_id(&self) -> JournalId {
        self.records.lock().len() as JournalId
    }
}
