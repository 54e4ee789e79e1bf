use std::collections::BTreeSet;

use parking_lot::Mutex;

use crate::types::TabletId;

/// Tracks shards of dropped lake tables that still await physical
/// reclamation.
///
/// Drops on the leader add ids here; an external reclamation worker takes
/// batches, deletes the objects, and confirms them through the metastore so
/// the removal is journaled. Followers rebuild the same set from the journal.
pub struct ShardDeleter {
    unused: Mutex<BTreeSet<TabletId>>,
}

impl ShardDeleter {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self {
            unused: Mutex::new(BTreeSet::new()),
        }
    }

    /// Queue shard ids for reclamation. Ids already queued are kept once.
    pub fn add_unused_shard_ids(&self, ids: &BTreeSet<TabletId>) {
        if !ids.is_empty() {
            self.unused.lock().extend(ids.iter().copied());
        }
    }

    /// Remove reclaimed shard ids. Unknown ids are ignored.
    pub fn remove(&self, ids: &BTreeSet<TabletId>) {
        let mut unused = self.unused.lock();
        for id in ids {
            unused.remove(id);
        }
    }

    /// Up to `limit` pending ids, lowest first. Nothing is removed.
    pub fn take_batch(&self, limit: usize) -> Vec<TabletId> {
        self.unused.lock().iter().take(limit).copied().collect()
    }

    /// Snapshot of every pending id.
    pub fn pending(&self) -> BTreeSet<TabletId> {
        self.unused.lock().clone()
    }

    /// Return the number of pending shard ids.
    pub fn pending_count(&self) -> usize {
        self.unused.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: TabletId) -> bool {
        self.unused.lock().contains(&id)
    }
}

impl Default for ShardDeleter {
    fn default() -> Self {
        Self::new()
    }
}
