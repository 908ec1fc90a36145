//! Local record store

use serde::{Deserialize, Serialize};

use crate::models::{LocalId, LocalRecord, RecordRef, RemoteId};

/// Default number of records kept when storage pressure forces pruning
pub const DEFAULT_RECORD_BOUND: usize = 200;

/// The client's working set of records, oldest first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalRecordStore {
    records: Vec<LocalRecord>,
}

impl LocalRecordStore {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    /// Insert a record, replacing one with the same local id
    pub fn upsert(&mut self, record: LocalRecord) {
        match self
            .records
            .iter_mut()
            .find(|existing| existing.local_id == record.local_id)
        {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
    }

    #[must_use]
    pub fn get(&self, target: &RecordRef) -> Option<&LocalRecord> {
        self.records.iter().find(|record| record.matches(target))
    }

    pub fn get_mut(&mut self, target: &RecordRef) -> Option<&mut LocalRecord> {
        self.records.iter_mut().find(|record| record.matches(target))
    }

    #[must_use]
    pub fn get_by_remote(&self, remote_id: &RemoteId) -> Option<&LocalRecord> {
        self.get(&RecordRef::Remote(remote_id.clone()))
    }

    /// Mark the record minted as `local_id` as accepted remotely.
    ///
    /// Returns false when the record is no longer cached (pruned).
    pub fn mark_synced(&mut self, local_id: &LocalId, remote_id: RemoteId) -> bool {
        match self.get_mut(&RecordRef::Local(*local_id)) {
            Some(record) => {
                record.mark_synced(remote_id);
                true
            }
            None => false,
        }
    }

    /// Records in creation order
    pub fn iter(&self) -> impl Iterator<Item = &LocalRecord> {
        self.records.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Shrink the working set to at most `bound` records.
    ///
    /// Synced records are dropped first, oldest first; unsynced records only
    /// go when synced ones alone cannot meet the bound. An unsynced record's
    /// create stays in the operation queue, so pruning never loses a write.
    /// Returns the number of records dropped.
    pub fn prune_to(&mut self, bound: usize) -> usize {
        let excess = self.records.len().saturating_sub(bound);
        if excess == 0 {
            return 0;
        }

        let mut order: Vec<usize> = (0..self.records.len()).collect();
        order.sort_by_key(|&index| {
            let record = &self.records[index];
            (!record.synced, record.created_at)
        });
        let mut drop = vec![false; self.records.len()];
        for &index in order.iter().take(excess) {
            drop[index] = true;
        }

        let mut index = 0;
        self.records.retain(|_| {
            let keep = !drop[index];
            index += 1;
            keep
        });
        excess
    }
}
