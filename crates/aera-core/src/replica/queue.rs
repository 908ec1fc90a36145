//! Operation queue with latest-wins collapse for field updates

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::models::{LocalId, OpId, QueuedOperation, RecordField, RecordRef, RemoteId};

/// Result of [`OperationQueue::enqueue`]
#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    /// Added at the tail
    Appended,
    /// Replaced an older update for the same target and field, in place
    Collapsed { replaced: OpId },
}

/// Ordered list of pending remote mutations (FIFO)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationQueue {
    entries: Vec<QueuedOperation>,
}

impl OperationQueue {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Add an operation.
    ///
    /// An update whose `(target, field)` is already queued replaces the older
    /// entry at its position. Creates are always appended.
    pub fn enqueue(&mut self, op: QueuedOperation) -> EnqueueOutcome {
        let key = op
            .collapse_key()
            .map(|(target, field)| (target.clone(), field));
        if let Some((target, field)) = key {
            if let Some(existing) = self
                .entries
                .iter_mut()
                .find(|entry| entry.collapse_key() == Some((&target, field)))
            {
                let replaced = existing.op_id;
                *existing = op;
                return EnqueueOutcome::Collapsed { replaced };
            }
        }
        self.entries.push(op);
        EnqueueOutcome::Appended
    }

    /// Entries in enqueue order
    #[must_use]
    pub fn list(&self) -> &[QueuedOperation] {
        &self.entries
    }

    /// Replace the whole queue. Updates sharing a target and field collapse
    /// the same way `enqueue` would collapse them.
    pub fn replace_all(&mut self, remaining: Vec<QueuedOperation>) {
        self.entries = remaining;
        self.merge_duplicate_updates();
    }

    /// Remove the given entries, keeping the order of the rest.
    /// Ids that are no longer queued are ignored.
    pub fn remove(&mut self, op_ids: &HashSet<OpId>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| !op_ids.contains(&entry.op_id));
        before - self.entries.len()
    }

    /// Rewrite every entry addressed to `local_id` to address `remote_id`.
    ///
    /// Keeps collapse keys consistent once a record has synced: a later
    /// update addressed by remote id must collapse with one queued while the
    /// record was still local.
    pub fn retarget(&mut self, local_id: &LocalId, remote_id: &RemoteId) -> usize {
        let local = RecordRef::Local(*local_id);
        let mut rewritten = 0;
        for entry in &mut self.entries {
            if entry.target == local {
                entry.target = RecordRef::Remote(remote_id.clone());
                rewritten += 1;
            }
        }
        if rewritten > 0 {
            self.merge_duplicate_updates();
        }
        rewritten
    }

    /// Whether a create for `local_id` is still pending
    #[must_use]
    pub fn has_pending_create(&self, local_id: &LocalId) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.is_create() && entry.target.as_local() == Some(local_id))
    }

    /// Entries addressed to `target`, in order
    pub fn pending_for<'a>(
        &'a self,
        target: &'a RecordRef,
    ) -> impl Iterator<Item = &'a QueuedOperation> + 'a {
        self.entries.iter().filter(move |entry| &entry.target == target)
    }

    /// Whether an update of `field` on `target` is queued
    #[must_use]
    pub fn has_pending_update(&self, target: &RecordRef, field: RecordField) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.collapse_key() == Some((target, field)))
    }

    /// Whether any entry addresses `target`
    #[must_use]
    pub fn has_pending_for(&self, target: &RecordRef) -> bool {
        self.entries.iter().any(|entry| &entry.target == target)
    }

    /// Drop the pending create for `local_id`, returning it
    pub fn take_create(&mut self, local_id: &LocalId) -> Option<QueuedOperation> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.is_create() && entry.target.as_local() == Some(local_id))?;
        Some(self.entries.remove(index))
    }

    #[must_use]
    pub fn get(&self, op_id: &OpId) -> Option<&QueuedOperation> {
        self.entries.iter().find(|entry| entry.op_id == *op_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// After retargeting, two updates may share a key; keep the newer value
    /// at the older position.
    fn merge_duplicate_updates(&mut self) {
        let mut merged: Vec<QueuedOperation> = Vec::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            let duplicate = entry.collapse_key().and_then(|key| {
                merged
                    .iter()
                    .position(|kept| kept.collapse_key() == Some(key))
            });
            match duplicate {
                Some(index) => merged[index] = entry,
                None => merged.push(entry),
            }
        }
        self.entries = merged;
    }
}
