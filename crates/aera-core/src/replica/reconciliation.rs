//! Local-to-remote identifier map

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{LocalId, RecordRef, RemoteId};

/// Result of [`ReconciliationMap::set`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapOutcome {
    Inserted,
    /// Same mapping already present
    Unchanged,
    /// A different remote id is already recorded; the new one was ignored
    Conflict {
        existing: RemoteId,
        rejected: RemoteId,
    },
}

/// Append-only `localId -> remoteId` table. First write wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReconciliationMap {
    entries: BTreeMap<LocalId, RemoteId>,
}

impl ReconciliationMap {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn get(&self, local_id: &LocalId) -> Option<&RemoteId> {
        self.entries.get(local_id)
    }

    /// Record that `local_id` was created remotely as `remote_id`.
    ///
    /// An existing entry is never overwritten. A conflicting second mapping
    /// is logged and reported, not applied.
    pub fn set(&mut self, local_id: LocalId, remote_id: RemoteId) -> MapOutcome {
        match self.entries.get(&local_id) {
            None => {
                self.entries.insert(local_id, remote_id);
                MapOutcome::Inserted
            }
            Some(existing) if *existing == remote_id => MapOutcome::Unchanged,
            Some(existing) => {
                tracing::warn!(
                    "Reconciliation conflict for {}: keeping {}, ignoring {}",
                    local_id,
                    existing,
                    remote_id
                );
                MapOutcome::Conflict {
                    existing: existing.clone(),
                    rejected: remote_id,
                }
            }
        }
    }

    /// Substitute a known remote id for a local reference
    #[must_use]
    pub fn resolve(&self, target: &RecordRef) -> RecordRef {
        match target {
            RecordRef::Local(local_id) => self
                .get(local_id)
                .cloned()
                .map_or_else(|| target.clone(), RecordRef::Remote),
            RecordRef::Remote(_) => target.clone(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
