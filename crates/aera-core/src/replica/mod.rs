//! Local replica: records, operation queue, identifier map, failed log
//!
//! The replica is the in-memory view of everything the offline write path
//! persists. It is loaded once from a [`LocalStore`] and written back as one
//! batch so the four keys never disagree with each other.

mod queue;
mod reconciliation;
mod records;

use chrono::{DateTime, Utc};

pub use queue::{EnqueueOutcome, OperationQueue};
pub use reconciliation::{MapOutcome, ReconciliationMap};
pub use records::{LocalRecordStore, DEFAULT_RECORD_BOUND};

use crate::error::Result;
use crate::kv::{keys, LocalStore, PersistentKv, WriteOutcome};
use crate::models::FailedOperation;

/// Default number of dropped operations remembered for the error indicator
pub const DEFAULT_FAILED_LOG_BOUND: usize = 50;

/// Everything the offline write path keeps locally
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Replica {
    pub records: LocalRecordStore,
    pub queue: OperationQueue,
    pub ids: ReconciliationMap,
    pub failed: Vec<FailedOperation>,
}

impl Replica {
    /// Load the replica, treating missing keys as empty
    pub async fn load<K: PersistentKv>(store: &LocalStore<K>) -> Result<Self> {
        Ok(Self {
            records: store
                .get_json(keys::LOCAL_RECORDS)
                .await?
                .unwrap_or_default(),
            queue: store
                .get_json(keys::OPERATION_QUEUE)
                .await?
                .unwrap_or_default(),
            ids: store
                .get_json(keys::ID_RECONCILIATION_MAP)
                .await?
                .unwrap_or_default(),
            failed: store
                .get_json(keys::FAILED_OPERATIONS)
                .await?
                .unwrap_or_default(),
        })
    }

    /// Remember a dropped operation, keeping only the newest `bound`
    pub fn record_failure(&mut self, failure: FailedOperation, bound: usize) {
        self.failed.push(failure);
        let excess = self.failed.len().saturating_sub(bound);
        if excess > 0 {
            self.failed.drain(..excess);
        }
    }

    /// Persist all keys in one batch.
    ///
    /// Under quota pressure the record store is pruned to `record_bound`
    /// (in memory as well) and the batch retried once.
    pub async fn persist<K: PersistentKv>(
        &mut self,
        store: &LocalStore<K>,
        record_bound: usize,
        now: DateTime<Utc>,
    ) -> Result<WriteOutcome> {
        let entries = vec![
            (
                keys::LOCAL_RECORDS.to_string(),
                serde_json::to_vec(&self.records)?,
            ),
            (
                keys::OPERATION_QUEUE.to_string(),
                serde_json::to_vec(&self.queue)?,
            ),
            (
                keys::ID_RECONCILIATION_MAP.to_string(),
                serde_json::to_vec(&self.ids)?,
            ),
            (
                keys::FAILED_OPERATIONS.to_string(),
                serde_json::to_vec(&self.failed)?,
            ),
        ];

        let records = &mut self.records;
        let outcome = store
            .write_batch_with_pruning(
                entries,
                keys::LOCAL_RECORDS,
                || {
                    let dropped = records.prune_to(record_bound);
                    tracing::info!(
                        "Pruned {} local records to stay within {} records",
                        dropped,
                        record_bound
                    );
                    Ok(serde_json::to_vec(&*records)?)
                },
                now,
            )
            .await?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::models::{LocalRecord, QueuedOperation, RemoteId, ReportDraft};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_persist_and_load_roundtrip() {
        let kv = MemoryKv::new();
        let store = LocalStore::open(kv.clone()).await.unwrap();
        let now = Utc::now();

        let mut replica = Replica::default();
        let record = LocalRecord::new("user-1", ReportDraft::with_description("fire"), now);
        replica.queue.enqueue(QueuedOperation::create(
            record.local_id,
            record.to_new_record(),
            now,
        ));
        replica.ids.set(record.local_id, RemoteId::new("srv-0"));
        replica.records.upsert(record);

        let outcome = replica.persist(&store, 200, now).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Written);

        let loaded = Replica::load(&LocalStore::open(kv).await.unwrap())
            .await
            .unwrap();
        assert_eq!(loaded, replica);
    }

    #[tokio::test]
    async fn test_failed_log_is_bounded() {
        let now = Utc::now();
        let mut replica = Replica::default();
        for index in 0..5 {
            let record = LocalRecord::new("user-1", ReportDraft::default(), now);
            replica.record_failure(
                FailedOperation {
                    operation: QueuedOperation::create(
                        record.local_id,
                        record.to_new_record(),
                        now,
                    ),
                    reason: format!("rejected {index}"),
                    failed_at: now,
                },
                3,
            );
        }
        let reasons: Vec<_> = replica.failed.iter().map(|f| f.reason.as_str()).collect();
        assert_eq!(reasons, vec!["rejected 2", "rejected 3", "rejected 4"]);
    }

    #[tokio::test]
    async fn test_quota_pressure_prunes_records_in_memory() {
        let kv = MemoryKv::new();
        let store = LocalStore::open(kv.clone()).await.unwrap();
        let now = Utc::now();
        let mut replica = Replica::default();
        for _ in 0..10 {
            let mut record = LocalRecord::new("user-1", ReportDraft::default(), now);
            record.mark_synced(RemoteId::new(record.local_id.as_str()));
            replica.records.upsert(record);
        }

        kv.set_reject_writes(true);
        let outcome = replica.persist(&store, 4, now).await.unwrap();

        assert_eq!(outcome, WriteOutcome::Degraded);
        assert_eq!(replica.records.len(), 4);
        assert!(store.is_degraded());
    }
}
