//! Optimistic write path and queue replay

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::kv::{DegradedState, LocalStore, PersistentKv, WriteOutcome};
use crate::models::{
    FailedOperation, LocalId, LocalRecord, NewRecord, OpId, OperationKind, QueuedOperation,
    RecordField, RecordRef, RemoteId, ReportDraft,
};
use crate::platform::Clock;
use crate::remote::{CreatedRecord, RemoteError, RemoteRecord, RemoteStore};
use crate::replica::{MapOutcome, Replica, DEFAULT_FAILED_LOG_BOUND, DEFAULT_RECORD_BOUND};
use crate::state::SyncIndicator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound for every remote call
    pub remote_timeout: Duration,
    /// Records kept locally when storage runs out of space
    pub record_bound: usize,
    pub failed_log_bound: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            remote_timeout: Duration::from_secs(10),
            record_bound: DEFAULT_RECORD_BOUND,
            failed_log_bound: DEFAULT_FAILED_LOG_BOUND,
        }
    }
}

/// Summary of one pass over the queue
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    pub applied: usize,
    /// Entries left queued for a later pass
    pub deferred: usize,
    /// Entries dropped as non-recoverable during this pass
    pub failures: Vec<FailedOperation>,
}

impl DrainReport {
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrainOutcome {
    Completed(DrainReport),
    /// Another pass was already running; this trigger was coalesced into it
    Skipped,
}

/// What happened to a local write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteReceipt {
    /// Accepted by the remote store right away
    Synced {
        local_id: LocalId,
        remote_id: RemoteId,
    },
    /// Kept in the operation queue for the next pass
    Queued {
        local_id: LocalId,
        reason: Option<String>,
    },
    /// The remote store refused the write; it will not be retried
    Rejected { local_id: LocalId, reason: String },
}

impl WriteReceipt {
    #[must_use]
    pub const fn local_id(&self) -> &LocalId {
        match self {
            Self::Synced { local_id, .. }
            | Self::Queued { local_id, .. }
            | Self::Rejected { local_id, .. } => local_id,
        }
    }
}

/// Result of [`SyncEngine::reconcile_on_start`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartReconciliation {
    NoActiveRecord,
    /// The remote record was created from a local record whose confirmation
    /// never reached local storage
    Adopted {
        local_id: LocalId,
        remote_id: RemoteId,
    },
    AlreadyKnown { remote_id: RemoteId },
    /// Known record overwritten from the remote copy (degraded storage)
    Refreshed { remote_id: RemoteId },
    /// Record created elsewhere, now cached locally
    Cached {
        local_id: LocalId,
        remote_id: RemoteId,
    },
    /// The remote store could not be asked
    Unavailable { reason: String },
}

struct EngineState {
    replica: Replica,
    /// Remote work currently being submitted
    in_flight: HashSet<Claim>,
}

/// What a submission holds until its result is folded back. Two updates to
/// the same field must never be in flight together, or the older one could
/// land last.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Claim {
    Create(LocalId),
    Field(RemoteId, RecordField),
}

enum Submission {
    Create { local_id: LocalId, record: NewRecord },
    Update {
        remote_id: RemoteId,
        field: RecordField,
        value: Value,
    },
}

impl Submission {
    fn claim(&self) -> Claim {
        match self {
            Self::Create { local_id, .. } => Claim::Create(*local_id),
            Self::Update {
                remote_id, field, ..
            } => Claim::Field(remote_id.clone(), *field),
        }
    }
}

enum Submitted {
    Created {
        local_id: LocalId,
        created: CreatedRecord,
    },
    Updated {
        remote_id: RemoteId,
    },
}

enum Plan {
    Submit(Submission),
    AlreadyApplied(LocalId, RemoteId),
    Defer(String),
    Drop(String),
}

enum EntryOutcome {
    Applied(RemoteId),
    Deferred(String),
    Dropped(FailedOperation),
    /// Gone from the queue
    Unavailable,
}

/// Clears the draining flag when a pass ends, however it ends
struct PassGuard<'a>(&'a AtomicBool);

impl<'a> PassGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Local replica plus the machinery that keeps it converging with the
/// remote store.
///
/// The replica sits behind one async mutex that is never held across a
/// remote call, so writers can keep recording while a pass waits on the
/// network. Every state change is persisted as a single batch.
pub struct SyncEngine<K, R, C> {
    store: LocalStore<K>,
    remote: R,
    clock: C,
    config: EngineConfig,
    state: Mutex<EngineState>,
    draining: AtomicBool,
}

impl<K: PersistentKv, R: RemoteStore, C: Clock> SyncEngine<K, R, C> {
    /// Load the replica from `kv`
    pub async fn open(kv: K, remote: R, clock: C, config: EngineConfig) -> Result<Self> {
        let store = LocalStore::open(kv).await?;
        let replica = Replica::load(&store).await?;
        tracing::info!(
            "Opened local replica: {} records, {} queued operations",
            replica.records.len(),
            replica.queue.len()
        );

        Ok(Self {
            store,
            remote,
            clock,
            config,
            state: Mutex::new(EngineState {
                replica,
                in_flight: HashSet::new(),
            }),
            draining: AtomicBool::new(false),
        })
    }

    pub const fn remote(&self) -> &R {
        &self.remote
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Record a new report locally, then try to create it remotely
    pub async fn create_record(
        &self,
        owner_id: &str,
        mut draft: ReportDraft,
    ) -> Result<WriteReceipt> {
        let owner_id = owner_id.trim();
        if owner_id.is_empty() {
            return Err(Error::InvalidInput("owner id must not be empty".to_string()));
        }
        if draft.payload.is_null() {
            draft.payload = Value::Object(serde_json::Map::new());
        }
        if !draft.payload.is_object() {
            return Err(Error::InvalidInput(
                "payload must be a JSON object".to_string(),
            ));
        }

        let now = self.clock.now();
        let record = LocalRecord::new(owner_id, draft, now);
        let local_id = record.local_id;
        let op = QueuedOperation::create(local_id, record.to_new_record(), now);
        let op_id = op.op_id;
        {
            let mut state = self.state.lock().await;
            state.replica.records.upsert(record);
            state.replica.queue.enqueue(op);
            self.commit(&mut state.replica).await?;
        }
        tracing::debug!("Recorded report {} locally", local_id);

        self.submit_directly(local_id, op_id).await
    }

    /// Change one field of a record locally, then try to apply it remotely.
    ///
    /// The write goes straight to the remote store only when the record is
    /// synced and nothing else is queued for it; otherwise it waits its turn
    /// in the queue.
    pub async fn update_record_field(
        &self,
        target: &RecordRef,
        field: RecordField,
        value: Value,
    ) -> Result<WriteReceipt> {
        let now = self.clock.now();
        let (local_id, op_id, direct) = {
            let mut state = self.state.lock().await;
            let replica = &mut state.replica;
            let lookup = if replica.records.get(target).is_some() {
                target.clone()
            } else {
                replica.ids.resolve(target)
            };
            let record = replica
                .records
                .get_mut(&lookup)
                .ok_or_else(|| Error::NotFound(target.to_string()))?;
            record.apply_field(field, &value, now)?;
            let local_id = record.local_id;
            let reference = replica.ids.resolve(&record.reference());

            let op = QueuedOperation::update(reference.clone(), field, value, now);
            let op_id = op.op_id;
            replica.queue.enqueue(op);
            let direct = reference.as_remote().is_some()
                && replica.queue.pending_for(&reference).count() == 1;
            self.commit(replica).await?;
            (local_id, op_id, direct)
        };

        if direct {
            self.submit_directly(local_id, op_id).await
        } else {
            tracing::debug!("Queued {} update for {} behind pending work", field, local_id);
            Ok(WriteReceipt::Queued {
                local_id,
                reason: None,
            })
        }
    }

    /// Replay the queue once, in order.
    ///
    /// Passes are exclusive: a call made while another pass runs returns
    /// [`DrainOutcome::Skipped`] without touching the queue. Entries
    /// enqueued during the pass wait for the next one.
    pub async fn drain(&self) -> Result<DrainOutcome> {
        let Some(_guard) = PassGuard::acquire(&self.draining) else {
            tracing::debug!("Sync pass already running; coalescing trigger");
            return Ok(DrainOutcome::Skipped);
        };

        let snapshot: Vec<OpId> = {
            let state = self.state.lock().await;
            state.replica.queue.list().iter().map(|op| op.op_id).collect()
        };
        let mut report = DrainReport::default();
        if snapshot.is_empty() {
            return Ok(DrainOutcome::Completed(report));
        }

        tracing::info!("Draining {} queued operations", snapshot.len());
        for op_id in snapshot {
            let outcome = match self.apply_entry(op_id).await {
                Ok(outcome) => outcome,
                Err(error) => {
                    tracing::error!("Operation {} could not be applied locally: {}", op_id, error);
                    EntryOutcome::Deferred(error.to_string())
                }
            };
            match outcome {
                EntryOutcome::Applied(_) => report.applied += 1,
                EntryOutcome::Deferred(reason) => {
                    tracing::debug!("Operation {} stays queued: {}", op_id, reason);
                    report.deferred += 1;
                }
                EntryOutcome::Dropped(failure) => report.failures.push(failure),
                EntryOutcome::Unavailable => {}
            }
        }

        tracing::info!(
            "Sync pass finished: {} applied, {} deferred, {} failed",
            report.applied,
            report.deferred,
            report.failed()
        );
        Ok(DrainOutcome::Completed(report))
    }

    /// Align the replica with the owner's open remote record.
    ///
    /// A remote record carrying the `client_ref` of a still-unsynced local
    /// record means the create went through but its confirmation was lost;
    /// the local record adopts the remote id and its queued create is
    /// dropped.
    pub async fn reconcile_on_start(&self, owner_id: &str) -> Result<StartReconciliation> {
        let fetched = self
            .with_auth_retry(move || self.remote.fetch_active_record(owner_id))
            .await;
        let remote = match fetched {
            Ok(Some(remote)) => remote,
            Ok(None) => return Ok(StartReconciliation::NoActiveRecord),
            Err(error) => {
                tracing::warn!("Skipping start-up reconciliation: {}", error);
                return Ok(StartReconciliation::Unavailable {
                    reason: error.to_string(),
                });
            }
        };

        let now = self.clock.now();
        let degraded = self.store.is_degraded();
        let mut state = self.state.lock().await;
        let replica = &mut state.replica;
        let outcome = fold_remote_record(replica, remote, degraded, now);
        if !matches!(outcome, StartReconciliation::AlreadyKnown { .. }) {
            self.commit(replica).await?;
        }
        tracing::info!("Start-up reconciliation: {:?}", outcome);
        Ok(outcome)
    }

    pub async fn records(&self) -> Vec<LocalRecord> {
        let state = self.state.lock().await;
        state.replica.records.iter().cloned().collect()
    }

    /// Look a record up by either of its ids
    pub async fn record(&self, target: &RecordRef) -> Option<LocalRecord> {
        let state = self.state.lock().await;
        let replica = &state.replica;
        replica
            .records
            .get(target)
            .or_else(|| replica.records.get(&replica.ids.resolve(target)))
            .cloned()
    }

    pub async fn pending_operations(&self) -> Vec<QueuedOperation> {
        self.state.lock().await.replica.queue.list().to_vec()
    }

    pub async fn failed_operations(&self) -> Vec<FailedOperation> {
        self.state.lock().await.replica.failed.clone()
    }

    pub async fn remote_id_for(&self, local_id: &LocalId) -> Option<RemoteId> {
        self.state.lock().await.replica.ids.get(local_id).cloned()
    }

    pub async fn indicator(&self) -> SyncIndicator {
        let state = self.state.lock().await;
        SyncIndicator::from_counts(state.replica.queue.len(), state.replica.failed.len())
    }

    pub fn degraded_state(&self) -> DegradedState {
        self.store.degraded_state()
    }

    /// Forget dropped operations once the user has seen them
    pub async fn clear_failed(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        let cleared = state.replica.failed.len();
        if cleared > 0 {
            state.replica.failed.clear();
            self.commit(&mut state.replica).await?;
        }
        Ok(cleared)
    }

    pub async fn clear_degraded(&self) -> Result<()> {
        self.store.clear_degraded().await
    }

    async fn submit_directly(&self, local_id: LocalId, op_id: OpId) -> Result<WriteReceipt> {
        if self.is_draining() {
            return Ok(WriteReceipt::Queued {
                local_id,
                reason: Some("sync pass in progress".to_string()),
            });
        }

        Ok(match self.apply_entry(op_id).await? {
            EntryOutcome::Applied(remote_id) => {
                tracing::info!("Synced {} as {}", local_id, remote_id);
                WriteReceipt::Synced {
                    local_id,
                    remote_id,
                }
            }
            EntryOutcome::Deferred(reason) => WriteReceipt::Queued {
                local_id,
                reason: Some(reason),
            },
            EntryOutcome::Dropped(failure) => WriteReceipt::Rejected {
                local_id,
                reason: failure.reason,
            },
            EntryOutcome::Unavailable => WriteReceipt::Queued {
                local_id,
                reason: None,
            },
        })
    }

    /// Submit one queued entry and fold the result into the replica
    async fn apply_entry(&self, op_id: OpId) -> Result<EntryOutcome> {
        let (op, submission, claim) = {
            let mut state = self.state.lock().await;
            let Some(op) = state.replica.queue.get(&op_id).cloned() else {
                return Ok(EntryOutcome::Unavailable);
            };

            match plan_entry(&state.replica, &op) {
                Plan::Submit(submission) => {
                    let claim = submission.claim();
                    if !state.in_flight.insert(claim.clone()) {
                        return Ok(EntryOutcome::Deferred(format!(
                            "an earlier {} submission is still in flight",
                            op.kind.name()
                        )));
                    }
                    (op, submission, claim)
                }
                Plan::AlreadyApplied(local_id, remote_id) => {
                    state.replica.queue.remove(&HashSet::from([op_id]));
                    state.replica.records.mark_synced(&local_id, remote_id.clone());
                    self.commit(&mut state.replica).await?;
                    return Ok(EntryOutcome::Applied(remote_id));
                }
                Plan::Defer(reason) => return Ok(EntryOutcome::Deferred(reason)),
                Plan::Drop(reason) => {
                    let failure = self.drop_entry(&mut state.replica, &op, reason);
                    self.commit(&mut state.replica).await?;
                    return Ok(EntryOutcome::Dropped(failure));
                }
            }
        };

        let result = self.submit(&submission).await;

        let mut state = self.state.lock().await;
        state.in_flight.remove(&claim);
        let outcome = match result {
            Ok(Submitted::Created { local_id, created }) => {
                state.replica.queue.remove(&HashSet::from([op_id]));
                EntryOutcome::Applied(fold_created(&mut state.replica, local_id, &created))
            }
            Ok(Submitted::Updated { remote_id }) => {
                state.replica.queue.remove(&HashSet::from([op_id]));
                EntryOutcome::Applied(remote_id)
            }
            Err(error) if error.is_recoverable() => {
                tracing::warn!("{} {} failed, will retry: {}", op.kind.name(), op_id, error);
                return Ok(EntryOutcome::Deferred(error.to_string()));
            }
            Err(error) => {
                EntryOutcome::Dropped(self.drop_entry(&mut state.replica, &op, error.to_string()))
            }
        };
        self.commit(&mut state.replica).await?;
        Ok(outcome)
    }

    async fn submit(&self, submission: &Submission) -> std::result::Result<Submitted, RemoteError> {
        match submission {
            Submission::Create { local_id, record } => self
                .with_auth_retry(move || {
                    self.remote
                        .create_record(&record.owner_id, record, local_id)
                })
                .await
                .map(|created| Submitted::Created {
                    local_id: *local_id,
                    created,
                }),
            Submission::Update {
                remote_id,
                field,
                value,
            } => self
                .with_auth_retry(move || self.remote.update_record_field(remote_id, *field, value))
                .await
                .map(|()| Submitted::Updated {
                    remote_id: remote_id.clone(),
                }),
        }
    }

    /// Run a remote call under the timeout. An auth failure triggers one
    /// session refresh and one retry.
    async fn with_auth_retry<T, F, Fut>(&self, call: F) -> std::result::Result<T, RemoteError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, RemoteError>>,
    {
        match self.with_timeout(call()).await {
            Err(RemoteError::Auth(reason)) => {
                tracing::warn!("Remote store rejected credentials ({}); refreshing", reason);
                match self.with_timeout(self.remote.refresh_auth()).await {
                    Ok(()) => self.with_timeout(call()).await,
                    Err(error) if error.is_recoverable() => Err(error),
                    Err(error) => Err(RemoteError::Auth(format!(
                        "{reason}; session refresh failed: {error}"
                    ))),
                }
            }
            other => other,
        }
    }

    async fn with_timeout<T>(
        &self,
        call: impl Future<Output = std::result::Result<T, RemoteError>>,
    ) -> std::result::Result<T, RemoteError> {
        tokio::time::timeout(self.config.remote_timeout, call)
            .await
            .unwrap_or(Err(RemoteError::Timeout))
    }

    fn drop_entry(
        &self,
        replica: &mut Replica,
        op: &QueuedOperation,
        reason: String,
    ) -> FailedOperation {
        tracing::warn!(
            "Dropping {} {} for {}: {}",
            op.kind.name(),
            op.op_id,
            op.target,
            reason
        );
        replica.queue.remove(&HashSet::from([op.op_id]));
        if let (OperationKind::CreateRecord { .. }, RecordRef::Local(_)) = (&op.kind, &op.target) {
            if let Some(record) = replica.records.get_mut(&op.target) {
                record.last_sync_error = Some(reason.clone());
            }
        }

        let failure = FailedOperation {
            operation: op.clone(),
            reason,
            failed_at: self.clock.now(),
        };
        replica.record_failure(failure.clone(), self.config.failed_log_bound);
        failure
    }

    async fn commit(&self, replica: &mut Replica) -> Result<WriteOutcome> {
        let outcome = replica
            .persist(&self.store, self.config.record_bound, self.clock.now())
            .await?;
        if outcome == WriteOutcome::Degraded {
            tracing::warn!("Local storage is degraded; latest replica changes live in memory only");
        }
        Ok(outcome)
    }
}

fn plan_entry(replica: &Replica, op: &QueuedOperation) -> Plan {
    match &op.kind {
        OperationKind::CreateRecord { record } => match &op.target {
            RecordRef::Local(local_id) => match replica.ids.get(local_id) {
                Some(remote_id) => Plan::AlreadyApplied(*local_id, remote_id.clone()),
                None => Plan::Submit(Submission::Create {
                    local_id: *local_id,
                    record: record.clone(),
                }),
            },
            RecordRef::Remote(remote_id) => Plan::Drop(format!(
                "create addressed to existing remote record {remote_id}"
            )),
        },
        OperationKind::UpdateRecordField { field, value } => {
            match replica.ids.resolve(&op.target) {
                RecordRef::Remote(remote_id) => Plan::Submit(Submission::Update {
                    remote_id,
                    field: *field,
                    value: value.clone(),
                }),
                RecordRef::Local(local_id) if replica.queue.has_pending_create(&local_id) => {
                    Plan::Defer(format!("waiting for record {local_id} to be created"))
                }
                RecordRef::Local(local_id) => Plan::Drop(format!(
                    "record {local_id} was never created remotely"
                )),
            }
        }
    }
}

/// Apply an accepted create: map the ids, mark the record synced and point
/// queued work at the remote id. Returns the canonical remote id.
fn fold_created(replica: &mut Replica, local_id: LocalId, created: &CreatedRecord) -> RemoteId {
    let remote_id = match replica.ids.set(local_id, created.id.clone()) {
        MapOutcome::Conflict { existing, .. } => existing,
        MapOutcome::Inserted | MapOutcome::Unchanged => created.id.clone(),
    };
    replica.queue.retarget(&local_id, &remote_id);

    let target = RecordRef::Remote(remote_id.clone());
    let status_pending = replica.queue.has_pending_update(&target, RecordField::Status);
    let priority_pending = replica
        .queue
        .has_pending_update(&target, RecordField::Priority);
    if let Some(record) = replica.records.get_mut(&RecordRef::Local(local_id)) {
        record.mark_synced(remote_id.clone());
        record.created_at = created.created_at;
        if !status_pending {
            record.status = created.status;
        }
        if !priority_pending {
            record.priority = created.priority;
        }
    }
    remote_id
}

fn fold_remote_record(
    replica: &mut Replica,
    remote: RemoteRecord,
    degraded: bool,
    now: chrono::DateTime<chrono::Utc>,
) -> StartReconciliation {
    if let Some(local_id) = remote.client_ref {
        let unsynced = replica
            .records
            .get(&RecordRef::Local(local_id))
            .is_some_and(|record| !record.synced);
        if unsynced || replica.queue.has_pending_create(&local_id) {
            replica.queue.take_create(&local_id);
            let created = CreatedRecord {
                id: remote.id,
                created_at: remote.created_at,
                status: remote.status,
                priority: remote.priority,
            };
            let remote_id = fold_created(replica, local_id, &created);
            return StartReconciliation::Adopted {
                local_id,
                remote_id,
            };
        }
    }

    let target = RecordRef::Remote(remote.id.clone());
    if replica.records.get(&target).is_some() {
        if !degraded {
            return StartReconciliation::AlreadyKnown {
                remote_id: remote.id,
            };
        }
        let status_pending = replica.queue.has_pending_update(&target, RecordField::Status);
        let priority_pending = replica
            .queue
            .has_pending_update(&target, RecordField::Priority);
        let location_pending = replica
            .queue
            .has_pending_update(&target, RecordField::Location);
        let payload_pending = replica
            .queue
            .has_pending_update(&target, RecordField::Payload);
        if let Some(record) = replica.records.get_mut(&target) {
            if !status_pending {
                record.status = remote.status;
            }
            if !priority_pending {
                record.priority = remote.priority;
            }
            if !location_pending {
                record.location = remote.location;
            }
            if !payload_pending {
                record.payload = remote.payload;
            }
            record.updated_at = now;
        }
        return StartReconciliation::Refreshed {
            remote_id: remote.id,
        };
    }

    let local_id = remote
        .client_ref
        .filter(|id| replica.records.get(&RecordRef::Local(*id)).is_none())
        .unwrap_or_default();
    replica.ids.set(local_id, remote.id.clone());
    replica.records.upsert(LocalRecord {
        local_id,
        remote_id: Some(remote.id.clone()),
        synced: true,
        owner_id: remote.owner_id,
        payload: remote.payload,
        location: remote.location,
        status: remote.status,
        priority: remote.priority,
        created_at: remote.created_at,
        updated_at: now,
        last_sync_error: None,
    });
    StartReconciliation::Cached {
        local_id,
        remote_id: remote.id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::models::{Priority, ReportStatus};
    use crate::platform::ManualClock;
    use chrono::{DateTime, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct ScriptedRemote {
        offline: AtomicBool,
        reject_creates: AtomicBool,
        auth_failures: AtomicUsize,
        refresh_fails: AtomicBool,
        refreshes: AtomicUsize,
        stall: AtomicBool,
        /// Update calls still to be held back before answering
        slow_updates: AtomicUsize,
        created: StdMutex<Vec<(LocalId, RemoteId)>>,
        updates: StdMutex<Vec<(RemoteId, RecordField, Value)>>,
        active: StdMutex<Option<RemoteRecord>>,
    }

    impl ScriptedRemote {
        async fn gate(&self) -> std::result::Result<(), RemoteError> {
            tokio::task::yield_now().await;
            if self.stall.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.offline.load(Ordering::SeqCst) {
                return Err(RemoteError::Network("offline".to_string()));
            }
            let failures = self.auth_failures.load(Ordering::SeqCst);
            if failures > 0 {
                self.auth_failures.store(failures - 1, Ordering::SeqCst);
                return Err(RemoteError::Auth("jwt expired".to_string()));
            }
            Ok(())
        }

        fn created_count(&self) -> usize {
            self.created.lock().unwrap().len()
        }
    }

    impl RemoteStore for ScriptedRemote {
        async fn create_record(
            &self,
            _owner_id: &str,
            record: &NewRecord,
            client_ref: &LocalId,
        ) -> std::result::Result<CreatedRecord, RemoteError> {
            self.gate().await?;
            if self.reject_creates.load(Ordering::SeqCst) {
                return Err(RemoteError::Validation("payload rejected".to_string()));
            }
            let mut created = self.created.lock().unwrap();
            let id = created
                .iter()
                .find(|(local, _)| local == client_ref)
                .map(|(_, remote)| remote.clone())
                .unwrap_or_else(|| {
                    let id = RemoteId::new(format!("srv-{}", created.len() + 1));
                    created.push((*client_ref, id.clone()));
                    id
                });
            Ok(CreatedRecord {
                id,
                created_at: record.created_at,
                status: ReportStatus::Acknowledged,
                priority: record.priority,
            })
        }

        async fn update_record_field(
            &self,
            remote_id: &RemoteId,
            field: RecordField,
            value: &Value,
        ) -> std::result::Result<(), RemoteError> {
            let slow = self.slow_updates.load(Ordering::SeqCst);
            if slow > 0 {
                self.slow_updates.store(slow - 1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            self.gate().await?;
            self.updates
                .lock()
                .unwrap()
                .push((remote_id.clone(), field, value.clone()));
            Ok(())
        }

        async fn fetch_active_record(
            &self,
            _owner_id: &str,
        ) -> std::result::Result<Option<RemoteRecord>, RemoteError> {
            self.gate().await?;
            Ok(self.active.lock().unwrap().clone())
        }

        async fn refresh_auth(&self) -> std::result::Result<(), RemoteError> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            if self.refresh_fails.load(Ordering::SeqCst) {
                Err(RemoteError::Auth("refresh token revoked".to_string()))
            } else {
                Ok(())
            }
        }
    }

    /// Store whose writes fail with a backend error while `broken` is set
    #[derive(Clone, Default)]
    struct BrokenKv {
        inner: MemoryKv,
        broken: Arc<AtomicBool>,
    }

    impl BrokenKv {
        fn check(&self) -> crate::kv::KvResult<()> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(crate::kv::KvError::Backend("disk I/O error".to_string()));
            }
            Ok(())
        }
    }

    impl PersistentKv for BrokenKv {
        async fn get(&self, key: &str) -> crate::kv::KvResult<Option<Vec<u8>>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Vec<u8>) -> crate::kv::KvResult<()> {
            self.check()?;
            self.inner.set(key, value).await
        }

        async fn set_batch(&self, entries: Vec<(String, Vec<u8>)>) -> crate::kv::KvResult<()> {
            self.check()?;
            self.inner.set_batch(entries).await
        }
    }

    type TestEngine = SyncEngine<MemoryKv, ScriptedRemote, ManualClock>;

    fn start() -> DateTime<Utc> {
        "2026-03-01T08:00:00Z".parse().unwrap()
    }

    async fn engine_with(kv: MemoryKv, remote: ScriptedRemote) -> TestEngine {
        SyncEngine::open(kv, remote, ManualClock::new(start()), EngineConfig::default())
            .await
            .unwrap()
    }

    fn offline_remote() -> ScriptedRemote {
        let remote = ScriptedRemote::default();
        remote.offline.store(true, Ordering::SeqCst);
        remote
    }

    #[tokio::test]
    async fn online_create_is_submitted_directly() {
        let engine = engine_with(MemoryKv::new(), ScriptedRemote::default()).await;

        let receipt = engine
            .create_record("user-1", ReportDraft::with_description("injured"))
            .await
            .unwrap();

        let WriteReceipt::Synced {
            local_id,
            remote_id,
        } = receipt
        else {
            panic!("expected synced receipt, got {receipt:?}");
        };
        let record = engine.record(&RecordRef::Local(local_id)).await.unwrap();
        assert!(record.synced);
        assert_eq!(record.remote_id, Some(remote_id.clone()));
        assert_eq!(record.status, ReportStatus::Acknowledged);
        assert_eq!(engine.remote_id_for(&local_id).await, Some(remote_id));
        assert!(engine.pending_operations().await.is_empty());
        assert_eq!(engine.indicator().await, SyncIndicator::Synced);
    }

    #[tokio::test]
    async fn offline_create_is_queued_and_drained_later() {
        let engine = engine_with(MemoryKv::new(), offline_remote()).await;

        let receipt = engine
            .create_record("user-1", ReportDraft::with_description("flooding"))
            .await
            .unwrap();
        assert!(matches!(receipt, WriteReceipt::Queued { .. }));
        assert_eq!(
            engine.indicator().await,
            SyncIndicator::PendingSync { pending: 1 }
        );
        let record = engine
            .record(&RecordRef::Local(*receipt.local_id()))
            .await
            .unwrap();
        assert!(!record.synced);
        assert!(record.remote_id.is_none());

        engine.remote().offline.store(false, Ordering::SeqCst);
        let DrainOutcome::Completed(report) = engine.drain().await.unwrap() else {
            panic!("pass should run");
        };
        assert_eq!(report.applied, 1);
        assert_eq!(engine.remote().created_count(), 1);
        assert!(engine.pending_operations().await.is_empty());
    }

    #[tokio::test]
    async fn update_to_unsynced_record_waits_for_create() {
        let engine = engine_with(MemoryKv::new(), offline_remote()).await;
        let local_id = *engine
            .create_record("user-1", ReportDraft::with_description("gas leak"))
            .await
            .unwrap()
            .local_id();

        let receipt = engine
            .update_record_field(
                &RecordRef::Local(local_id),
                RecordField::Priority,
                json!("critical"),
            )
            .await
            .unwrap();
        assert_eq!(
            receipt,
            WriteReceipt::Queued {
                local_id,
                reason: None
            }
        );
        assert_eq!(
            engine
                .record(&RecordRef::Local(local_id))
                .await
                .unwrap()
                .priority,
            Priority::Critical
        );

        engine.remote().offline.store(false, Ordering::SeqCst);
        engine.drain().await.unwrap();

        let remote_id = engine.remote_id_for(&local_id).await.unwrap();
        assert_eq!(
            *engine.remote().updates.lock().unwrap(),
            vec![(remote_id, RecordField::Priority, json!("critical"))]
        );
        let record = engine.record(&RecordRef::Local(local_id)).await.unwrap();
        assert_eq!(record.priority, Priority::Critical);
    }

    #[tokio::test]
    async fn rejected_create_orphans_its_updates() {
        let engine = engine_with(MemoryKv::new(), offline_remote()).await;
        let local_id = *engine
            .create_record("user-1", ReportDraft::default())
            .await
            .unwrap()
            .local_id();
        engine
            .update_record_field(
                &RecordRef::Local(local_id),
                RecordField::Status,
                json!("resolved"),
            )
            .await
            .unwrap();

        engine.remote().offline.store(false, Ordering::SeqCst);
        engine.remote().reject_creates.store(true, Ordering::SeqCst);
        let DrainOutcome::Completed(report) = engine.drain().await.unwrap() else {
            panic!("pass should run");
        };

        assert_eq!(report.failed(), 2);
        assert!(engine.pending_operations().await.is_empty());
        let record = engine.record(&RecordRef::Local(local_id)).await.unwrap();
        assert!(record
            .last_sync_error
            .as_deref()
            .is_some_and(|reason| reason.contains("payload rejected")));
        assert_eq!(
            engine.indicator().await,
            SyncIndicator::Failed {
                failed: 2,
                pending: 0
            }
        );

        assert_eq!(engine.clear_failed().await.unwrap(), 2);
        assert_eq!(engine.indicator().await, SyncIndicator::Synced);
    }

    #[tokio::test]
    async fn auth_failure_refreshes_once_and_retries() {
        let remote = ScriptedRemote::default();
        remote.auth_failures.store(1, Ordering::SeqCst);
        let engine = engine_with(MemoryKv::new(), remote).await;

        let receipt = engine
            .create_record("user-1", ReportDraft::default())
            .await
            .unwrap();

        assert!(matches!(receipt, WriteReceipt::Synced { .. }));
        assert_eq!(engine.remote().refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_refresh_makes_auth_failure_terminal() {
        let remote = ScriptedRemote::default();
        remote.auth_failures.store(1, Ordering::SeqCst);
        remote.refresh_fails.store(true, Ordering::SeqCst);
        let engine = engine_with(MemoryKv::new(), remote).await;

        let receipt = engine
            .create_record("user-1", ReportDraft::default())
            .await
            .unwrap();

        let WriteReceipt::Rejected { reason, .. } = receipt else {
            panic!("expected rejection, got {receipt:?}");
        };
        assert!(reason.contains("refresh token revoked"));
        assert!(engine.pending_operations().await.is_empty());
        assert_eq!(engine.failed_operations().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_remote_times_out_and_stays_queued() {
        let remote = ScriptedRemote::default();
        remote.stall.store(true, Ordering::SeqCst);
        let engine = engine_with(MemoryKv::new(), remote).await;

        let receipt = engine
            .create_record("user-1", ReportDraft::default())
            .await
            .unwrap();

        assert_eq!(
            receipt,
            WriteReceipt::Queued {
                local_id: *receipt.local_id(),
                reason: Some(RemoteError::Timeout.to_string()),
            }
        );
        assert_eq!(engine.pending_operations().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_updates_leave_the_newest_value_remote() {
        let engine = engine_with(MemoryKv::new(), ScriptedRemote::default()).await;
        let WriteReceipt::Synced { remote_id, .. } = engine
            .create_record("user-1", ReportDraft::with_description("road blocked"))
            .await
            .unwrap()
        else {
            panic!("create should sync");
        };
        let target = RecordRef::Remote(remote_id.clone());
        let older = json!({ "lat": 1.0, "lon": 1.0 });
        let newer = json!({ "lat": 2.0, "lon": 2.0 });

        engine.remote().slow_updates.store(1, Ordering::SeqCst);
        let (first, second) = tokio::join!(
            engine.update_record_field(&target, RecordField::Location, older.clone()),
            engine.update_record_field(&target, RecordField::Location, newer.clone())
        );
        assert!(matches!(first.unwrap(), WriteReceipt::Synced { .. }));
        assert!(matches!(second.unwrap(), WriteReceipt::Queued { .. }));

        let pending = engine.pending_operations().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(
            pending[0].kind,
            OperationKind::UpdateRecordField {
                field: RecordField::Location,
                value: newer.clone(),
            }
        );

        engine.drain().await.unwrap();
        assert_eq!(
            *engine.remote().updates.lock().unwrap(),
            vec![
                (remote_id.clone(), RecordField::Location, older),
                (remote_id, RecordField::Location, newer.clone()),
            ]
        );
        assert!(engine.pending_operations().await.is_empty());
        let record = engine.record(&target).await.unwrap();
        assert_eq!(record.location, Some(newer));
    }

    #[tokio::test]
    async fn storage_error_does_not_abort_the_pass() {
        let kv = BrokenKv::default();
        let engine = SyncEngine::open(
            kv.clone(),
            offline_remote(),
            ManualClock::new(start()),
            EngineConfig::default(),
        )
        .await
        .unwrap();
        for description in ["first", "second"] {
            engine
                .create_record("user-1", ReportDraft::with_description(description))
                .await
                .unwrap();
        }

        engine.remote().offline.store(false, Ordering::SeqCst);
        kv.broken.store(true, Ordering::SeqCst);
        let DrainOutcome::Completed(report) = engine.drain().await.unwrap() else {
            panic!("pass should run");
        };

        assert_eq!(engine.remote().created_count(), 2);
        assert_eq!(report.deferred, 2);
        assert!(!engine.is_draining());
    }

    #[tokio::test]
    async fn concurrent_trigger_is_skipped() {
        let engine = engine_with(MemoryKv::new(), offline_remote()).await;
        engine
            .create_record("user-1", ReportDraft::default())
            .await
            .unwrap();

        let (first, second) = tokio::join!(engine.drain(), engine.drain());

        assert!(matches!(first.unwrap(), DrainOutcome::Completed(_)));
        assert_eq!(second.unwrap(), DrainOutcome::Skipped);
        assert!(!engine.is_draining());
    }

    #[tokio::test]
    async fn writes_during_a_pass_are_preserved() {
        let engine = engine_with(MemoryKv::new(), offline_remote()).await;
        engine
            .create_record("user-1", ReportDraft::with_description("first"))
            .await
            .unwrap();
        engine.remote().offline.store(false, Ordering::SeqCst);

        let (drained, written) = tokio::join!(
            engine.drain(),
            engine.create_record("user-1", ReportDraft::with_description("second"))
        );

        let DrainOutcome::Completed(report) = drained.unwrap() else {
            panic!("pass should run");
        };
        assert_eq!(report.applied, 1);
        let WriteReceipt::Queued { local_id, .. } = written.unwrap() else {
            panic!("write during a pass should queue");
        };
        let pending = engine.pending_operations().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].target, RecordRef::Local(local_id));
    }

    #[tokio::test]
    async fn replica_survives_reopen() {
        let kv = MemoryKv::new();
        let engine = engine_with(kv.clone(), offline_remote()).await;
        let local_id = *engine
            .create_record("user-1", ReportDraft::default())
            .await
            .unwrap()
            .local_id();
        drop(engine);

        let reopened = engine_with(kv, ScriptedRemote::default()).await;
        assert_eq!(reopened.pending_operations().await.len(), 1);
        assert!(reopened.record(&RecordRef::Local(local_id)).await.is_some());
    }

    #[tokio::test]
    async fn start_reconciliation_adopts_lost_confirmation() {
        let engine = engine_with(MemoryKv::new(), offline_remote()).await;
        let local_id = *engine
            .create_record("user-1", ReportDraft::with_description("trapped"))
            .await
            .unwrap()
            .local_id();

        let remote = engine.remote();
        remote
            .created
            .lock()
            .unwrap()
            .push((local_id, RemoteId::new("srv-77")));
        *remote.active.lock().unwrap() = Some(RemoteRecord {
            id: RemoteId::new("srv-77"),
            owner_id: "user-1".to_string(),
            client_ref: Some(local_id),
            payload: json!({"description": "trapped"}),
            location: None,
            status: ReportStatus::Active,
            priority: Priority::Medium,
            created_at: start(),
        });
        remote.offline.store(false, Ordering::SeqCst);

        let outcome = engine.reconcile_on_start("user-1").await.unwrap();

        assert_eq!(
            outcome,
            StartReconciliation::Adopted {
                local_id,
                remote_id: RemoteId::new("srv-77"),
            }
        );
        assert!(engine.pending_operations().await.is_empty());
        engine.drain().await.unwrap();
        assert_eq!(engine.remote().created_count(), 1);
    }

    #[tokio::test]
    async fn start_reconciliation_caches_unknown_record() {
        let remote = ScriptedRemote::default();
        *remote.active.lock().unwrap() = Some(RemoteRecord {
            id: RemoteId::new("srv-5"),
            owner_id: "user-1".to_string(),
            client_ref: None,
            payload: json!({"description": "from another device"}),
            location: None,
            status: ReportStatus::Acknowledged,
            priority: Priority::High,
            created_at: start(),
        });
        let engine = engine_with(MemoryKv::new(), remote).await;

        let outcome = engine.reconcile_on_start("user-1").await.unwrap();
        let StartReconciliation::Cached { remote_id, .. } = outcome else {
            panic!("expected cached record, got {outcome:?}");
        };
        let record = engine.record(&RecordRef::Remote(remote_id)).await.unwrap();
        assert!(record.synced);
        assert_eq!(record.priority, Priority::High);

        assert!(matches!(
            engine.reconcile_on_start("user-1").await.unwrap(),
            StartReconciliation::AlreadyKnown { .. }
        ));
    }

    #[tokio::test]
    async fn start_reconciliation_tolerates_offline() {
        let engine = engine_with(MemoryKv::new(), offline_remote()).await;
        assert!(matches!(
            engine.reconcile_on_start("user-1").await.unwrap(),
            StartReconciliation::Unavailable { .. }
        ));
    }

    #[tokio::test]
    async fn invalid_writes_are_refused_before_queueing() {
        let engine = engine_with(MemoryKv::new(), ScriptedRemote::default()).await;
        assert!(engine
            .create_record("  ", ReportDraft::default())
            .await
            .is_err());

        let missing = engine
            .update_record_field(
                &RecordRef::Local(LocalId::new()),
                RecordField::Status,
                json!("resolved"),
            )
            .await;
        assert!(matches!(missing, Err(Error::NotFound(_))));
        assert!(engine.pending_operations().await.is_empty());
    }
}
