//! Drives sync passes from connectivity changes

use std::sync::Arc;

use tokio::sync::watch;

use super::engine::{DrainOutcome, SyncEngine};
use crate::error::Result;
use crate::kv::PersistentKv;
use crate::platform::{Clock, ConnectivityObserver};
use crate::remote::RemoteStore;

/// Subscribes to a [`ConnectivityObserver`] once, at construction, and
/// starts one sync pass per offline-to-online transition.
pub struct ConnectivityTrigger<K, R, C> {
    engine: Arc<SyncEngine<K, R, C>>,
    connectivity: watch::Receiver<bool>,
}

impl<K: PersistentKv, R: RemoteStore, C: Clock> ConnectivityTrigger<K, R, C> {
    pub fn new(engine: Arc<SyncEngine<K, R, C>>, observer: &impl ConnectivityObserver) -> Self {
        Self {
            engine,
            connectivity: observer.subscribe(),
        }
    }

    pub fn engine(&self) -> &Arc<SyncEngine<K, R, C>> {
        &self.engine
    }

    pub fn is_online(&self) -> bool {
        *self.connectivity.borrow()
    }

    /// Connectivity came back: start a pass unless one is already running
    pub async fn on_connectivity_restored(&self) -> Result<DrainOutcome> {
        tracing::info!("Connectivity restored; replaying queued operations");
        self.engine.drain().await
    }

    /// Manual "sync now"
    pub async fn drain_now(&self) -> Result<DrainOutcome> {
        self.engine.drain().await
    }

    /// Watch connectivity until the observer goes away.
    ///
    /// Starting online counts as a transition so work queued by an earlier
    /// run is not left waiting for the next outage.
    pub async fn run(&mut self) -> Result<()> {
        let mut online = false;
        loop {
            let now_online = *self.connectivity.borrow_and_update();
            if now_online && !online {
                self.drain_logged().await;
            } else if !now_online && online {
                tracing::info!("Connectivity lost; writes will be queued");
            }
            online = now_online;

            if self.connectivity.changed().await.is_err() {
                tracing::debug!("Connectivity observer closed; stopping trigger");
                return Ok(());
            }
        }
    }

    async fn drain_logged(&self) {
        match self.on_connectivity_restored().await {
            Ok(DrainOutcome::Completed(report)) if report.failed() > 0 => {
                for failure in &report.failures {
                    tracing::warn!(
                        "Dropped {} for {}: {}",
                        failure.operation.kind.name(),
                        failure.operation.target,
                        failure.reason
                    );
                }
            }
            Ok(_) => {}
            Err(error) => tracing::error!("Sync pass failed: {}", error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::models::{LocalId, NewRecord, RecordField, RemoteId, ReportDraft};
    use crate::platform::{ConnectivitySignal, SystemClock};
    use crate::remote::{CreatedRecord, RemoteError, RemoteRecord};
    use crate::sync::EngineConfig;
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct SignalRemote {
        online: Arc<AtomicBool>,
        creates: AtomicUsize,
    }

    impl RemoteStore for SignalRemote {
        async fn create_record(
            &self,
            _owner_id: &str,
            record: &NewRecord,
            client_ref: &LocalId,
        ) -> std::result::Result<CreatedRecord, RemoteError> {
            if !self.online.load(Ordering::SeqCst) {
                return Err(RemoteError::Network("offline".to_string()));
            }
            self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(CreatedRecord {
                id: RemoteId::new(format!("srv-{client_ref}")),
                created_at: record.created_at,
                status: record.status,
                priority: record.priority,
            })
        }

        async fn update_record_field(
            &self,
            _remote_id: &RemoteId,
            _field: RecordField,
            _value: &Value,
        ) -> std::result::Result<(), RemoteError> {
            Ok(())
        }

        async fn fetch_active_record(
            &self,
            _owner_id: &str,
        ) -> std::result::Result<Option<RemoteRecord>, RemoteError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn transition_to_online_drains_queue() {
        let signal = ConnectivitySignal::new(false);
        let online = Arc::new(AtomicBool::new(false));
        let remote = SignalRemote {
            online: Arc::clone(&online),
            creates: AtomicUsize::new(0),
        };
        let engine = Arc::new(
            SyncEngine::open(MemoryKv::new(), remote, SystemClock, EngineConfig::default())
                .await
                .unwrap(),
        );
        engine
            .create_record("user-1", ReportDraft::with_description("need water"))
            .await
            .unwrap();
        assert_eq!(engine.pending_operations().await.len(), 1);

        let mut trigger = ConnectivityTrigger::new(Arc::clone(&engine), &signal);
        let watcher = async {
            trigger.run().await.unwrap();
        };
        let driver = async {
            tokio::task::yield_now().await;
            online.store(true, Ordering::SeqCst);
            signal.set_online(true);
            for _ in 0..50 {
                if engine.pending_operations().await.is_empty() {
                    break;
                }
                tokio::task::yield_now().await;
            }
            drop(signal);
        };
        tokio::join!(watcher, driver);

        assert!(engine.pending_operations().await.is_empty());
        assert_eq!(engine.remote().creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn drain_now_with_empty_queue_completes() {
        let signal = ConnectivitySignal::new(true);
        let remote = SignalRemote {
            online: Arc::new(AtomicBool::new(true)),
            creates: AtomicUsize::new(0),
        };
        let engine = Arc::new(
            SyncEngine::open(MemoryKv::new(), remote, SystemClock, EngineConfig::default())
                .await
                .unwrap(),
        );
        let trigger = ConnectivityTrigger::new(engine, &signal);

        let outcome = trigger.drain_now().await.unwrap();
        assert_eq!(outcome, DrainOutcome::Completed(Default::default()));
        assert!(trigger.is_online());
    }
}
