//! Quota-aware wrapper over a key-value backend

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{keys, KvError, KvResult, PersistentKv};
use crate::error::Result;

/// Persisted marker that local storage runs with reduced guarantees
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedState {
    pub degraded: bool,
    pub reason: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// How a pruning-aware write ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Written as given
    Written,
    /// Written after the caller's working set was pruned
    Pruned,
    /// Nothing could be written; the store is now degraded
    Degraded,
}

/// Local persistence handle: a [`PersistentKv`] plus the degraded flag.
///
/// Quota exhaustion never escapes as an error from the pruning writes; the
/// caller shrinks its working set, the write is retried once, and if that
/// fails too the store flips to degraded.
pub struct LocalStore<K> {
    kv: K,
    degraded: Mutex<DegradedState>,
}

impl<K: PersistentKv> LocalStore<K> {
    /// Wrap `kv`, restoring any degraded state from a previous run
    pub async fn open(kv: K) -> Result<Self> {
        let degraded = match kv.get(keys::STORAGE_DEGRADED_STATE).await? {
            Some(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|error| {
                tracing::warn!("Ignoring unreadable degraded state: {}", error);
                DegradedState::default()
            }),
            None => DegradedState::default(),
        };
        if degraded.degraded {
            tracing::warn!(
                "Local storage is degraded since {:?}: {}",
                degraded.timestamp,
                degraded.reason.as_deref().unwrap_or("unknown reason")
            );
        }
        Ok(Self {
            kv,
            degraded: Mutex::new(degraded),
        })
    }

    /// The wrapped backend
    pub const fn kv(&self) -> &K {
        &self.kv
    }

    /// Read and decode a JSON value
    pub async fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.kv.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Plain write; quota errors are returned to the caller
    pub async fn set(&self, key: &str, value: Vec<u8>) -> KvResult<()> {
        self.kv.set(key, value).await
    }

    /// Write one key, shrinking it with `produce_pruned` on quota exhaustion
    pub async fn set_with_pruning<F>(
        &self,
        key: &str,
        value: Vec<u8>,
        produce_pruned: F,
        now: DateTime<Utc>,
    ) -> Result<WriteOutcome>
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        self.write_batch_with_pruning(vec![(key.to_string(), value)], key, produce_pruned, now)
            .await
    }

    /// Write several keys atomically. On quota exhaustion the entry for
    /// `prune_key` is replaced by `produce_pruned()` and the batch is retried
    /// once.
    pub async fn write_batch_with_pruning<F>(
        &self,
        mut entries: Vec<(String, Vec<u8>)>,
        prune_key: &str,
        produce_pruned: F,
        now: DateTime<Utc>,
    ) -> Result<WriteOutcome>
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        let first_error = match self.kv.set_batch(entries.clone()).await {
            Ok(()) => return Ok(WriteOutcome::Written),
            Err(error) if error.is_quota_exceeded() => error,
            Err(error) => return Err(error.into()),
        };

        tracing::warn!("{}; pruning '{}' and retrying once", first_error, prune_key);
        let pruned = produce_pruned()?;
        match entries.iter_mut().find(|(key, _)| key == prune_key) {
            Some(entry) => entry.1 = pruned,
            None => entries.push((prune_key.to_string(), pruned)),
        }

        match self.kv.set_batch(entries).await {
            Ok(()) => Ok(WriteOutcome::Pruned),
            Err(error) if error.is_quota_exceeded() => {
                self.mark_degraded(&error, now).await;
                Ok(WriteOutcome::Degraded)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Current degraded state
    pub fn degraded_state(&self) -> DegradedState {
        self.lock_degraded().clone()
    }

    pub fn is_degraded(&self) -> bool {
        self.lock_degraded().degraded
    }

    /// Clear the degraded flag once the user has freed space
    pub async fn clear_degraded(&self) -> Result<()> {
        let cleared = DegradedState::default();
        let bytes = serde_json::to_vec(&cleared)?;
        self.kv.set(keys::STORAGE_DEGRADED_STATE, bytes).await?;
        *self.lock_degraded() = cleared;
        Ok(())
    }

    async fn mark_degraded(&self, error: &KvError, now: DateTime<Utc>) {
        let state = DegradedState {
            degraded: true,
            reason: Some(format!("local writes failed after pruning: {error}")),
            timestamp: Some(now),
        };
        tracing::warn!(
            "Local storage degraded: {}",
            state.reason.as_deref().unwrap_or_default()
        );
        *self.lock_degraded() = state.clone();

        match serde_json::to_vec(&state) {
            Ok(bytes) => {
                if let Err(error) = self.kv.set(keys::STORAGE_DEGRADED_STATE, bytes).await {
                    tracing::warn!("Failed to persist degraded state: {}", error);
                }
            }
            Err(error) => tracing::warn!("Failed to encode degraded state: {}", error),
        }
    }

    fn lock_degraded(&self) -> MutexGuard<'_, DegradedState> {
        self.degraded
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_write_without_pressure_is_plain() {
        let store = LocalStore::open(MemoryKv::new()).await.unwrap();
        let outcome = store
            .set_with_pruning("k", vec![1; 4], || Ok(vec![1]), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Written);
        assert_eq!(store.kv().get("k").await.unwrap(), Some(vec![1; 4]));
    }

    #[tokio::test]
    async fn test_quota_triggers_pruned_retry() {
        let store = LocalStore::open(MemoryKv::with_capacity(4)).await.unwrap();
        let outcome = store
            .set_with_pruning("k", vec![1; 16], || Ok(vec![1; 2]), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Pruned);
        assert_eq!(store.kv().get("k").await.unwrap(), Some(vec![1; 2]));
        assert!(!store.is_degraded());
    }

    #[tokio::test]
    async fn test_failed_retry_degrades_and_persists_flag() {
        let kv = MemoryKv::with_capacity(200);
        let store = LocalStore::open(kv.clone()).await.unwrap();
        let outcome = store
            .set_with_pruning("k", vec![1; 500], || Ok(vec![1; 300]), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Degraded);

        let state = store.degraded_state();
        assert!(state.degraded);
        assert!(state.reason.as_deref().is_some_and(|r| !r.is_empty()));

        // A fresh handle over the same backend sees the persisted flag.
        let reopened = LocalStore::open(kv).await.unwrap();
        assert!(reopened.is_degraded());

        reopened.clear_degraded().await.unwrap();
        assert!(!reopened.is_degraded());
    }

    #[tokio::test]
    async fn test_pruned_entry_added_when_missing_from_batch() {
        let store = LocalStore::open(MemoryKv::with_capacity(6)).await.unwrap();
        let outcome = store
            .write_batch_with_pruning(
                vec![("a".to_string(), vec![0; 8])],
                "b",
                || Ok(vec![0; 1]),
                Utc::now(),
            )
            .await
            .unwrap();
        // "a" alone is too large, so the retry fails as well.
        assert_eq!(outcome, WriteOutcome::Degraded);
    }
}
