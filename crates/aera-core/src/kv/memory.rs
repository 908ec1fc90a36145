//! In-memory key-value store (tests and ephemeral sessions)

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{KvError, KvResult, PersistentKv};

/// In-memory [`PersistentKv`] with an optional byte capacity.
///
/// Clones share the same underlying map, so a test can keep a handle while
/// the engine owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryKv {
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    capacity: Option<usize>,
    reject_writes: Arc<AtomicBool>,
}

impl MemoryKv {
    /// Unbounded store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that holds at most `capacity` bytes of values
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    /// Make every subsequent write fail with `QuotaExceeded`
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Total bytes currently held
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.lock().map_or(0, |entries| entries.values().map(Vec::len).sum())
    }

    fn lock(&self) -> KvResult<MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.entries
            .lock()
            .map_err(|error| KvError::Backend(error.to_string()))
    }

    fn check_capacity(
        &self,
        entries: &HashMap<String, Vec<u8>>,
        incoming: &[(String, Vec<u8>)],
    ) -> KvResult<()> {
        let requested: usize = incoming.iter().map(|(_, value)| value.len()).sum();
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(KvError::QuotaExceeded {
                requested,
                available: 0,
            });
        }

        let Some(capacity) = self.capacity else {
            return Ok(());
        };
        let freed: usize = incoming
            .iter()
            .filter_map(|(key, _)| entries.get(key).map(Vec::len))
            .sum();
        let used: usize = entries.values().map(Vec::len).sum();
        let available = capacity.saturating_sub(used.saturating_sub(freed));
        if requested > available {
            return Err(KvError::QuotaExceeded {
                requested,
                available,
            });
        }
        Ok(())
    }
}

impl PersistentKv for MemoryKv {
    async fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> KvResult<()> {
        self.set_batch(vec![(key.to_string(), value)]).await
    }

    async fn set_batch(&self, entries: Vec<(String, Vec<u8>)>) -> KvResult<()> {
        let mut stored = self.lock()?;
        self.check_capacity(&stored, &entries)?;
        stored.extend(entries);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get() {
        let kv = MemoryKv::new();
        kv.set("a", b"hello".to_vec()).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), Some(b"hello".to_vec()));
        assert_eq!(kv.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_capacity_counts_replaced_value_as_freed() {
        let kv = MemoryKv::with_capacity(10);
        kv.set("a", vec![0; 8]).await.unwrap();
        // Replacing "a" frees its 8 bytes first.
        kv.set("a", vec![0; 10]).await.unwrap();

        let error = kv.set("b", vec![0; 1]).await.unwrap_err();
        assert!(error.is_quota_exceeded());
        assert_eq!(kv.used_bytes(), 10);
    }

    #[tokio::test]
    async fn test_batch_is_all_or_nothing() {
        let kv = MemoryKv::with_capacity(10);
        let result = kv
            .set_batch(vec![
                ("a".to_string(), vec![0; 6]),
                ("b".to_string(), vec![0; 6]),
            ])
            .await;
        assert!(result.is_err());
        assert_eq!(kv.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reject_writes_simulates_quota() {
        let kv = MemoryKv::new();
        kv.set_reject_writes(true);
        assert!(kv.set("a", vec![1]).await.unwrap_err().is_quota_exceeded());

        kv.set_reject_writes(false);
        kv.set("a", vec![1]).await.unwrap();
    }

    #[tokio::test]
    async fn test_clones_share_entries() {
        let kv = MemoryKv::new();
        let handle = kv.clone();
        kv.set("a", vec![1, 2]).await.unwrap();
        assert_eq!(handle.get("a").await.unwrap(), Some(vec![1, 2]));
    }
}
