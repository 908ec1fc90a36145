//! `SQLite`-backed key-value store

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};

use super::{KvError, KvResult, PersistentKv};

/// Durable [`PersistentKv`] on a single `SQLite` table.
///
/// `rusqlite` is synchronous, so every call runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteKv {
    conn: Arc<Mutex<Connection>>,
    capacity: Option<usize>,
}

impl SqliteKv {
    /// Open (or create) the store at `path`
    pub fn open(path: impl AsRef<Path>) -> KvResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, None)
    }

    /// Open an in-memory store (useful for testing)
    pub fn open_in_memory() -> KvResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, None)
    }

    /// Limit the total bytes of stored values
    #[must_use]
    pub const fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    fn from_connection(conn: Connection, capacity: Option<usize>) -> KvResult<Self> {
        // WAL is unavailable for in-memory databases; ignore the result.
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY NOT NULL,
                value BLOB NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            capacity,
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> KvResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> KvResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|error| KvError::Backend(error.to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|error| KvError::Backend(format!("storage task failed: {error}")))?
    }
}

fn write_entries(
    conn: &mut Connection,
    capacity: Option<usize>,
    entries: &[(String, Vec<u8>)],
) -> KvResult<()> {
    let tx = conn.transaction()?;

    if let Some(capacity) = capacity {
        let used: i64 =
            tx.query_row("SELECT COALESCE(SUM(LENGTH(value)), 0) FROM kv", [], |row| {
                row.get(0)
            })?;
        let mut freed = 0usize;
        for (key, _) in entries {
            let existing: Option<i64> = tx
                .query_row(
                    "SELECT LENGTH(value) FROM kv WHERE key = ?",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            freed += existing.and_then(|len| usize::try_from(len).ok()).unwrap_or(0);
        }
        let used = usize::try_from(used).unwrap_or(usize::MAX);
        let available = capacity.saturating_sub(used.saturating_sub(freed));
        let requested: usize = entries.iter().map(|(_, value)| value.len()).sum();
        if requested > available {
            return Err(KvError::QuotaExceeded {
                requested,
                available,
            });
        }
    }

    let now = chrono::Utc::now().timestamp_millis();
    {
        let mut stmt = tx.prepare(
            "INSERT INTO kv (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )?;
        for (key, value) in entries {
            stmt.execute(params![key, value, now])?;
        }
    }
    tx.commit()?;
    Ok(())
}

impl PersistentKv for SqliteKv {
    async fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
                    row.get(0)
                })
                .optional()?)
        })
        .await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> KvResult<()> {
        self.set_batch(vec![(key.to_string(), value)]).await
    }

    async fn set_batch(&self, entries: Vec<(String, Vec<u8>)>) -> KvResult<()> {
        let capacity = self.capacity;
        self.with_conn(move |conn| write_entries(conn, capacity, &entries))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_set_and_get_in_memory() {
        let kv = SqliteKv::open_in_memory().unwrap();
        kv.set("a", b"one".to_vec()).await.unwrap();
        kv.set("a", b"two".to_vec()).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), Some(b"two".to_vec()));
        assert_eq!(kv.get("b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("aera.db");
        {
            let kv = SqliteKv::open(&path).unwrap();
            kv.set_batch(vec![
                ("a".to_string(), b"1".to_vec()),
                ("b".to_string(), b"2".to_vec()),
            ])
            .await
            .unwrap();
        }

        let kv = SqliteKv::open(&path).unwrap();
        assert_eq!(kv.get("a").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(kv.get("b").await.unwrap(), Some(b"2".to_vec()));
    }

    #[tokio::test]
    async fn test_capacity_rejects_batch_atomically() {
        let kv = SqliteKv::open_in_memory().unwrap().with_capacity(8);
        kv.set("a", vec![0; 4]).await.unwrap();

        let error = kv
            .set_batch(vec![
                ("a".to_string(), vec![0; 2]),
                ("b".to_string(), vec![0; 7]),
            ])
            .await
            .unwrap_err();
        assert!(error.is_quota_exceeded());
        assert_eq!(kv.get("a").await.unwrap(), Some(vec![0; 4]));
        assert_eq!(kv.get("b").await.unwrap(), None);
    }
}
