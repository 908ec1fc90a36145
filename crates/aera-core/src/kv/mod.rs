//! Persistent key-value layer
//!
//! Everything the offline write path keeps locally goes through a
//! [`PersistentKv`]. Values are opaque bytes (JSON in practice). Writers must
//! expect [`KvError::QuotaExceeded`] and degrade instead of failing; see
//! [`LocalStore`].

mod memory;
mod sqlite;
mod store;

use thiserror::Error;

pub use memory::MemoryKv;
pub use sqlite::SqliteKv;
pub use store::{DegradedState, LocalStore, WriteOutcome};

/// Keys of the persisted local state
pub mod keys {
    pub const LOCAL_RECORDS: &str = "local-records";
    pub const OPERATION_QUEUE: &str = "operation-queue";
    pub const ID_RECONCILIATION_MAP: &str = "id-reconciliation-map";
    pub const STORAGE_DEGRADED_STATE: &str = "storage-degraded-state";
    pub const FAILED_OPERATIONS: &str = "failed-operations";
    pub const AUTH_SESSION: &str = "auth-session";
}

/// Result type for key-value operations
pub type KvResult<T> = Result<T, KvError>;

/// Errors raised by a key-value backend
#[derive(Debug, Error)]
pub enum KvError {
    /// The write does not fit in the store's capacity
    #[error("Storage quota exceeded: {requested} bytes requested, {available} available")]
    QuotaExceeded { requested: usize, available: usize },

    /// Backend failure unrelated to capacity
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl KvError {
    #[must_use]
    pub const fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }
}

impl From<rusqlite::Error> for KvError {
    fn from(error: rusqlite::Error) -> Self {
        match error.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DiskFull) => Self::QuotaExceeded {
                requested: 0,
                available: 0,
            },
            _ => Self::Backend(error.to_string()),
        }
    }
}

/// Durable local storage with bounded capacity
#[allow(async_fn_in_trait)]
pub trait PersistentKv {
    /// Read the value stored under `key`
    async fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: Vec<u8>) -> KvResult<()>;

    /// Store several keys at once. Either every entry is written or none is.
    async fn set_batch(&self, entries: Vec<(String, Vec<u8>)>) -> KvResult<()>;
}
