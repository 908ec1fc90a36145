//! Remote store boundary
//!
//! The sync engine depends on the authoritative backend only through
//! [`RemoteStore`]. [`SupabaseRemote`] implements it over PostgREST.

mod supabase;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use supabase::{SupabaseRemote, SupabaseRemoteConfig};

use crate::models::{LocalId, NewRecord, Priority, RecordField, RemoteId, ReportStatus};

/// Failures reported by a remote store
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Transport failure or server-side unavailability
    #[error("Network error: {0}")]
    Network(String),

    /// The call did not finish within the caller's timeout
    #[error("Remote call timed out")]
    Timeout,

    /// The backend rejected the payload; waiting will not fix it
    #[error("Validation error: {0}")]
    Validation(String),

    /// Credentials missing or expired
    #[error("Authentication error: {0}")]
    Auth(String),
}

impl RemoteError {
    /// Whether the operation should stay queued for the next pass.
    ///
    /// `Auth` is not recoverable by waiting; the engine refreshes the session
    /// once and retries before giving up.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout)
    }
}

/// Server response to a create
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedRecord {
    pub id: RemoteId,
    pub created_at: DateTime<Utc>,
    pub status: ReportStatus,
    pub priority: Priority,
}

/// A record as held by the remote store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: RemoteId,
    pub owner_id: String,
    /// Idempotency key sent with the create: the client's local id
    pub client_ref: Option<LocalId>,
    pub payload: Value,
    pub location: Option<Value>,
    pub status: ReportStatus,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
}

/// The authoritative store the queue is replayed against
#[allow(async_fn_in_trait)]
pub trait RemoteStore {
    /// Create a record. `client_ref` lets the backend deduplicate a replayed
    /// create.
    async fn create_record(
        &self,
        owner_id: &str,
        record: &NewRecord,
        client_ref: &LocalId,
    ) -> Result<CreatedRecord, RemoteError>;

    /// Set one field of an existing record
    async fn update_record_field(
        &self,
        remote_id: &RemoteId,
        field: RecordField,
        value: &Value,
    ) -> Result<(), RemoteError>;

    /// The owner's currently open record, if any (used on cold start)
    async fn fetch_active_record(&self, owner_id: &str)
        -> Result<Option<RemoteRecord>, RemoteError>;

    /// Refresh expired credentials. Stores without sessions cannot recover
    /// from an auth failure.
    async fn refresh_auth(&self) -> Result<(), RemoteError> {
        Err(RemoteError::Auth(
            "remote store does not support session refresh".to_string(),
        ))
    }
}
