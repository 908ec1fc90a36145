//! Remote selection for the CLI
//!
//! A profile without Supabase settings, or without a stored session, still
//! accepts writes: they queue locally until the remote becomes usable.

use aera_core::auth::KvSessionStore;
use aera_core::kv::SqliteKv;
use aera_core::models::NewRecord;
use aera_core::remote::{CreatedRecord, RemoteError, RemoteRecord, RemoteStore, SupabaseRemote};
use aera_core::{LocalId, RecordField, RemoteId};
use serde_json::Value;

pub const NOT_CONFIGURED: &str = "Supabase is not configured for this profile";
pub const SIGNED_OUT: &str = "no stored session; run `aera session import`";

pub enum CliRemote {
    Supabase(SupabaseRemote<KvSessionStore<SqliteKv>>),
    /// Every call fails as a network error so operations stay queued
    Unavailable(&'static str),
}

impl CliRemote {
    pub const fn unavailable_reason(&self) -> Option<&'static str> {
        match self {
            Self::Supabase(_) => None,
            Self::Unavailable(reason) => Some(*reason),
        }
    }

    pub async fn probe(&self) -> bool {
        match self {
            Self::Supabase(remote) => remote.probe().await,
            Self::Unavailable(_) => false,
        }
    }
}

impl RemoteStore for CliRemote {
    async fn create_record(
        &self,
        owner_id: &str,
        record: &NewRecord,
        client_ref: &LocalId,
    ) -> Result<CreatedRecord, RemoteError> {
        match self {
            Self::Supabase(remote) => remote.create_record(owner_id, record, client_ref).await,
            Self::Unavailable(reason) => Err(RemoteError::Network((*reason).to_string())),
        }
    }

    async fn update_record_field(
        &self,
        remote_id: &RemoteId,
        field: RecordField,
        value: &Value,
    ) -> Result<(), RemoteError> {
        match self {
            Self::Supabase(remote) => remote.update_record_field(remote_id, field, value).await,
            Self::Unavailable(reason) => Err(RemoteError::Network((*reason).to_string())),
        }
    }

    async fn fetch_active_record(
        &self,
        owner_id: &str,
    ) -> Result<Option<RemoteRecord>, RemoteError> {
        match self {
            Self::Supabase(remote) => remote.fetch_active_record(owner_id).await,
            Self::Unavailable(reason) => Err(RemoteError::Network((*reason).to_string())),
        }
    }

    async fn refresh_auth(&self) -> Result<(), RemoteError> {
        match self {
            Self::Supabase(remote) => remote.refresh_auth().await,
            Self::Unavailable(reason) => Err(RemoteError::Network((*reason).to_string())),
        }
    }
}
