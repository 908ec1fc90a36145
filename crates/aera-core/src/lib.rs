//! aera-core - Core library for Aera
//!
//! This crate contains the offline-first write path shared by every Aera
//! client: the persistent key-value layer, the local replica (records,
//! operation queue, identifier map), the remote store boundary, and the sync
//! engine that replays queued writes once connectivity returns.

pub mod auth;
pub mod config;
pub mod error;
pub mod kv;
pub mod models;
pub mod platform;
pub mod remote;
pub mod replica;
pub mod state;
pub mod sync;

pub use error::{Error, Result};
pub use models::{
    LocalId, LocalRecord, OpId, QueuedOperation, RecordField, RecordRef, RemoteId, ReportDraft,
};
pub use state::SyncIndicator;
pub use sync::{
    ConnectivityTrigger, DrainOutcome, DrainReport, EngineConfig, StartReconciliation, SyncEngine,
    WriteReceipt,
};
