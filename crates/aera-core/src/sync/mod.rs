//! Sync engine and connectivity trigger
//!
//! [`SyncEngine`] owns the local replica and replays the operation queue
//! against a [`crate::remote::RemoteStore`]. [`ConnectivityTrigger`] drives
//! it whenever connectivity comes back.

mod engine;
mod trigger;

pub use engine::{
    DrainOutcome, DrainReport, EngineConfig, StartReconciliation, SyncEngine, WriteReceipt,
};
pub use trigger::ConnectivityTrigger;
