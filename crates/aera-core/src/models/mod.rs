//! Data models for the offline write path

mod ids;
mod operation;
mod record;

pub use ids::{LocalId, OpId, RecordRef, RemoteId};
pub use operation::{FailedOperation, OperationKind, QueuedOperation, RecordField};
pub use record::{LocalRecord, NewRecord, Priority, ReportDraft, ReportStatus};
