//! Queued remote mutations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::ids::{LocalId, OpId, RecordRef};
use super::record::NewRecord;
use crate::error::Error;

/// Field group addressed by an update. At most one queued update exists per
/// `(target, field)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordField {
    Status,
    Priority,
    Location,
    Payload,
}

impl RecordField {
    /// Column name on the remote table
    #[must_use]
    pub const fn column(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Priority => "priority",
            Self::Location => "location",
            Self::Payload => "payload",
        }
    }
}

impl fmt::Display for RecordField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

impl FromStr for RecordField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "status" => Ok(Self::Status),
            "priority" => Ok(Self::Priority),
            "location" => Ok(Self::Location),
            "payload" => Ok(Self::Payload),
            other => Err(Error::InvalidInput(format!("unknown record field '{other}'"))),
        }
    }
}

/// What a queued operation does. Closed set: the sync engine matches it
/// exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationKind {
    CreateRecord { record: NewRecord },
    UpdateRecordField { field: RecordField, value: Value },
}

impl OperationKind {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CreateRecord { .. } => "create_record",
            Self::UpdateRecordField { .. } => "update_record_field",
        }
    }
}

/// A durable, replayable description of one pending remote write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    pub op_id: OpId,
    pub target: RecordRef,
    #[serde(flatten)]
    pub kind: OperationKind,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedOperation {
    /// Queue the creation of the record minted as `local_id`
    #[must_use]
    pub fn create(local_id: LocalId, record: NewRecord, now: DateTime<Utc>) -> Self {
        Self {
            op_id: OpId::new(),
            target: RecordRef::Local(local_id),
            kind: OperationKind::CreateRecord { record },
            enqueued_at: now,
        }
    }

    /// Queue a single field update
    #[must_use]
    pub fn update(target: RecordRef, field: RecordField, value: Value, now: DateTime<Utc>) -> Self {
        Self {
            op_id: OpId::new(),
            target,
            kind: OperationKind::UpdateRecordField { field, value },
            enqueued_at: now,
        }
    }

    #[must_use]
    pub const fn is_create(&self) -> bool {
        matches!(self.kind, OperationKind::CreateRecord { .. })
    }

    /// The collapse key of an update; creates never collapse
    #[must_use]
    pub const fn collapse_key(&self) -> Option<(&RecordRef, RecordField)> {
        match &self.kind {
            OperationKind::UpdateRecordField { field, .. } => Some((&self.target, *field)),
            OperationKind::CreateRecord { .. } => None,
        }
    }
}

/// An operation dropped as non-recoverable, kept for the error indicator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedOperation {
    pub operation: QueuedOperation,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Priority, RemoteId, ReportStatus};
    use serde_json::json;

    fn new_record() -> NewRecord {
        NewRecord {
            owner_id: "user-1".to_string(),
            payload: json!({"description": "flooded basement"}),
            location: None,
            status: ReportStatus::Active,
            priority: Priority::Medium,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_create_never_has_collapse_key() {
        let op = QueuedOperation::create(LocalId::new(), new_record(), Utc::now());
        assert!(op.is_create());
        assert!(op.collapse_key().is_none());
    }

    #[test]
    fn test_update_collapse_key_uses_target_and_field() {
        let target = RecordRef::Remote(RemoteId::new("7"));
        let op = QueuedOperation::update(target.clone(), RecordField::Location, json!({}), Utc::now());
        assert_eq!(op.collapse_key(), Some((&target, RecordField::Location)));
    }

    #[test]
    fn test_operation_json_shape() {
        let op = QueuedOperation::update(
            RecordRef::Remote(RemoteId::new("7")),
            RecordField::Status,
            json!("resolved"),
            Utc::now(),
        );
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value["kind"], "update_record_field");
        assert_eq!(value["field"], "status");
        assert_eq!(value["target"]["namespace"], "remote");

        let parsed: QueuedOperation = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, op);
    }

    #[test]
    fn test_record_field_parse() {
        assert_eq!("Location".parse::<RecordField>().unwrap(), RecordField::Location);
        assert!("address".parse::<RecordField>().is_err());
    }
}
