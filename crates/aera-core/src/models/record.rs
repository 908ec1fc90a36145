//! Emergency report model as held by the local replica

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::ids::{LocalId, RecordRef, RemoteId};
use super::operation::RecordField;
use crate::error::{Error, Result};

/// Lifecycle status of a report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    #[default]
    Active,
    Acknowledged,
    Resolved,
    Cancelled,
}

impl ReportStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the report still needs responders
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Active | Self::Acknowledged)
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "acknowledged" => Ok(Self::Acknowledged),
            "resolved" => Ok(Self::Resolved),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(Error::InvalidInput(format!("unknown report status '{other}'"))),
        }
    }
}

/// Triage priority of a report
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(Error::InvalidInput(format!("unknown priority '{other}'"))),
        }
    }
}

/// User input for a new report, before it has any identity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportDraft {
    pub payload: Value,
    pub location: Option<Value>,
    pub status: ReportStatus,
    pub priority: Priority,
}

impl ReportDraft {
    /// A draft carrying a free-text description
    #[must_use]
    pub fn with_description(description: impl Into<String>) -> Self {
        Self {
            payload: serde_json::json!({ "description": description.into() }),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn location(mut self, location: Value) -> Self {
        self.location = Some(location);
        self
    }
}

/// Wire shape of a record creation, as stored in a queued `CreateRecord`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRecord {
    pub owner_id: String,
    pub payload: Value,
    pub location: Option<Value>,
    pub status: ReportStatus,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
}

/// The client's view of one report.
///
/// While `synced` is false the record only has a `local_id`; once the create
/// is accepted, `remote_id` is set and becomes the canonical reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalRecord {
    pub local_id: LocalId,
    pub remote_id: Option<RemoteId>,
    pub synced: bool,
    pub owner_id: String,
    pub payload: Value,
    pub location: Option<Value>,
    pub status: ReportStatus,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when the remote store permanently rejected this record's creation
    #[serde(default)]
    pub last_sync_error: Option<String>,
}

impl LocalRecord {
    /// Create an unsynced record from a draft
    #[must_use]
    pub fn new(owner_id: impl Into<String>, draft: ReportDraft, now: DateTime<Utc>) -> Self {
        Self {
            local_id: LocalId::new(),
            remote_id: None,
            synced: false,
            owner_id: owner_id.into(),
            payload: draft.payload,
            location: draft.location,
            status: draft.status,
            priority: draft.priority,
            created_at: now,
            updated_at: now,
            last_sync_error: None,
        }
    }

    /// The reference remote operations should use for this record
    #[must_use]
    pub fn reference(&self) -> RecordRef {
        self.remote_id
            .clone()
            .map_or(RecordRef::Local(self.local_id), RecordRef::Remote)
    }

    /// Whether this record is addressed by `target`
    #[must_use]
    pub fn matches(&self, target: &RecordRef) -> bool {
        match target {
            RecordRef::Local(id) => self.local_id == *id,
            RecordRef::Remote(id) => self.remote_id.as_ref() == Some(id),
        }
    }

    /// Snapshot of the fields sent with the creating operation
    #[must_use]
    pub fn to_new_record(&self) -> NewRecord {
        NewRecord {
            owner_id: self.owner_id.clone(),
            payload: self.payload.clone(),
            location: self.location.clone(),
            status: self.status,
            priority: self.priority,
            created_at: self.created_at,
        }
    }

    /// Record that the remote store accepted the creation.
    ///
    /// Flips `synced` and sets `remote_id` together so the sync invariant
    /// holds for every observer.
    pub fn mark_synced(&mut self, remote_id: RemoteId) {
        self.remote_id = Some(remote_id);
        self.synced = true;
        self.last_sync_error = None;
    }

    /// Apply a single field update locally (optimistic path)
    pub fn apply_field(
        &mut self,
        field: RecordField,
        value: &Value,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match field {
            RecordField::Status => self.status = parse_enum_value(value)?,
            RecordField::Priority => self.priority = parse_enum_value(value)?,
            RecordField::Location => {
                self.location = if value.is_null() {
                    None
                } else {
                    Some(value.clone())
                };
            }
            RecordField::Payload => {
                if !value.is_object() {
                    return Err(Error::InvalidInput(
                        "payload must be a JSON object".to_string(),
                    ));
                }
                self.payload = value.clone();
            }
        }
        self.updated_at = now;
        Ok(())
    }
}

fn parse_enum_value<T: FromStr<Err = Error>>(value: &Value) -> Result<T> {
    value
        .as_str()
        .ok_or_else(|| Error::InvalidInput(format!("expected a string, got {value}")))?
        .parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record() -> LocalRecord {
        LocalRecord::new(
            "user-1",
            ReportDraft::with_description("Trapped on roof").priority(Priority::High),
            Utc::now(),
        )
    }

    #[test]
    fn test_new_record_is_unsynced() {
        let record = record();
        assert!(!record.synced);
        assert!(record.remote_id.is_none());
        assert_eq!(record.reference(), RecordRef::Local(record.local_id));
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn test_mark_synced_sets_remote_reference() {
        let mut record = record();
        record.last_sync_error = Some("old".to_string());
        record.mark_synced(RemoteId::new("srv-9"));

        assert!(record.synced);
        assert_eq!(record.reference(), RecordRef::Remote(RemoteId::new("srv-9")));
        assert!(record.matches(&RecordRef::Local(record.local_id)));
        assert!(record.last_sync_error.is_none());
    }

    #[test]
    fn test_apply_status_and_priority() {
        let mut record = record();
        let later = record.created_at + chrono::Duration::seconds(5);

        record
            .apply_field(RecordField::Status, &json!("resolved"), later)
            .unwrap();
        record
            .apply_field(RecordField::Priority, &json!("critical"), later)
            .unwrap();

        assert_eq!(record.status, ReportStatus::Resolved);
        assert_eq!(record.priority, Priority::Critical);
        assert_eq!(record.updated_at, later);
    }

    #[test]
    fn test_apply_location_null_clears() {
        let mut record = record();
        let now = Utc::now();
        record
            .apply_field(RecordField::Location, &json!({"lat": 1.0, "lon": 2.0}), now)
            .unwrap();
        assert!(record.location.is_some());

        record
            .apply_field(RecordField::Location, &Value::Null, now)
            .unwrap();
        assert!(record.location.is_none());
    }

    #[test]
    fn test_apply_rejects_invalid_values() {
        let mut record = record();
        let now = Utc::now();
        assert!(record
            .apply_field(RecordField::Status, &json!("exploded"), now)
            .is_err());
        assert!(record
            .apply_field(RecordField::Priority, &json!(3), now)
            .is_err());
        assert!(record
            .apply_field(RecordField::Payload, &json!("text"), now)
            .is_err());
        assert_eq!(record.status, ReportStatus::Active);
    }

    #[test]
    fn test_status_parse_is_case_insensitive() {
        assert_eq!("Canceled".parse::<ReportStatus>().unwrap(), ReportStatus::Cancelled);
        assert!(ReportStatus::Acknowledged.is_open());
        assert!(!ReportStatus::Resolved.is_open());
    }
}
