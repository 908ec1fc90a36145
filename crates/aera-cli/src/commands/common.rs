use std::env;
use std::path::{Path, PathBuf};

use aera_core::auth::{AuthSession, KvSessionStore, SessionPersistence};
use aera_core::config::{normalize_text_option, ClientConfig};
use aera_core::kv::SqliteKv;
use aera_core::models::{FailedOperation, OperationKind};
use aera_core::platform::SystemClock;
use aera_core::remote::SupabaseRemote;
use aera_core::{LocalRecord, QueuedOperation, RecordRef, SyncEngine};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::config_profiles::CliProfilesConfig;
use crate::error::CliError;
use crate::remote::{CliRemote, NOT_CONFIGURED, SIGNED_OUT};

pub const ENV_DB_PATH: &str = "AERA_DB_PATH";

pub type CliEngine = SyncEngine<SqliteKv, CliRemote, SystemClock>;

/// Resolved profile, settings and replica location for one invocation
#[derive(Debug, Clone)]
pub struct CliContext {
    pub profile_name: String,
    pub config: ClientConfig,
    pub db_path: PathBuf,
}

impl CliContext {
    pub fn load(profile: Option<&str>, db_path: Option<PathBuf>) -> Result<Self, CliError> {
        let profiles = CliProfilesConfig::load()?;
        let profile_name = profiles.resolve_profile_name(profile);
        let config = profiles
            .profile(&profile_name)
            .cloned()
            .unwrap_or_default()
            .client_config();
        config.validate()?;
        let db_path = resolve_db_path(db_path, &profile_name)?;

        Ok(Self {
            profile_name,
            config,
            db_path,
        })
    }

    /// Open the replica and the engine around it
    pub async fn open(&self) -> Result<OpenReplica, CliError> {
        let kv = open_kv(&self.db_path)?;
        let sessions = KvSessionStore::new(kv.clone());
        let signed_in = sessions.load_session().await?.is_some();
        let remote = build_remote(&self.config, kv.clone(), signed_in)?;
        let engine = SyncEngine::open(
            kv.clone(),
            remote,
            SystemClock,
            self.config.engine_config(),
        )
        .await?;

        Ok(OpenReplica { engine, sessions })
    }

    /// Only the session store, for commands that never touch the replica
    pub fn open_sessions(&self) -> Result<KvSessionStore<SqliteKv>, CliError> {
        Ok(KvSessionStore::new(open_kv(&self.db_path)?))
    }
}

pub struct OpenReplica {
    pub engine: CliEngine,
    pub sessions: KvSessionStore<SqliteKv>,
}

impl OpenReplica {
    pub async fn session(&self) -> Result<Option<AuthSession>, CliError> {
        Ok(self.sessions.load_session().await?)
    }

    /// `--owner`, else the signed-in user
    pub async fn resolve_owner(&self, explicit: Option<String>) -> Result<String, CliError> {
        if let Some(owner) = normalize_text_option(explicit) {
            return Ok(owner);
        }
        self.session()
            .await?
            .map(|session| session.user.id)
            .ok_or(CliError::MissingOwner)
    }
}

pub fn build_remote(
    config: &ClientConfig,
    kv: SqliteKv,
    signed_in: bool,
) -> Result<CliRemote, CliError> {
    if !config.has_remote() {
        tracing::debug!("No Supabase settings; writes stay queued locally");
        return Ok(CliRemote::Unavailable(NOT_CONFIGURED));
    }
    if !signed_in {
        tracing::debug!("No stored session; writes stay queued locally");
        return Ok(CliRemote::Unavailable(SIGNED_OUT));
    }
    let remote = SupabaseRemote::new(config.remote_config()?, KvSessionStore::new(kv))?;
    Ok(CliRemote::Supabase(remote))
}

pub fn open_kv(path: &Path) -> Result<SqliteKv, CliError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(SqliteKv::open(path)?)
}

/// `--db-path`, then `AERA_DB_PATH`, then one database per profile in the
/// user data directory
pub fn resolve_db_path(cli_db_path: Option<PathBuf>, profile_name: &str) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_db_path {
        return Ok(path);
    }
    if let Some(path) = normalize_text_option(env::var(ENV_DB_PATH).ok()) {
        return Ok(PathBuf::from(path));
    }
    default_db_path(profile_name)
}

pub fn default_db_path(profile_name: &str) -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("aera").join(format!("{profile_name}.db")))
        .ok_or_else(|| CliError::Config("Failed to resolve data directory".to_string()))
}

#[derive(Debug, Serialize)]
pub struct ReportListItem {
    pub local_id: String,
    pub remote_id: Option<String>,
    pub status: String,
    pub priority: String,
    pub synced: bool,
    pub description: String,
    pub location: Option<Value>,
    pub created_at: String,
    pub updated_at: String,
    pub relative_time: String,
    pub last_sync_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OperationListItem {
    pub op_id: String,
    pub kind: String,
    pub target: String,
    pub field: Option<String>,
    pub enqueued_at: String,
    pub relative_time: String,
}

#[derive(Debug, Serialize)]
pub struct FailedOperationItem {
    pub op_id: String,
    pub kind: String,
    pub target: String,
    pub reason: String,
    pub failed_at: String,
}

/// Find a record by local id, remote id, or a unique prefix of either
pub fn resolve_record(query: &str, records: &[LocalRecord]) -> Result<RecordRef, CliError> {
    let query = normalize_report_identifier(query)?;

    if let Some(record) = records.iter().find(|record| {
        record.local_id.to_string() == query
            || record
                .remote_id
                .as_ref()
                .is_some_and(|id| id.as_str() == query)
    }) {
        return Ok(record.reference());
    }

    let matches = records
        .iter()
        .filter(|record| {
            record.local_id.to_string().starts_with(&query)
                || record
                    .remote_id
                    .as_ref()
                    .is_some_and(|id| id.as_str().starts_with(&query))
        })
        .collect::<Vec<_>>();

    match matches.as_slice() {
        [] => Err(CliError::ReportNotFound(query)),
        [record] => Ok(record.reference()),
        _ => {
            let options = matches
                .iter()
                .take(3)
                .map(|record| short_id(&record.local_id.to_string()))
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousReportId(format!(
                "Report ID prefix '{query}' is ambiguous. Matches: {options}"
            )))
        }
    }
}

pub fn normalize_report_identifier(id: &str) -> Result<String, CliError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(CliError::EmptyReportId);
    }
    Ok(id.to_string())
}

pub fn resolve_description(parts: &[String]) -> Result<String, CliError> {
    let joined = parts.join(" ");
    let collapsed = joined.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return Err(CliError::EmptyDescription);
    }
    Ok(collapsed)
}

pub fn location_value(lat: Option<f64>, lon: Option<f64>) -> Option<Value> {
    match (lat, lon) {
        (Some(lat), Some(lon)) => Some(serde_json::json!({ "lat": lat, "lon": lon })),
        _ => None,
    }
}

pub fn short_id(id: &str) -> String {
    id.chars().take(13).collect()
}

pub fn report_description(record: &LocalRecord) -> &str {
    record
        .payload
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or("")
}

pub fn report_preview(record: &LocalRecord, max_chars: usize) -> String {
    let collapsed = report_description(record)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn sync_label(record: &LocalRecord) -> &'static str {
    if record.synced {
        "synced"
    } else if record.last_sync_error.is_some() {
        "failed"
    } else {
        "pending"
    }
}

pub fn format_report_lines(records: &[LocalRecord], now: DateTime<Utc>) -> Vec<String> {
    records
        .iter()
        .map(|record| {
            let id = short_id(&record.local_id.to_string());
            let status = record.status.as_str();
            let priority = record.priority.as_str();
            let sync = sync_label(record);
            let preview = report_preview(record, 40);
            let relative_time = format_relative_time(record.created_at, now);
            format!(
                "{id:<13}  {status:<12}  {priority:<8}  {sync:<7}  {preview:<40}  {relative_time}"
            )
        })
        .collect()
}

pub fn report_to_list_item(record: &LocalRecord, now: DateTime<Utc>) -> ReportListItem {
    ReportListItem {
        local_id: record.local_id.to_string(),
        remote_id: record.remote_id.as_ref().map(ToString::to_string),
        status: record.status.to_string(),
        priority: record.priority.to_string(),
        synced: record.synced,
        description: report_description(record).to_string(),
        location: record.location.clone(),
        created_at: record.created_at.to_rfc3339(),
        updated_at: record.updated_at.to_rfc3339(),
        relative_time: format_relative_time(record.created_at, now),
        last_sync_error: record.last_sync_error.clone(),
    }
}

fn operation_field(operation: &QueuedOperation) -> Option<String> {
    match &operation.kind {
        OperationKind::CreateRecord { .. } => None,
        OperationKind::UpdateRecordField { field, .. } => Some(field.to_string()),
    }
}

pub fn format_operation_lines(operations: &[QueuedOperation], now: DateTime<Utc>) -> Vec<String> {
    operations
        .iter()
        .map(|operation| {
            let id = short_id(&operation.op_id.to_string());
            let kind = operation.kind.name();
            let field = operation_field(operation).unwrap_or_default();
            let relative_time = format_relative_time(operation.enqueued_at, now);
            format!(
                "{id:<13}  {kind:<19}  {field:<8}  {:<50}  {relative_time}",
                operation.target.to_string()
            )
        })
        .collect()
}

pub fn operation_to_item(operation: &QueuedOperation, now: DateTime<Utc>) -> OperationListItem {
    OperationListItem {
        op_id: operation.op_id.to_string(),
        kind: operation.kind.name().to_string(),
        target: operation.target.to_string(),
        field: operation_field(operation),
        enqueued_at: operation.enqueued_at.to_rfc3339(),
        relative_time: format_relative_time(operation.enqueued_at, now),
    }
}

pub fn format_failed_lines(failures: &[FailedOperation], now: DateTime<Utc>) -> Vec<String> {
    failures
        .iter()
        .map(|failure| {
            let kind = failure.operation.kind.name();
            let relative_time = format_relative_time(failure.failed_at, now);
            format!(
                "{kind} target={} failed={relative_time} reason={}",
                failure.operation.target, failure.reason
            )
        })
        .collect()
}

pub fn failed_to_item(failure: &FailedOperation) -> FailedOperationItem {
    FailedOperationItem {
        op_id: failure.operation.op_id.to_string(),
        kind: failure.operation.kind.name().to_string(),
        target: failure.operation.target.to_string(),
        reason: failure.reason.clone(),
        failed_at: failure.failed_at.to_rfc3339(),
    }
}

pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub fn format_relative_time(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = (now - timestamp).num_seconds().max(0);
    let minute = 60;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}
