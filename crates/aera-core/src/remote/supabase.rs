//! Supabase (PostgREST) implementation of [`RemoteStore`]

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{CreatedRecord, RemoteError, RemoteRecord, RemoteStore};
use crate::auth::{parse_api_error, AuthError, SessionManager, SessionPersistence};
use crate::models::{LocalId, NewRecord, Priority, RecordField, RemoteId, ReportStatus};

const DEFAULT_TABLE: &str = "emergency_reports";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupabaseRemoteConfig {
    pub url: String,
    pub anon_key: String,
    pub table: String,
    pub request_timeout: Duration,
}

impl SupabaseRemoteConfig {
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            anon_key: anon_key.into(),
            table: DEFAULT_TABLE.to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Reports table accessed through the PostgREST API, authorized with the
/// user's session.
pub struct SupabaseRemote<S> {
    rest_url: String,
    anon_key: String,
    table: String,
    client: Client,
    sessions: SessionManager<S>,
}

impl<S: SessionPersistence> SupabaseRemote<S> {
    pub fn new(config: SupabaseRemoteConfig, session_store: S) -> crate::Result<Self> {
        let sessions = SessionManager::new(&config.url, config.anon_key.clone(), session_store)?;
        let base = config.url.trim().trim_end_matches('/');
        let table = config.table.trim();
        if table.is_empty() {
            return Err(crate::Error::InvalidInput(
                "reports table must not be empty".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|error| crate::Error::InvalidInput(error.to_string()))?;

        Ok(Self {
            rest_url: format!("{base}/rest/v1"),
            anon_key: config.anon_key.trim().to_string(),
            table: table.to_string(),
            client,
            sessions,
        })
    }

    pub const fn sessions(&self) -> &SessionManager<S> {
        &self.sessions
    }

    /// Whether the backend answers at all. Any HTTP response counts.
    pub async fn probe(&self) -> bool {
        match self
            .client
            .head(format!("{}/", self.rest_url))
            .header("apikey", &self.anon_key)
            .send()
            .await
        {
            Ok(_) => true,
            Err(error) => {
                tracing::debug!("Reachability probe failed: {}", error);
                false
            }
        }
    }

    fn table_url(&self) -> String {
        format!("{}/{}", self.rest_url, self.table)
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, RemoteError> {
        let session = self.sessions.session().await.map_err(auth_to_remote)?;
        Ok(request
            .header("apikey", &self.anon_key)
            .bearer_auth(session.access_token))
    }
}

impl<S: SessionPersistence> RemoteStore for SupabaseRemote<S> {
    async fn create_record(
        &self,
        owner_id: &str,
        record: &NewRecord,
        client_ref: &LocalId,
    ) -> Result<CreatedRecord, RemoteError> {
        let body = json!({
            "owner_id": owner_id,
            "client_ref": client_ref.as_str(),
            "payload": record.payload,
            "location": record.location,
            "status": record.status,
            "priority": record.priority,
            "created_at": record.created_at,
        });

        let request = self
            .client
            .post(self.table_url())
            .query(&[("on_conflict", "client_ref")])
            .header("Prefer", "return=representation,resolution=merge-duplicates")
            .json(&body);
        let response = send(self.authorized(request).await?).await?;

        let rows: Vec<ReportRow> = response
            .json()
            .await
            .map_err(|error| RemoteError::Validation(format!("unreadable create response: {error}")))?;
        let row = rows.into_iter().next().ok_or_else(|| {
            RemoteError::Validation("create returned no representation".to_string())
        })?;

        tracing::debug!("Created remote record {} for {}", row.id, client_ref);
        Ok(CreatedRecord {
            id: row.id.into_remote_id(),
            created_at: row.created_at,
            status: row.status,
            priority: row.priority,
        })
    }

    async fn update_record_field(
        &self,
        remote_id: &RemoteId,
        field: RecordField,
        value: &Value,
    ) -> Result<(), RemoteError> {
        let mut body = serde_json::Map::new();
        body.insert(field.column().to_string(), value.clone());

        let request = self
            .client
            .patch(self.table_url())
            .query(&[("id", format!("eq.{remote_id}"))])
            .header("Prefer", "return=minimal")
            .json(&body);
        send(self.authorized(request).await?).await?;
        Ok(())
    }

    async fn fetch_active_record(
        &self,
        owner_id: &str,
    ) -> Result<Option<RemoteRecord>, RemoteError> {
        let request = self.client.get(self.table_url()).query(&[
            ("select", "*".to_string()),
            ("owner_id", format!("eq.{owner_id}")),
            ("status", "in.(active,acknowledged)".to_string()),
            ("order", "created_at.desc".to_string()),
            ("limit", "1".to_string()),
        ]);
        let response = send(self.authorized(request).await?).await?;

        let rows: Vec<ReportRow> = response
            .json()
            .await
            .map_err(|error| RemoteError::Validation(format!("unreadable fetch response: {error}")))?;
        Ok(rows.into_iter().next().map(ReportRow::into_remote_record))
    }

    async fn refresh_auth(&self) -> Result<(), RemoteError> {
        self.sessions
            .refresh()
            .await
            .map(|_| ())
            .map_err(auth_to_remote)
    }
}

async fn send(request: RequestBuilder) -> Result<Response, RemoteError> {
    let response = request.send().await.map_err(transport_error)?;
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, &parse_api_error(status, &body)))
}

/// Map an HTTP failure to the sync taxonomy
fn classify_status(status: StatusCode, message: &str) -> RemoteError {
    match status.as_u16() {
        401 | 403 => RemoteError::Auth(message.to_string()),
        400 | 404 | 409 | 422 => RemoteError::Validation(message.to_string()),
        429 => RemoteError::Network(message.to_string()),
        code if code >= 500 => RemoteError::Network(message.to_string()),
        _ => RemoteError::Validation(message.to_string()),
    }
}

fn transport_error(error: reqwest::Error) -> RemoteError {
    if error.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Network(error.to_string())
    }
}

fn auth_to_remote(error: AuthError) -> RemoteError {
    match error {
        AuthError::Http(error) => transport_error(error),
        other => RemoteError::Auth(other.to_string()),
    }
}

/// Primary keys may be integers or uuids depending on the table
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RowId {
    Number(i64),
    Text(String),
}

impl RowId {
    fn into_remote_id(self) -> RemoteId {
        match self {
            Self::Number(id) => RemoteId::new(id.to_string()),
            Self::Text(id) => RemoteId::new(id),
        }
    }
}

impl std::fmt::Display for RowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(id) => write!(f, "{id}"),
            Self::Text(id) => f.write_str(id),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReportRow {
    id: RowId,
    #[serde(default)]
    owner_id: String,
    #[serde(default)]
    client_ref: Option<String>,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    location: Option<Value>,
    #[serde(default)]
    status: ReportStatus,
    #[serde(default)]
    priority: Priority,
    created_at: DateTime<Utc>,
}

impl ReportRow {
    fn into_remote_record(self) -> RemoteRecord {
        RemoteRecord {
            id: self.id.into_remote_id(),
            owner_id: self.owner_id,
            client_ref: self.client_ref.and_then(|value| value.parse().ok()),
            payload: self.payload,
            location: self.location,
            status: self.status,
            priority: self.priority,
            created_at: self.created_at,
        }
    }
}
