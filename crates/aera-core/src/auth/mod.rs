//! Session handling for the hosted backend.
//!
//! Sign-in flows live outside this crate; a session is imported once and then
//! kept fresh here so the sync engine can recover from an expired access
//! token without user interaction.

use std::fmt;

use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::kv::{keys, KvError, PersistentKv};

/// Seconds before expiry at which a token is treated as expired
const EXPIRY_SKEW_SECONDS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds
    pub expires_at: i64,
    pub user: AuthUser,
}

impl AuthSession {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now().timestamp() + EXPIRY_SKEW_SECONDS
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AuthSession")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No session is stored; import one first")]
    NoSession,
    #[error("Invalid auth configuration: {0}")]
    InvalidConfiguration(&'static str),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to parse JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Auth API error: {0}")]
    Api(String),
    #[error("Session storage error: {0}")]
    Storage(#[from] KvError),
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Where the current session is kept
#[allow(async_fn_in_trait)]
pub trait SessionPersistence {
    async fn load_session(&self) -> AuthResult<Option<AuthSession>>;
    async fn save_session(&self, session: &AuthSession) -> AuthResult<()>;
    async fn clear_session(&self) -> AuthResult<()>;
}

/// Session kept next to the replica in the local key-value store
#[derive(Clone)]
pub struct KvSessionStore<K> {
    kv: K,
}

impl<K: PersistentKv> KvSessionStore<K> {
    pub const fn new(kv: K) -> Self {
        Self { kv }
    }
}

impl<K: PersistentKv> SessionPersistence for KvSessionStore<K> {
    async fn load_session(&self) -> AuthResult<Option<AuthSession>> {
        match self.kv.get(keys::AUTH_SESSION).await? {
            Some(bytes) if bytes.is_empty() => Ok(None),
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn save_session(&self, session: &AuthSession) -> AuthResult<()> {
        let bytes = serde_json::to_vec(session)?;
        self.kv.set(keys::AUTH_SESSION, bytes).await?;
        Ok(())
    }

    async fn clear_session(&self) -> AuthResult<()> {
        self.kv.set(keys::AUTH_SESSION, Vec::new()).await?;
        Ok(())
    }
}

/// Keeps a valid access token available, refreshing through the Supabase
/// auth API when it expires.
pub struct SessionManager<S> {
    auth_url: String,
    anon_key: String,
    client: Client,
    store: S,
    current: Mutex<Option<AuthSession>>,
}

impl<S: SessionPersistence> SessionManager<S> {
    pub fn new(url: impl AsRef<str>, anon_key: impl Into<String>, store: S) -> AuthResult<Self> {
        let auth_url = normalize_auth_url(url.as_ref())?;
        let anon_key = anon_key.into().trim().to_string();
        if anon_key.is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "Supabase anon key must not be empty",
            ));
        }

        Ok(Self {
            auth_url,
            anon_key,
            client: Client::builder().build()?,
            store,
            current: Mutex::new(None),
        })
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Current session, loading it from storage on first use and refreshing
    /// it when expired
    pub async fn session(&self) -> AuthResult<AuthSession> {
        let mut current = self.current.lock().await;
        if current.is_none() {
            *current = self.store.load_session().await?;
        }
        let session = current.clone().ok_or(AuthError::NoSession)?;
        if !session.is_expired() {
            return Ok(session);
        }

        tracing::debug!("Access token expired; refreshing session");
        let refreshed = self.exchange_refresh_token(&session.refresh_token).await?;
        self.store.save_session(&refreshed).await?;
        *current = Some(refreshed.clone());
        Ok(refreshed)
    }

    /// Force a refresh, e.g. after the backend rejected the access token
    pub async fn refresh(&self) -> AuthResult<AuthSession> {
        let mut current = self.current.lock().await;
        let stored = match current.clone() {
            Some(session) => Some(session),
            None => self.store.load_session().await?,
        };
        let session = stored.ok_or(AuthError::NoSession)?;

        let refreshed = self.exchange_refresh_token(&session.refresh_token).await?;
        self.store.save_session(&refreshed).await?;
        *current = Some(refreshed.clone());
        tracing::info!("Session refreshed for user {}", refreshed.user.id);
        Ok(refreshed)
    }

    async fn exchange_refresh_token(&self, refresh_token: &str) -> AuthResult<AuthSession> {
        if refresh_token.trim().is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "Refresh token must not be empty",
            ));
        }

        let response = self
            .client
            .post(format!("{}/token", self.auth_url))
            .query(&[("grant_type", "refresh_token")])
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Api(parse_api_error(status, &body)));
        }

        let payload = response.json::<TokenResponse>().await?;
        payload.into_session()
    }
}

pub fn normalize_auth_url(url: &str) -> AuthResult<String> {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(AuthError::InvalidConfiguration(
            "Supabase URL must not be empty",
        ));
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(AuthError::InvalidConfiguration(
            "Supabase URL must include http:// or https://",
        ));
    }
    if trimmed.ends_with("/auth/v1") {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("{trimmed}/auth/v1"))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
    expires_in: Option<i64>,
    user: Option<TokenUser>,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: String,
    email: Option<String>,
}

impl TokenResponse {
    fn into_session(self) -> AuthResult<AuthSession> {
        let expires_at = self.expires_at.or_else(|| {
            self.expires_in
                .map(|expires_in| Utc::now().timestamp().saturating_add(expires_in))
        });

        match (self.access_token, self.refresh_token, expires_at, self.user) {
            (Some(access_token), Some(refresh_token), Some(expires_at), Some(user)) => {
                Ok(AuthSession {
                    access_token,
                    refresh_token,
                    expires_at,
                    user: AuthUser {
                        id: user.id,
                        email: user.email,
                    },
                })
            }
            _ => Err(AuthError::Api(
                "Token response did not include enough session fields".to_string(),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    error_description: Option<String>,
    message: Option<String>,
    msg: Option<String>,
}

pub(crate) fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = payload
            .message
            .or(payload.msg)
            .or(payload.error_description)
            .or(payload.error)
        {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed: String = body.trim().chars().take(180).collect();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}
