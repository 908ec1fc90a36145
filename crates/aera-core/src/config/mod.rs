//! Client configuration.
//!
//! `ClientConfig` carries the public Supabase endpoint/key and the tuning
//! knobs of the offline write path. Secret credentials never live here; the
//! user session is kept in the local store.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::remote::SupabaseRemoteConfig;
use crate::replica::{DEFAULT_FAILED_LOG_BOUND, DEFAULT_RECORD_BOUND};
use crate::sync::EngineConfig;

pub const DEFAULT_REPORTS_TABLE: &str = "emergency_reports";
const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PROBE_INTERVAL_SECS: u64 = 15;

pub const ENV_SUPABASE_URL: &str = "AERA_SUPABASE_URL";
pub const ENV_SUPABASE_ANON_KEY: &str = "AERA_SUPABASE_ANON_KEY";
pub const ENV_REPORTS_TABLE: &str = "AERA_REPORTS_TABLE";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    #[serde(default)]
    pub supabase_url: Option<String>,
    #[serde(default)]
    pub supabase_anon_key: Option<String>,
    #[serde(default = "default_reports_table")]
    pub reports_table: String,
    #[serde(default = "default_remote_timeout_secs")]
    pub remote_timeout_secs: u64,
    #[serde(default = "default_record_bound")]
    pub record_bound: usize,
    #[serde(default = "default_failed_log_bound")]
    pub failed_log_bound: usize,
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            supabase_url: None,
            supabase_anon_key: None,
            reports_table: default_reports_table(),
            remote_timeout_secs: DEFAULT_REMOTE_TIMEOUT_SECS,
            record_bound: DEFAULT_RECORD_BOUND,
            failed_log_bound: DEFAULT_FAILED_LOG_BOUND,
            probe_interval_secs: DEFAULT_PROBE_INTERVAL_SECS,
        }
    }
}

impl ClientConfig {
    /// Defaults overlaid with `AERA_*` environment variables
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Replace fields that have a non-empty environment override
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(url) = env_value(ENV_SUPABASE_URL) {
            self.supabase_url = Some(url);
        }
        if let Some(key) = env_value(ENV_SUPABASE_ANON_KEY) {
            self.supabase_anon_key = Some(key);
        }
        if let Some(table) = env_value(ENV_REPORTS_TABLE) {
            self.reports_table = table;
        }
        self
    }

    /// Check the values without touching the network
    pub fn validate(&self) -> Result<()> {
        if let Some(url) = normalize_text_option(self.supabase_url.clone()) {
            if !is_http_url(&url) {
                return Err(Error::InvalidInput(
                    "supabase_url must include http:// or https://".to_string(),
                ));
            }
        }
        if self.reports_table.trim().is_empty() {
            return Err(Error::InvalidInput(
                "reports_table must not be empty".to_string(),
            ));
        }
        if self.remote_timeout_secs == 0 {
            return Err(Error::InvalidInput(
                "remote_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.record_bound == 0 {
            return Err(Error::InvalidInput(
                "record_bound must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether both Supabase values are present
    #[must_use]
    pub fn has_remote(&self) -> bool {
        normalize_text_option(self.supabase_url.clone()).is_some()
            && normalize_text_option(self.supabase_anon_key.clone()).is_some()
    }

    /// Settings for [`crate::remote::SupabaseRemote`]
    pub fn remote_config(&self) -> Result<SupabaseRemoteConfig> {
        self.validate()?;
        let url = normalize_text_option(self.supabase_url.clone()).ok_or_else(|| {
            Error::InvalidInput(format!(
                "Supabase URL is not configured (set {ENV_SUPABASE_URL})"
            ))
        })?;
        let anon_key = normalize_text_option(self.supabase_anon_key.clone()).ok_or_else(|| {
            Error::InvalidInput(format!(
                "Supabase anon key is not configured (set {ENV_SUPABASE_ANON_KEY})"
            ))
        })?;

        Ok(SupabaseRemoteConfig::new(url.trim_end_matches('/'), anon_key)
            .table(self.reports_table.trim())
            .request_timeout(self.remote_timeout()))
    }

    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            remote_timeout: self.remote_timeout(),
            record_bound: self.record_bound,
            failed_log_bound: self.failed_log_bound,
        }
    }

    #[must_use]
    pub const fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }

    #[must_use]
    pub const fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}

/// Trim a value, mapping blank strings to `None`
#[must_use]
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    value.and_then(|raw| {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[must_use]
pub fn is_http_url(value: &str) -> bool {
    value.starts_with("https://") || value.starts_with("http://")
}

fn env_value(name: &str) -> Option<String> {
    normalize_text_option(std::env::var(name).ok())
}

fn default_reports_table() -> String {
    DEFAULT_REPORTS_TABLE.to_string()
}

const fn default_remote_timeout_secs() -> u64 {
    DEFAULT_REMOTE_TIMEOUT_SECS
}

const fn default_record_bound() -> usize {
    DEFAULT_RECORD_BOUND
}

const fn default_failed_log_bound() -> usize {
    DEFAULT_FAILED_LOG_BOUND
}

const fn default_probe_interval_secs() -> u64 {
    DEFAULT_PROBE_INTERVAL_SECS
}
