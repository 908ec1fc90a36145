//! Persistent CLI profile configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::{env, fmt, fs, io};

use aera_core::config::{normalize_text_option, ClientConfig};
use serde::{Deserialize, Serialize};

use crate::error::CliError;

const CONFIG_FILE_NAME: &str = "cli-config.json";
const CONFIG_VERSION: u32 = 1;
pub const ENV_PROFILE: &str = "AERA_PROFILE";
pub const DEFAULT_PROFILE: &str = "default";

/// Contents of `<config dir>/aera/cli-config.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliProfilesConfig {
    #[serde(default = "config_version")]
    pub version: u32,
    #[serde(default)]
    pub active_profile: Option<String>,
    #[serde(default)]
    pub profiles: BTreeMap<String, CliProfile>,
}

/// Per-profile Supabase settings. Unset values fall back to `AERA_*`
/// variables and then to the built-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supabase_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supabase_anon_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reports_table: Option<String>,
}

const fn config_version() -> u32 {
    CONFIG_VERSION
}

impl Default for CliProfilesConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            active_profile: None,
            profiles: BTreeMap::new(),
        }
    }
}

pub fn default_config_path() -> Result<PathBuf, CliError> {
    let dir = dirs::config_dir()
        .ok_or_else(|| CliError::Config("Failed to resolve CLI config directory".to_string()))?;
    Ok(dir.join("aera").join(CONFIG_FILE_NAME))
}

pub fn normalize_profile_name(value: Option<&str>) -> Option<String> {
    normalize_text_option(value.map(str::to_string))
}

fn file_error(action: &str, path: &Path, error: &dyn fmt::Display) -> CliError {
    CliError::Config(format!(
        "Failed to {action} config at {}: {error}",
        path.display()
    ))
}

impl CliProfilesConfig {
    pub fn load() -> Result<Self, CliError> {
        Self::load_from_path(&default_config_path()?)
    }

    /// A missing file is an empty configuration
    pub fn load_from_path(path: &Path) -> Result<Self, CliError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(error) => return Err(file_error("read", path, &error)),
        };
        let mut config: Self =
            serde_json::from_str(&raw).map_err(|error| file_error("parse", path, &error))?;
        config.normalize();
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf, CliError> {
        let path = default_config_path()?;
        self.save_to_path(&path)?;
        Ok(path)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), CliError> {
        let mut normalized = self.clone();
        normalized.normalize();
        let serialized = serde_json::to_vec_pretty(&normalized)?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .map_err(|error| file_error("create directory for", path, &error))?;
        }
        fs::write(path, serialized).map_err(|error| file_error("write", path, &error))
    }

    /// `--profile`, then `AERA_PROFILE`, then the active profile, then `default`
    pub fn resolve_profile_name(&self, explicit: Option<&str>) -> String {
        normalize_profile_name(explicit)
            .or_else(|| normalize_profile_name(env::var(ENV_PROFILE).ok().as_deref()))
            .or_else(|| self.active_profile.clone())
            .unwrap_or_else(|| DEFAULT_PROFILE.to_string())
    }

    pub fn profile(&self, name: &str) -> Option<&CliProfile> {
        self.profiles.get(name)
    }

    pub fn profile_entry(&mut self, name: &str) -> &mut CliProfile {
        self.profiles.entry(name.to_string()).or_default()
    }

    fn normalize(&mut self) {
        self.active_profile = normalize_profile_name(self.active_profile.as_deref());
        self.profiles.values_mut().for_each(CliProfile::normalize);
    }
}

impl CliProfile {
    /// Client settings for this profile; `AERA_*` variables win over the file
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            ..ClientConfig::default()
        };
        if let Some(table) = normalize_text_option(self.reports_table.clone()) {
            config.reports_table = table;
        }
        config.with_env_overrides()
    }

    fn normalize(&mut self) {
        self.supabase_url = normalize_text_option(self.supabase_url.take());
        self.supabase_anon_key = normalize_text_option(self.supabase_anon_key.take());
        self.reports_table = normalize_text_option(self.reports_table.take());
    }
}
