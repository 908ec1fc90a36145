use std::path::PathBuf;

use aera_core::auth::{AuthSession, AuthUser, SessionPersistence};
use aera_core::config::normalize_text_option;
use chrono::{DateTime, Utc};

use crate::commands::common::{format_timestamp, CliContext};
use crate::error::CliError;

pub struct SessionImportArgs {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
    pub user_id: String,
    pub email: Option<String>,
}

pub async fn run_session_import(
    args: SessionImportArgs,
    profile: Option<&str>,
    db_path: Option<PathBuf>,
) -> Result<(), CliError> {
    let session = session_from_args(args)?;
    let context = CliContext::load(profile, db_path)?;
    let sessions = context.open_sessions()?;
    sessions.save_session(&session).await?;

    println!(
        "Stored session for {} in profile '{}'",
        session.user.email.as_deref().unwrap_or(&session.user.id),
        context.profile_name
    );
    Ok(())
}

pub async fn run_session_status(
    profile: Option<&str>,
    db_path: Option<PathBuf>,
) -> Result<(), CliError> {
    let context = CliContext::load(profile, db_path)?;
    let sessions = context.open_sessions()?;

    println!("Profile: {}", context.profile_name);
    match sessions.load_session().await? {
        Some(session) => {
            for line in format_session_lines(&session) {
                println!("{line}");
            }
        }
        None => println!("Session: none (run `aera session import`)"),
    }
    Ok(())
}

pub async fn run_session_clear(
    profile: Option<&str>,
    db_path: Option<PathBuf>,
) -> Result<(), CliError> {
    let context = CliContext::load(profile, db_path)?;
    context.open_sessions()?.clear_session().await?;
    println!("Cleared session for profile '{}'", context.profile_name);
    Ok(())
}

pub fn session_from_args(args: SessionImportArgs) -> Result<AuthSession, CliError> {
    let required = |value: String, name: &str| {
        normalize_text_option(Some(value))
            .ok_or_else(|| CliError::Config(format!("{name} cannot be empty")))
    };

    Ok(AuthSession {
        access_token: required(args.access_token, "--access-token")?,
        refresh_token: required(args.refresh_token, "--refresh-token")?,
        expires_at: args.expires_at.max(0),
        user: AuthUser {
            id: required(args.user_id, "--user-id")?,
            email: normalize_text_option(args.email),
        },
    })
}

pub fn format_session_lines(session: &AuthSession) -> Vec<String> {
    let mut lines = vec![format!("User: {}", session.user.id)];
    if let Some(email) = session.user.email.as_deref() {
        lines.push(format!("Email: {email}"));
    }
    let expiry = DateTime::<Utc>::from_timestamp(session.expires_at, 0)
        .map_or_else(|| session.expires_at.to_string(), format_timestamp);
    let state = if session.is_expired() {
        "expired; refreshed on next sync"
    } else {
        "valid"
    };
    lines.push(format!("Expires: {expiry} ({state})"));
    lines
}
