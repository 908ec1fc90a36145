use std::path::PathBuf;

use aera_core::kv::DegradedState;
use aera_core::SyncIndicator;

use crate::commands::common::{format_timestamp, CliContext};
use crate::error::CliError;

pub async fn run_status(
    clear_degraded: bool,
    profile: Option<&str>,
    db_path: Option<PathBuf>,
) -> Result<(), CliError> {
    let context = CliContext::load(profile, db_path)?;
    let replica = context.open().await?;

    if clear_degraded {
        replica.engine.clear_degraded().await?;
        println!("Cleared degraded storage marker.");
    }

    let indicator = replica.engine.indicator().await;
    let degraded = replica.engine.degraded_state();

    println!("Profile: {}", context.profile_name);
    println!("Database: {}", context.db_path.display());
    println!(
        "Remote: {}",
        replica
            .engine
            .remote()
            .unavailable_reason()
            .unwrap_or("supabase")
    );
    println!("Sync: {}", describe_indicator(indicator));
    println!("Storage: {}", describe_degraded(&degraded));
    Ok(())
}

pub fn describe_indicator(indicator: SyncIndicator) -> String {
    let detail = match indicator {
        SyncIndicator::Synced => return indicator.label().to_string(),
        SyncIndicator::PendingSync { pending } => format!("{pending} operation(s) queued"),
        SyncIndicator::Failed { failed, pending } => {
            format!("{failed} failed, {pending} queued; see `aera queue failed`")
        }
    };
    format!("{} ({detail})", indicator.label())
}

pub fn describe_degraded(state: &DegradedState) -> String {
    if !state.degraded {
        return "ok".to_string();
    }
    let reason = state.reason.as_deref().unwrap_or("unknown reason");
    state.timestamp.map_or_else(
        || format!("degraded ({reason})"),
        |timestamp| format!("degraded since {} ({reason})", format_timestamp(timestamp)),
    )
}
