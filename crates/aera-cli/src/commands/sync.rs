use std::path::PathBuf;

use aera_core::{DrainOutcome, DrainReport, StartReconciliation};
use chrono::Utc;

use crate::commands::common::{format_failed_lines, CliContext};
use crate::error::CliError;

pub async fn run_sync(profile: Option<&str>, db_path: Option<PathBuf>) -> Result<(), CliError> {
    let context = CliContext::load(profile, db_path)?;
    let replica = context.open().await?;

    if let Some(reason) = replica.engine.remote().unavailable_reason() {
        println!("Not syncing profile '{}': {reason}.", context.profile_name);
        return Ok(());
    }

    if let Some(session) = replica.session().await? {
        let reconciliation = replica.engine.reconcile_on_start(&session.user.id).await?;
        if let Some(line) = describe_reconciliation(&reconciliation) {
            println!("{line}");
        }
    }

    match replica.engine.drain().await? {
        DrainOutcome::Completed(report) => {
            for line in format_drain_report(&report) {
                println!("{line}");
            }
        }
        DrainOutcome::Skipped => println!("A sync pass is already running."),
    }
    Ok(())
}

pub fn describe_reconciliation(outcome: &StartReconciliation) -> Option<String> {
    match outcome {
        StartReconciliation::NoActiveRecord | StartReconciliation::AlreadyKnown { .. } => None,
        StartReconciliation::Adopted {
            local_id,
            remote_id,
        } => Some(format!(
            "Recovered confirmation for report {local_id} (remote id {remote_id})"
        )),
        StartReconciliation::Refreshed { remote_id } => {
            Some(format!("Refreshed report {remote_id} from the server"))
        }
        StartReconciliation::Cached {
            local_id,
            remote_id,
        } => Some(format!(
            "Cached open report {remote_id} from the server as {local_id}"
        )),
        StartReconciliation::Unavailable { reason } => {
            Some(format!("Could not check the server for open reports: {reason}"))
        }
    }
}

pub fn format_drain_report(report: &DrainReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Sync complete: {} applied, {} still queued, {} failed",
        report.applied,
        report.deferred,
        report.failed()
    )];
    lines.extend(format_failed_lines(&report.failures, Utc::now()));
    lines
}
