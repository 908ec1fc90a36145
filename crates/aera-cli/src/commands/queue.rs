use std::path::PathBuf;

use chrono::Utc;

use crate::commands::common::{
    failed_to_item, format_failed_lines, format_operation_lines, operation_to_item, CliContext,
    FailedOperationItem, OperationListItem,
};
use crate::error::CliError;

pub async fn run_queue(
    as_json: bool,
    profile: Option<&str>,
    db_path: Option<PathBuf>,
) -> Result<(), CliError> {
    let context = CliContext::load(profile, db_path)?;
    let replica = context.open().await?;
    let operations = replica.engine.pending_operations().await;
    let now = Utc::now();

    if as_json {
        let json_items = operations
            .iter()
            .map(|operation| operation_to_item(operation, now))
            .collect::<Vec<OperationListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if operations.is_empty() {
        println!("Operation queue is empty.");
    } else {
        for line in format_operation_lines(&operations, now) {
            println!("{line}");
        }
    }

    Ok(())
}

pub async fn run_queue_failed(
    as_json: bool,
    profile: Option<&str>,
    db_path: Option<PathBuf>,
) -> Result<(), CliError> {
    let context = CliContext::load(profile, db_path)?;
    let replica = context.open().await?;
    let failures = replica.engine.failed_operations().await;

    if as_json {
        let json_items = failures
            .iter()
            .map(failed_to_item)
            .collect::<Vec<FailedOperationItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if failures.is_empty() {
        println!("No failed operations.");
    } else {
        for line in format_failed_lines(&failures, Utc::now()) {
            println!("{line}");
        }
    }

    Ok(())
}

pub async fn run_queue_clear_failed(
    profile: Option<&str>,
    db_path: Option<PathBuf>,
) -> Result<(), CliError> {
    let context = CliContext::load(profile, db_path)?;
    let replica = context.open().await?;
    let cleared = replica.engine.clear_failed().await?;
    println!("Cleared {cleared} failed operation(s).");
    Ok(())
}
