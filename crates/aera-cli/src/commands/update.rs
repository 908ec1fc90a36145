use std::path::PathBuf;

use aera_core::models::{Priority, ReportStatus};
use aera_core::RecordField;
use serde_json::Value;

use crate::commands::common::{location_value, resolve_record, CliContext};
use crate::commands::report::describe_receipt;
use crate::error::CliError;

pub struct UpdateArgs {
    pub id: String,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

pub async fn run_update(
    args: UpdateArgs,
    profile: Option<&str>,
    db_path: Option<PathBuf>,
) -> Result<(), CliError> {
    let changes = collect_changes(&args)?;
    let context = CliContext::load(profile, db_path)?;
    let replica = context.open().await?;

    let records = replica.engine.records().await;
    let target = resolve_record(&args.id, &records)?;

    for (field, value) in changes {
        let receipt = replica
            .engine
            .update_record_field(&target, field, value)
            .await?;
        println!("{}", describe_receipt(&format!("Update of {field} on"), &receipt));
    }
    Ok(())
}

/// Field writes in the order they are queued
pub fn collect_changes(args: &UpdateArgs) -> Result<Vec<(RecordField, Value)>, CliError> {
    let mut changes = Vec::new();
    if let Some(status) = args.status.as_deref() {
        let status = status.parse::<ReportStatus>()?;
        changes.push((RecordField::Status, Value::String(status.as_str().to_string())));
    }
    if let Some(priority) = args.priority.as_deref() {
        let priority = priority.parse::<Priority>()?;
        changes.push((
            RecordField::Priority,
            Value::String(priority.as_str().to_string()),
        ));
    }
    if let Some(location) = location_value(args.lat, args.lon) {
        changes.push((RecordField::Location, location));
    }

    if changes.is_empty() {
        return Err(CliError::NothingToUpdate);
    }
    Ok(changes)
}
