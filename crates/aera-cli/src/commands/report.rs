use std::path::PathBuf;

use aera_core::models::Priority;
use aera_core::{ReportDraft, WriteReceipt};

use crate::commands::common::{location_value, resolve_description, CliContext};
use crate::error::CliError;

pub struct ReportArgs {
    pub description: Vec<String>,
    pub priority: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub owner: Option<String>,
}

pub async fn run_report(
    args: ReportArgs,
    profile: Option<&str>,
    db_path: Option<PathBuf>,
) -> Result<(), CliError> {
    let draft = build_draft(&args)?;
    let context = CliContext::load(profile, db_path)?;
    let replica = context.open().await?;
    let owner_id = replica.resolve_owner(args.owner).await?;

    let receipt = replica.engine.create_record(&owner_id, draft).await?;
    println!("{}", describe_receipt("Report", &receipt));
    Ok(())
}

pub fn build_draft(args: &ReportArgs) -> Result<ReportDraft, CliError> {
    let mut draft = ReportDraft::with_description(resolve_description(&args.description)?);
    if let Some(priority) = args.priority.as_deref() {
        draft = draft.priority(priority.parse::<Priority>()?);
    }
    if let Some(location) = location_value(args.lat, args.lon) {
        draft = draft.location(location);
    }
    Ok(draft)
}

pub fn describe_receipt(subject: &str, receipt: &WriteReceipt) -> String {
    match receipt {
        WriteReceipt::Synced {
            local_id,
            remote_id,
        } => format!("{subject} {local_id} synced (remote id {remote_id})"),
        WriteReceipt::Queued {
            local_id,
            reason: Some(reason),
        } => format!("{subject} {local_id} saved offline; queued for sync ({reason})"),
        WriteReceipt::Queued {
            local_id,
            reason: None,
        } => format!("{subject} {local_id} saved; queued for sync"),
        WriteReceipt::Rejected { local_id, reason } => {
            format!("{subject} {local_id} saved locally but rejected by the server: {reason}")
        }
    }
}
