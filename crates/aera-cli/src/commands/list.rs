use std::path::PathBuf;

use chrono::Utc;

use crate::commands::common::{
    format_report_lines, report_to_list_item, CliContext, ReportListItem,
};
use crate::error::CliError;

pub async fn run_list(
    as_json: bool,
    profile: Option<&str>,
    db_path: Option<PathBuf>,
) -> Result<(), CliError> {
    let context = CliContext::load(profile, db_path)?;
    let replica = context.open().await?;
    let records = replica.engine.records().await;
    let now = Utc::now();

    if as_json {
        let json_items = records
            .iter()
            .map(|record| report_to_list_item(record, now))
            .collect::<Vec<ReportListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if records.is_empty() {
        println!("No reports in the local replica.");
    } else {
        for line in format_report_lines(&records, now) {
            println!("{line}");
        }
    }

    Ok(())
}
