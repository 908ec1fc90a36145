use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] aera_core::Error),
    #[error(transparent)]
    Auth(#[from] aera_core::auth::AuthError),
    #[error(transparent)]
    Storage(#[from] aera_core::kv::KvError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No report description provided")]
    EmptyDescription,
    #[error("Report ID cannot be empty")]
    EmptyReportId,
    #[error("Report not found for id/prefix: {0}")]
    ReportNotFound(String),
    #[error("{0}")]
    AmbiguousReportId(String),
    #[error("Nothing to update; pass --status, --priority, or --lat/--lon")]
    NothingToUpdate,
    #[error("No owner for the report. Import a session with `aera session import` or pass --owner.")]
    MissingOwner,
    #[error("Configuration error: {0}")]
    Config(String),
}
