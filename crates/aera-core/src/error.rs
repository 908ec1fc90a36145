//! Error types for aera-core

use thiserror::Error;

use crate::auth::AuthError;
use crate::kv::KvError;
use crate::remote::RemoteError;

/// Result type alias using aera-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in aera-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Key-value store error
    #[error(transparent)]
    Kv(#[from] KvError),

    /// Remote store error
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Session error
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
