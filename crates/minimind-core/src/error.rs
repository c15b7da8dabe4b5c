//! Error types for minimind-core

use thiserror::Error;

use crate::models::TableName;

/// Result type alias using minimind-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in local store and configuration operations.
///
/// Remote failures never show up here: the sync layer absorbs them into
/// per-operation retry state (see [`crate::sync::RemoteError`]).
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found in the local store
    #[error("{table} record not found: {id}")]
    NotFound { table: TableName, id: String },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A blocking database task panicked or was cancelled
    #[error("Database task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Invalid sync configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn not_found(table: TableName, id: impl ToString) -> Self {
        Self::NotFound {
            table,
            id: id.to_string(),
        }
    }

    /// Whether this error reports a missing record.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
