use std::io;

use minimind_core::sync::RemoteError;
use minimind_core::TableName;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] minimind_core::Error),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No user selected. Pass --user or set MINIMIND_USER_ID.")]
    MissingUser,
    #[error("No JSON payload provided")]
    EmptyPayload,
    #[error("Invalid JSON payload for {table}: {message}")]
    InvalidPayload { table: TableName, message: String },
    #[error("Record ID cannot be empty")]
    EmptyRecordId,
    #[error("Invalid record ID: {0}")]
    InvalidRecordId(String),
    #[error("{0} have no parent record; --parent only applies to lists and cards")]
    NoParent(TableName),
    #[error("Sync is not configured. Set api_base_url in the settings file or MINIMIND_API_URL.")]
    SyncNotConfigured,
}
