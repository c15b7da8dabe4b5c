//! Data models for Minimind

/// Error returned when a stored enum label is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct ParseLabelError {
    kind: &'static str,
    value: String,
}

impl ParseLabelError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Stores a label enum as lowercase TEXT using its `as_str` / `FromStr` pair.
macro_rules! sql_label {
    ($ty:ty) => {
        impl rusqlite::types::ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
                Ok(rusqlite::types::ToSqlOutput::from(self.as_str()))
            }
        }

        impl rusqlite::types::FromSql for $ty {
            fn column_result(
                value: rusqlite::types::ValueRef<'_>,
            ) -> rusqlite::types::FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|error| rusqlite::types::FromSqlError::Other(Box::new(error)))
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

pub(crate) use sql_label;

mod board;
mod card;
mod ids;
mod list;
mod note;
mod record;
mod sync_operation;
mod task;

pub use board::{Board, BoardDraft, BoardPatch};
pub use card::{Card, CardDraft, CardPatch};
pub use ids::{OperationId, RecordId, UserId};
pub use list::{List, ListDraft, ListPatch};
pub use note::{Note, NoteDraft, NotePatch};
pub use record::{ChildRecord, Record, RecordMeta, SyncStatus, META_COLUMNS};
pub use sync_operation::{
    OperationKind, OperationStatus, SyncOperation, SyncPayload, TableName,
};
pub use task::{Task, TaskDraft, TaskPatch};
