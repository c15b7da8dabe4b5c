//! Shared record metadata and the `Record` trait

use rusqlite::types::Value;
use rusqlite::Row;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;

use super::{sql_label, ParseLabelError, RecordId, SyncPayload, TableName, UserId};

/// Columns every record table carries, in this order, before its own columns
pub const META_COLUMNS: [&str; 6] = [
    "id",
    "user_id",
    "sync_status",
    "last_sync_at",
    "created_at",
    "updated_at",
];

/// Per-record confirmation state shown by the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Confirmed by the remote
    Synced,
    /// At least one queued operation has not settled yet
    #[default]
    Pending,
    /// The remote rejected the last change as conflicting
    Conflict,
    /// The last change was abandoned after exhausting retries
    Error,
}

impl SyncStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::Pending => "pending",
            Self::Conflict => "conflict",
            Self::Error => "error",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synced" => Ok(Self::Synced),
            "pending" => Ok(Self::Pending),
            "conflict" => Ok(Self::Conflict),
            "error" => Ok(Self::Error),
            other => Err(ParseLabelError::new("sync status", other)),
        }
    }
}

sql_label!(SyncStatus);

/// Bookkeeping fields shared by boards, lists, cards, tasks and notes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMeta {
    pub id: RecordId,
    pub user_id: UserId,
    pub sync_status: SyncStatus,
    /// Last confirmation from the remote (Unix ms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<i64>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last local mutation (Unix ms)
    pub updated_at: i64,
}

impl RecordMeta {
    /// Metadata for a record created locally at `now`
    pub fn new(user_id: UserId, now: i64) -> Self {
        Self {
            id: RecordId::new(),
            user_id,
            sync_status: SyncStatus::Pending,
            last_sync_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Read the metadata columns (see [`META_COLUMNS`]) from the start of a row
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let user_id: String = row.get(1)?;
        Ok(Self {
            id: row.get(0)?,
            user_id: UserId::new(user_id).ok_or_else(|| {
                rusqlite::Error::InvalidColumnType(
                    1,
                    "user_id".to_string(),
                    rusqlite::types::Type::Text,
                )
            })?,
            sync_status: row.get(2)?,
            last_sync_at: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    /// Metadata column values in [`META_COLUMNS`] order
    pub fn values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.id.as_str()),
            Value::Text(self.user_id.as_str().to_string()),
            Value::Text(self.sync_status.as_str().to_string()),
            Value::from(self.last_sync_at),
            Value::Integer(self.created_at),
            Value::Integer(self.updated_at),
        ]
    }
}

/// A domain entity held in the local store and replicated to the remote.
///
/// Implementors describe their table, the SQL mapping of their own columns
/// (metadata columns are handled by the store), how they are built from a
/// draft and how a typed patch merges into them.
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Fields supplied by the caller when creating a record
    type Draft;
    /// Partial update; absent fields keep their current value
    type Patch: Send + 'static;

    const TABLE: TableName;
    /// Table-specific columns, following [`META_COLUMNS`]
    const COLUMNS: &'static [&'static str];

    fn from_draft(meta: RecordMeta, draft: Self::Draft) -> Self;

    fn apply_patch(&mut self, patch: Self::Patch);

    fn meta(&self) -> &RecordMeta;

    fn meta_mut(&mut self) -> &mut RecordMeta;

    /// Values for [`Record::COLUMNS`], in order
    fn column_values(&self) -> Vec<Value>;

    /// Build the record from a row whose table columns start at `offset`
    fn from_row(meta: RecordMeta, row: &Row<'_>, offset: usize) -> rusqlite::Result<Self>;

    fn into_payload(self) -> SyncPayload;

    fn id(&self) -> RecordId {
        self.meta().id
    }
}

/// A record owned by another record rather than directly by the user
pub trait ChildRecord: Record {
    /// Foreign-key column pointing at the parent record
    const PARENT_COLUMN: &'static str;
}

/// Deserialize a field that distinguishes "absent" from explicit `null`.
///
/// Use with `#[serde(default, deserialize_with = "double_option")]` so a
/// missing key stays `None` while `null` becomes `Some(None)`.
pub(crate) fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_status_labels_round_trip() {
        for status in [
            SyncStatus::Synced,
            SyncStatus::Pending,
            SyncStatus::Conflict,
            SyncStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<SyncStatus>().unwrap(), status);
        }
        assert!("unknown".parse::<SyncStatus>().is_err());
    }

    #[test]
    fn test_new_meta_is_pending() {
        let meta = RecordMeta::new(UserId::new("u1").unwrap(), 42);
        assert_eq!(meta.sync_status, SyncStatus::Pending);
        assert_eq!(meta.created_at, 42);
        assert_eq!(meta.updated_at, 42);
        assert!(meta.last_sync_at.is_none());
    }
}
