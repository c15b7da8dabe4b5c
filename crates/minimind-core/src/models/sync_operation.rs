//! Mutation queue entry model

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::{
    sql_label, Board, Card, List, Note, OperationId, ParseLabelError, Record, RecordId, Task,
    UserId,
};

/// Record collection targeted by a queued operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableName {
    Boards,
    Lists,
    Cards,
    Tasks,
    Notes,
}

impl TableName {
    pub const ALL: [Self; 5] = [
        Self::Boards,
        Self::Lists,
        Self::Cards,
        Self::Tasks,
        Self::Notes,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Boards => "boards",
            Self::Lists => "lists",
            Self::Cards => "cards",
            Self::Tasks => "tasks",
            Self::Notes => "notes",
        }
    }

    /// Remote collection endpoint, e.g. `/api/boards`
    pub fn collection_path(self) -> String {
        format!("/api/{}", self.as_str())
    }

    /// Remote resource endpoint, e.g. `/api/boards/{id}`
    pub fn resource_path(self, record_id: &RecordId) -> String {
        format!("/api/{}/{record_id}", self.as_str())
    }
}

impl FromStr for TableName {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|table| table.as_str() == s)
            .ok_or_else(|| ParseLabelError::new("table", s))
    }
}

sql_label!(TableName);

/// Kind of mutation being replicated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl FromStr for OperationKind {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(ParseLabelError::new("operation", other)),
        }
    }
}

sql_label!(OperationKind);

/// Lifecycle of a queued operation; `Synced` and `Failed` are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Synced,
    Failed,
}

impl OperationStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }

    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl FromStr for OperationStatus {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            other => Err(ParseLabelError::new("operation status", other)),
        }
    }
}

sql_label!(OperationStatus);

/// Snapshot of a record carried by a queued create or update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "table", content = "record", rename_all = "lowercase")]
pub enum SyncPayload {
    Boards(Board),
    Lists(List),
    Cards(Card),
    Tasks(Task),
    Notes(Note),
}

impl SyncPayload {
    pub const fn table(&self) -> TableName {
        match self {
            Self::Boards(_) => TableName::Boards,
            Self::Lists(_) => TableName::Lists,
            Self::Cards(_) => TableName::Cards,
            Self::Tasks(_) => TableName::Tasks,
            Self::Notes(_) => TableName::Notes,
        }
    }

    pub fn record_id(&self) -> RecordId {
        match self {
            Self::Boards(record) => record.id(),
            Self::Lists(record) => record.id(),
            Self::Cards(record) => record.id(),
            Self::Tasks(record) => record.id(),
            Self::Notes(record) => record.id(),
        }
    }

    /// The bare record as the JSON body sent to the remote API
    pub fn to_body(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Self::Boards(record) => serde_json::to_value(record),
            Self::Lists(record) => serde_json::to_value(record),
            Self::Cards(record) => serde_json::to_value(record),
            Self::Tasks(record) => serde_json::to_value(record),
            Self::Notes(record) => serde_json::to_value(record),
        }
    }
}

/// One pending mutation waiting for remote confirmation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOperation {
    pub id: OperationId,
    pub user_id: UserId,
    pub operation: OperationKind,
    pub table_name: TableName,
    pub record_id: RecordId,
    /// Full record snapshot to replay; `None` for deletes
    pub data: Option<SyncPayload>,
    /// Enqueue time (Unix ms); defines replay order
    pub timestamp: i64,
    pub retry_count: u32,
    pub status: OperationStatus,
}

impl SyncOperation {
    /// A fresh pending entry with no failed attempts
    pub fn new(
        user_id: UserId,
        operation: OperationKind,
        table_name: TableName,
        record_id: RecordId,
        data: Option<SyncPayload>,
        timestamp: i64,
    ) -> Self {
        Self {
            id: OperationId::new(),
            user_id,
            operation,
            table_name,
            record_id,
            data,
            timestamp,
            retry_count: 0,
            status: OperationStatus::Pending,
        }
    }

    /// Check that the payload agrees with the operation kind and target.
    pub fn validate(&self) -> Result<(), String> {
        match (self.operation, &self.data) {
            (OperationKind::Delete, Some(_)) => {
                Err("delete operations must not carry a payload".to_string())
            }
            (OperationKind::Create | OperationKind::Update, None) => Err(format!(
                "{} operations require a record payload",
                self.operation
            )),
            (_, Some(payload)) if payload.table() != self.table_name => Err(format!(
                "payload for {} does not match table {}",
                payload.table(),
                self.table_name
            )),
            (_, Some(payload)) if payload.record_id() != self.record_id => Err(format!(
                "payload record {} does not match record {}",
                payload.record_id(),
                self.record_id
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NoteDraft, RecordMeta};
    use pretty_assertions::assert_eq;

    fn note() -> Note {
        Note::from_draft(
            RecordMeta::new(UserId::new("u1").unwrap(), 5),
            NoteDraft {
                title_encrypted: "enc".to_string(),
                ..NoteDraft::default()
            },
        )
    }

    #[test]
    fn test_table_paths() {
        let id: RecordId = "0190c5a4-8f9e-7c3a-9b1d-2e4f6a8b0c1d".parse().unwrap();
        assert_eq!(TableName::Cards.collection_path(), "/api/cards");
        assert_eq!(
            TableName::Cards.resource_path(&id),
            "/api/cards/0190c5a4-8f9e-7c3a-9b1d-2e4f6a8b0c1d"
        );
        assert_eq!("tasks".parse::<TableName>().unwrap(), TableName::Tasks);
        assert!("users".parse::<TableName>().is_err());
    }

    #[test]
    fn test_payload_is_tagged_by_table() {
        let note = note();
        let payload = SyncPayload::Notes(note.clone());
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["table"], "notes");
        assert_eq!(json["record"]["titleEncrypted"], "enc");

        let parsed: SyncPayload = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, SyncPayload::Notes(note));
    }

    #[test]
    fn test_validate_rejects_mismatched_payloads() {
        let note = note();
        let user = UserId::new("u1").unwrap();

        let delete_with_data = SyncOperation::new(
            user.clone(),
            OperationKind::Delete,
            TableName::Notes,
            note.id(),
            Some(SyncPayload::Notes(note.clone())),
            1,
        );
        assert!(delete_with_data.validate().is_err());

        let wrong_table = SyncOperation::new(
            user.clone(),
            OperationKind::Update,
            TableName::Tasks,
            note.id(),
            Some(SyncPayload::Notes(note.clone())),
            1,
        );
        assert!(wrong_table.validate().is_err());

        let create_without_data = SyncOperation::new(
            user.clone(),
            OperationKind::Create,
            TableName::Notes,
            note.id(),
            None,
            1,
        );
        assert!(create_without_data.validate().is_err());

        let valid = SyncOperation::new(
            user,
            OperationKind::Create,
            TableName::Notes,
            note.id(),
            Some(SyncPayload::Notes(note)),
            1,
        );
        assert_eq!(valid.validate(), Ok(()));
        assert_eq!(valid.retry_count, 0);
        assert_eq!(valid.status, OperationStatus::Pending);
    }
}
