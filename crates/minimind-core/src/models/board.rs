//! Board model

use rusqlite::types::Value;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use super::record::double_option;
use super::{Record, RecordMeta, SyncPayload, TableName};

/// A kanban board owned by a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub name_encrypted: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_encrypted: Option<String>,
    pub position: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BoardDraft {
    pub name_encrypted: String,
    #[serde(default)]
    pub description_encrypted: Option<String>,
    #[serde(default)]
    pub position: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BoardPatch {
    #[serde(default)]
    pub name_encrypted: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description_encrypted: Option<Option<String>>,
    #[serde(default)]
    pub position: Option<i64>,
}

impl Record for Board {
    type Draft = BoardDraft;
    type Patch = BoardPatch;

    const TABLE: TableName = TableName::Boards;
    const COLUMNS: &'static [&'static str] = &["name_encrypted", "description_encrypted", "position"];

    fn from_draft(meta: RecordMeta, draft: BoardDraft) -> Self {
        Self {
            meta,
            name_encrypted: draft.name_encrypted,
            description_encrypted: draft.description_encrypted,
            position: draft.position,
        }
    }

    fn apply_patch(&mut self, patch: BoardPatch) {
        if let Some(name) = patch.name_encrypted {
            self.name_encrypted = name;
        }
        if let Some(description) = patch.description_encrypted {
            self.description_encrypted = description;
        }
        if let Some(position) = patch.position {
            self.position = position;
        }
    }

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.name_encrypted.clone()),
            Value::from(self.description_encrypted.clone()),
            Value::Integer(self.position),
        ]
    }

    fn from_row(meta: RecordMeta, row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            meta,
            name_encrypted: row.get(offset)?,
            description_encrypted: row.get(offset + 1)?,
            position: row.get(offset + 2)?,
        })
    }

    fn into_payload(self) -> SyncPayload {
        SyncPayload::Boards(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserId;

    fn board() -> Board {
        Board::from_draft(
            RecordMeta::new(UserId::new("u1").unwrap(), 1),
            BoardDraft {
                name_encrypted: "enc:name".to_string(),
                description_encrypted: Some("enc:desc".to_string()),
                position: 3,
            },
        )
    }

    #[test]
    fn test_patch_keeps_absent_fields() {
        let mut board = board();
        let patch: BoardPatch = serde_json::from_str(r#"{"position": 7}"#).unwrap();
        board.apply_patch(patch);

        assert_eq!(board.position, 7);
        assert_eq!(board.name_encrypted, "enc:name");
        assert_eq!(board.description_encrypted.as_deref(), Some("enc:desc"));
    }

    #[test]
    fn test_patch_null_clears_description() {
        let mut board = board();
        let patch: BoardPatch =
            serde_json::from_str(r#"{"descriptionEncrypted": null}"#).unwrap();
        board.apply_patch(patch);

        assert!(board.description_encrypted.is_none());
    }

    #[test]
    fn test_serializes_camel_case_with_flattened_meta() {
        let json = serde_json::to_value(board()).unwrap();
        assert_eq!(json["nameEncrypted"], "enc:name");
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["syncStatus"], "pending");
        assert!(json.get("lastSyncAt").is_none());
    }
}
