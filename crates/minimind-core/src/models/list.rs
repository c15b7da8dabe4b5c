//! List model

use rusqlite::types::Value;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use super::{ChildRecord, Record, RecordId, RecordMeta, SyncPayload, TableName};

/// A column of cards inside a board
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct List {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub board_id: RecordId,
    pub name_encrypted: String,
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ListDraft {
    pub board_id: RecordId,
    pub name_encrypted: String,
    #[serde(default)]
    pub position: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ListPatch {
    #[serde(default)]
    pub board_id: Option<RecordId>,
    #[serde(default)]
    pub name_encrypted: Option<String>,
    #[serde(default)]
    pub position: Option<i64>,
}

impl Record for List {
    type Draft = ListDraft;
    type Patch = ListPatch;

    const TABLE: TableName = TableName::Lists;
    const COLUMNS: &'static [&'static str] = &["board_id", "name_encrypted", "position"];

    fn from_draft(meta: RecordMeta, draft: ListDraft) -> Self {
        Self {
            meta,
            board_id: draft.board_id,
            name_encrypted: draft.name_encrypted,
            position: draft.position,
        }
    }

    fn apply_patch(&mut self, patch: ListPatch) {
        if let Some(board_id) = patch.board_id {
            self.board_id = board_id;
        }
        if let Some(name) = patch.name_encrypted {
            self.name_encrypted = name;
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
            Value::Text(self.board_id.as_str()),
            Value::Text(self.name_encrypted.clone()),
            Value::Integer(self.position),
        ]
    }

    fn from_row(meta: RecordMeta, row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            meta,
            board_id: row.get(offset)?,
            name_encrypted: row.get(offset + 1)?,
            position: row.get(offset + 2)?,
        })
    }

    fn into_payload(self) -> SyncPayload {
        SyncPayload::Lists(self)
    }
}

impl ChildRecord for List {
    const PARENT_COLUMN: &'static str = "board_id";
}
