//! Card model

use rusqlite::types::Value;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use super::record::double_option;
use super::{ChildRecord, Record, RecordId, RecordMeta, SyncPayload, TableName};

/// A card inside a list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub list_id: RecordId,
    pub title_encrypted: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_encrypted: Option<String>,
    pub position: i64,
    /// Due date (Unix ms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CardDraft {
    pub list_id: RecordId,
    pub title_encrypted: String,
    #[serde(default)]
    pub description_encrypted: Option<String>,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub due_date: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CardPatch {
    #[serde(default)]
    pub list_id: Option<RecordId>,
    #[serde(default)]
    pub title_encrypted: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description_encrypted: Option<Option<String>>,
    #[serde(default)]
    pub position: Option<i64>,
    #[serde(default, deserialize_with = "double_option")]
    pub due_date: Option<Option<i64>>,
}

impl Record for Card {
    type Draft = CardDraft;
    type Patch = CardPatch;

    const TABLE: TableName = TableName::Cards;
    const COLUMNS: &'static [&'static str] = &[
        "list_id",
        "title_encrypted",
        "description_encrypted",
        "position",
        "due_date",
    ];

    fn from_draft(meta: RecordMeta, draft: CardDraft) -> Self {
        Self {
            meta,
            list_id: draft.list_id,
            title_encrypted: draft.title_encrypted,
            description_encrypted: draft.description_encrypted,
            position: draft.position,
            due_date: draft.due_date,
        }
    }

    fn apply_patch(&mut self, patch: CardPatch) {
        if let Some(list_id) = patch.list_id {
            self.list_id = list_id;
        }
        if let Some(title) = patch.title_encrypted {
            self.title_encrypted = title;
        }
        if let Some(description) = patch.description_encrypted {
            self.description_encrypted = description;
        }
        if let Some(position) = patch.position {
            self.position = position;
        }
        if let Some(due_date) = patch.due_date {
            self.due_date = due_date;
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
            Value::Text(self.list_id.as_str()),
            Value::Text(self.title_encrypted.clone()),
            Value::from(self.description_encrypted.clone()),
            Value::Integer(self.position),
            Value::from(self.due_date),
        ]
    }

    fn from_row(meta: RecordMeta, row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            meta,
            list_id: row.get(offset)?,
            title_encrypted: row.get(offset + 1)?,
            description_encrypted: row.get(offset + 2)?,
            position: row.get(offset + 3)?,
            due_date: row.get(offset + 4)?,
        })
    }

    fn into_payload(self) -> SyncPayload {
        SyncPayload::Cards(self)
    }
}

impl ChildRecord for Card {
    const PARENT_COLUMN: &'static str = "list_id";
}
