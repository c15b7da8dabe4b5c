//! Task model

use rusqlite::types::Value;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use super::record::double_option;
use super::{Record, RecordMeta, SyncPayload, TableName};

/// A standalone to-do item owned by a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub title_encrypted: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_encrypted: Option<String>,
    pub completed: bool,
    pub priority: i64,
    /// Due date (Unix ms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TaskDraft {
    pub title_encrypted: String,
    #[serde(default)]
    pub description_encrypted: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub due_date: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TaskPatch {
    #[serde(default)]
    pub title_encrypted: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description_encrypted: Option<Option<String>>,
    #[serde(default)]
    pub completed: Option<bool>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default, deserialize_with = "double_option")]
    pub due_date: Option<Option<i64>>,
}

impl Record for Task {
    type Draft = TaskDraft;
    type Patch = TaskPatch;

    const TABLE: TableName = TableName::Tasks;
    const COLUMNS: &'static [&'static str] = &[
        "title_encrypted",
        "description_encrypted",
        "completed",
        "priority",
        "due_date",
    ];

    fn from_draft(meta: RecordMeta, draft: TaskDraft) -> Self {
        Self {
            meta,
            title_encrypted: draft.title_encrypted,
            description_encrypted: draft.description_encrypted,
            completed: draft.completed,
            priority: draft.priority,
            due_date: draft.due_date,
        }
    }

    fn apply_patch(&mut self, patch: TaskPatch) {
        if let Some(title) = patch.title_encrypted {
            self.title_encrypted = title;
        }
        if let Some(description) = patch.description_encrypted {
            self.description_encrypted = description;
        }
        if let Some(completed) = patch.completed {
            self.completed = completed;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
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
            Value::Text(self.title_encrypted.clone()),
            Value::from(self.description_encrypted.clone()),
            Value::Integer(i64::from(self.completed)),
            Value::Integer(self.priority),
            Value::from(self.due_date),
        ]
    }

    fn from_row(meta: RecordMeta, row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            meta,
            title_encrypted: row.get(offset)?,
            description_encrypted: row.get(offset + 1)?,
            completed: row.get::<_, i64>(offset + 2)? != 0,
            priority: row.get(offset + 3)?,
            due_date: row.get(offset + 4)?,
        })
    }

    fn into_payload(self) -> SyncPayload {
        SyncPayload::Tasks(self)
    }
}
