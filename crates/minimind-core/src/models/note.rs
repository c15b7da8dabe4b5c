//! Note model

use rusqlite::types::Value;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use super::record::double_option;
use super::{Record, RecordMeta, SyncPayload, TableName};

/// A note in the system
///
/// Title, content and tags arrive already encrypted; the store only
/// transports the ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub title_encrypted: String,
    pub content_encrypted: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags_encrypted: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NoteDraft {
    pub title_encrypted: String,
    #[serde(default)]
    pub content_encrypted: String,
    #[serde(default)]
    pub tags_encrypted: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NotePatch {
    #[serde(default)]
    pub title_encrypted: Option<String>,
    #[serde(default)]
    pub content_encrypted: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub tags_encrypted: Option<Option<String>>,
}

impl Record for Note {
    type Draft = NoteDraft;
    type Patch = NotePatch;

    const TABLE: TableName = TableName::Notes;
    const COLUMNS: &'static [&'static str] =
        &["title_encrypted", "content_encrypted", "tags_encrypted"];

    fn from_draft(meta: RecordMeta, draft: NoteDraft) -> Self {
        Self {
            meta,
            title_encrypted: draft.title_encrypted,
            content_encrypted: draft.content_encrypted,
            tags_encrypted: draft.tags_encrypted,
        }
    }

    fn apply_patch(&mut self, patch: NotePatch) {
        if let Some(title) = patch.title_encrypted {
            self.title_encrypted = title;
        }
        if let Some(content) = patch.content_encrypted {
            self.content_encrypted = content;
        }
        if let Some(tags) = patch.tags_encrypted {
            self.tags_encrypted = tags;
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
            Value::Text(self.content_encrypted.clone()),
            Value::from(self.tags_encrypted.clone()),
        ]
    }

    fn from_row(meta: RecordMeta, row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            meta,
            title_encrypted: row.get(offset)?,
            content_encrypted: row.get(offset + 1)?,
            tags_encrypted: row.get(offset + 2)?,
        })
    }

    fn into_payload(self) -> SyncPayload {
        SyncPayload::Notes(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserId;

    #[test]
    fn test_note_from_draft() {
        let note = Note::from_draft(
            RecordMeta::new(UserId::new("u1").unwrap(), 10),
            NoteDraft {
                title_encrypted: "enc:title".to_string(),
                content_encrypted: "enc:body".to_string(),
                tags_encrypted: None,
            },
        );
        assert_eq!(note.title_encrypted, "enc:title");
        assert_eq!(note.meta.created_at, note.meta.updated_at);
    }

    #[test]
    fn test_note_payload_variant() {
        let note = Note::from_draft(
            RecordMeta::new(UserId::new("u1").unwrap(), 10),
            NoteDraft {
                title_encrypted: "t".to_string(),
                ..NoteDraft::default()
            },
        );
        let id = note.id();
        let payload = note.into_payload();
        assert_eq!(payload.table(), TableName::Notes);
        assert_eq!(payload.record_id(), id);
    }
}
