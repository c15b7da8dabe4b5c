use serde::de::DeserializeOwned;
use serde::Serialize;

use minimind_core::models::{Board, Card, ChildRecord, List, Note, Record, Task};
use minimind_core::{Clock, LocalStore, RecordId, SyncStatus, TableName};

use crate::commands::common::{
    format_relative_time, parse_record_id, resolve_json_payload, short_id, AppContext,
};
use crate::error::CliError;

/// Run `$body` with `$record` aliased to the record type stored in `$table`
macro_rules! with_record_type {
    ($table:expr, $record:ident => $body:expr) => {
        match $table {
            TableName::Boards => {
                type $record = Board;
                $body
            }
            TableName::Lists => {
                type $record = List;
                $body
            }
            TableName::Cards => {
                type $record = Card;
                $body
            }
            TableName::Tasks => {
                type $record = Task;
                $body
            }
            TableName::Notes => {
                type $record = Note;
                $body
            }
        }
    };
}

#[derive(Debug, Serialize)]
pub struct RecordListItem {
    pub id: String,
    pub label: String,
    pub sync_status: SyncStatus,
    pub last_sync_at: Option<i64>,
    pub updated_at: i64,
    pub relative_time: String,
}

fn invalid_payload(table: TableName, error: &serde_json::Error) -> CliError {
    CliError::InvalidPayload {
        table,
        message: error.to_string(),
    }
}

pub async fn create_record<R>(store: &LocalStore, payload: &str) -> Result<R, CliError>
where
    R: Record,
    R::Draft: DeserializeOwned,
{
    let draft = serde_json::from_str::<R::Draft>(payload)
        .map_err(|error| invalid_payload(R::TABLE, &error))?;
    Ok(store.create::<R>(draft).await?)
}

pub async fn update_record<R>(store: &LocalStore, id: &RecordId, payload: &str) -> Result<R, CliError>
where
    R: Record,
    R::Patch: DeserializeOwned,
{
    let patch = serde_json::from_str::<R::Patch>(payload)
        .map_err(|error| invalid_payload(R::TABLE, &error))?;
    Ok(store.update::<R>(id, patch).await?)
}

/// The human-facing field of a record (name or title ciphertext)
fn record_label<R: Record>(record: &R) -> String {
    let Ok(value) = serde_json::to_value(record) else {
        return String::new();
    };
    ["nameEncrypted", "titleEncrypted"]
        .iter()
        .find_map(|key| value.get(*key).and_then(serde_json::Value::as_str))
        .unwrap_or_default()
        .to_string()
}

pub fn record_to_list_item<R: Record>(record: &R, now_ms: i64) -> RecordListItem {
    let meta = record.meta();
    RecordListItem {
        id: meta.id.to_string(),
        label: record_label(record),
        sync_status: meta.sync_status,
        last_sync_at: meta.last_sync_at,
        updated_at: meta.updated_at,
        relative_time: format_relative_time(meta.updated_at, now_ms),
    }
}

pub async fn list_records(
    ctx: &AppContext,
    table: TableName,
    parent: Option<&RecordId>,
) -> Result<Vec<RecordListItem>, CliError> {
    let now_ms = ctx.clock.now_millis();
    match parent {
        Some(parent) => match table {
            TableName::Lists => Ok(list_children::<List>(&ctx.store, parent, now_ms).await?),
            TableName::Cards => Ok(list_children::<Card>(&ctx.store, parent, now_ms).await?),
            other => Err(CliError::NoParent(other)),
        },
        None => with_record_type!(table, R => {
            let records = ctx.store.list::<R>().await?;
            Ok(records
                .iter()
                .map(|record| record_to_list_item(record, now_ms))
                .collect())
        }),
    }
}

async fn list_children<R: ChildRecord>(
    store: &LocalStore,
    parent: &RecordId,
    now_ms: i64,
) -> Result<Vec<RecordListItem>, CliError> {
    let records = store.list_by_parent::<R>(parent).await?;
    Ok(records
        .iter()
        .map(|record| record_to_list_item(record, now_ms))
        .collect())
}

pub fn format_record_lines(items: &[RecordListItem]) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            let label = item.label.chars().take(40).collect::<String>();
            format!(
                "{:<13}  {:<8}  {label:<40}  {}",
                short_id(&item.id),
                item.sync_status.as_str(),
                item.relative_time
            )
        })
        .collect()
}

pub async fn run_create(
    ctx: &AppContext,
    table: TableName,
    json: Option<String>,
) -> Result<(), CliError> {
    let payload = resolve_json_payload(json)?;
    let created = with_record_type!(table, R => {
        serde_json::to_string_pretty(&create_record::<R>(&ctx.store, &payload).await?)?
    });
    println!("{created}");
    Ok(())
}

pub async fn run_update(
    ctx: &AppContext,
    table: TableName,
    id: &str,
    json: Option<String>,
) -> Result<(), CliError> {
    let id = parse_record_id(id)?;
    let payload = resolve_json_payload(json)?;
    let updated = with_record_type!(table, R => {
        serde_json::to_string_pretty(&update_record::<R>(&ctx.store, &id, &payload).await?)?
    });
    println!("{updated}");
    Ok(())
}

pub async fn run_delete(ctx: &AppContext, table: TableName, id: &str) -> Result<(), CliError> {
    let id = parse_record_id(id)?;
    with_record_type!(table, R => ctx.store.delete::<R>(&id).await?);
    println!("{id}");
    Ok(())
}

pub async fn run_list(
    ctx: &AppContext,
    table: TableName,
    parent: Option<&str>,
    as_json: bool,
) -> Result<(), CliError> {
    let parent = parent.map(parse_record_id).transpose()?;
    let items = list_records(ctx, table, parent.as_ref()).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if items.is_empty() {
        println!("No {table} found.");
    } else {
        for line in format_record_lines(&items) {
            println!("{line}");
        }
    }
    Ok(())
}
