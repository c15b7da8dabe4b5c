//! Local store: per-user record tables with write-through queueing

use std::sync::Arc;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use super::queue::{has_other_pending, insert_operation};
use super::Database;
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::models::{
    ChildRecord, OperationKind, Record, RecordId, RecordMeta, SyncOperation, SyncStatus,
    TableName, UserId, META_COLUMNS,
};

fn column_list<R: Record>() -> String {
    META_COLUMNS
        .iter()
        .chain(R::COLUMNS)
        .copied()
        .collect::<Vec<_>>()
        .join(", ")
}

fn select_sql<R: Record>(filter: &str) -> String {
    format!(
        "SELECT {} FROM {} WHERE {filter} ORDER BY created_at ASC, rowid ASC",
        column_list::<R>(),
        R::TABLE.as_str()
    )
}

fn parse_record<R: Record>(row: &rusqlite::Row<'_>) -> rusqlite::Result<R> {
    R::from_row(RecordMeta::from_row(row)?, row, META_COLUMNS.len())
}

fn insert_record<R: Record>(conn: &Connection, record: &R) -> Result<()> {
    let placeholders = vec!["?"; META_COLUMNS.len() + R::COLUMNS.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({placeholders})",
        R::TABLE.as_str(),
        column_list::<R>()
    );
    let values = record
        .meta()
        .values()
        .into_iter()
        .chain(record.column_values());
    conn.execute(&sql, params_from_iter(values))?;
    Ok(())
}

fn update_record<R: Record>(conn: &Connection, record: &R) -> Result<()> {
    // id and user_id are immutable
    let assignments = META_COLUMNS[2..]
        .iter()
        .chain(R::COLUMNS)
        .map(|column| format!("{column} = ?"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE {} SET {assignments} WHERE id = ? AND user_id = ?",
        R::TABLE.as_str()
    );
    let meta = record.meta();
    let mut values = meta.values().split_off(2);
    values.extend(record.column_values());
    values.push(rusqlite::types::Value::Text(meta.id.as_str()));
    values.push(rusqlite::types::Value::Text(meta.user_id.as_str().to_string()));

    conn.execute(&sql, params_from_iter(values))?;
    Ok(())
}

fn set_record_status(
    conn: &Connection,
    table: TableName,
    id: &RecordId,
    user_id: &UserId,
    status: SyncStatus,
    last_sync_at: Option<i64>,
) -> Result<bool> {
    let rows = conn.execute(
        &format!(
            "UPDATE {} SET sync_status = ?, last_sync_at = COALESCE(?, last_sync_at)
             WHERE id = ? AND user_id = ?",
            table.as_str()
        ),
        params![status, last_sync_at, id, user_id.as_str()],
    )?;
    Ok(rows > 0)
}

fn select_record<R: Record>(
    conn: &Connection,
    id: &RecordId,
    user_id: &UserId,
) -> Result<Option<R>> {
    Ok(conn
        .query_row(
            &select_sql::<R>("id = ? AND user_id = ?"),
            params![id, user_id.as_str()],
            parse_record::<R>,
        )
        .optional()?)
}

/// Per-user handle on the record tables.
///
/// Every mutation writes the record change and exactly one queue entry in
/// the same transaction, so the two can never diverge.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Database>,
    user_id: UserId,
    clock: Arc<dyn Clock>,
}

impl LocalStore {
    pub fn new(db: Arc<Database>, user_id: UserId, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            user_id,
            clock,
        }
    }

    pub const fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Create a record, mark it pending and queue a `create` with the full payload
    pub async fn create<R: Record>(&self, draft: R::Draft) -> Result<R> {
        let now = self.clock.now_millis();
        let record = R::from_draft(RecordMeta::new(self.user_id.clone(), now), draft);
        let operation = SyncOperation::new(
            self.user_id.clone(),
            OperationKind::Create,
            R::TABLE,
            record.id(),
            Some(record.clone().into_payload()),
            now,
        );

        let stored = record.clone();
        self.db
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                insert_record(&tx, &stored)?;
                insert_operation(&tx, &operation)?;
                tx.commit()?;
                Ok(())
            })
            .await?;

        tracing::debug!("Created {} {}", R::TABLE, record.id());
        Ok(record)
    }

    /// Merge `patch` into an existing record and queue an `update` with the
    /// post-merge record
    pub async fn update<R: Record>(&self, id: &RecordId, patch: R::Patch) -> Result<R> {
        let now = self.clock.now_millis();
        let user_id = self.user_id.clone();
        let id = *id;

        let record = self
            .db
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                let mut record = select_record::<R>(&tx, &id, &user_id)?
                    .ok_or_else(|| Error::not_found(R::TABLE, id))?;

                record.apply_patch(patch);
                let meta = record.meta_mut();
                meta.updated_at = now;
                meta.sync_status = SyncStatus::Pending;

                update_record(&tx, &record)?;
                let operation = SyncOperation::new(
                    user_id,
                    OperationKind::Update,
                    R::TABLE,
                    id,
                    Some(record.clone().into_payload()),
                    now,
                );
                insert_operation(&tx, &operation)?;
                tx.commit()?;
                Ok(record)
            })
            .await?;

        tracing::debug!("Updated {} {}", R::TABLE, id);
        Ok(record)
    }

    /// Remove a record immediately and queue a `delete` without payload
    pub async fn delete<R: Record>(&self, id: &RecordId) -> Result<()> {
        let now = self.clock.now_millis();
        let user_id = self.user_id.clone();
        let id = *id;

        self.db
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                let rows = tx.execute(
                    &format!("DELETE FROM {} WHERE id = ? AND user_id = ?", R::TABLE.as_str()),
                    params![id, user_id.as_str()],
                )?;
                if rows == 0 {
                    return Err(Error::not_found(R::TABLE, id));
                }

                let operation = SyncOperation::new(
                    user_id,
                    OperationKind::Delete,
                    R::TABLE,
                    id,
                    None,
                    now,
                );
                insert_operation(&tx, &operation)?;
                tx.commit()?;
                Ok(())
            })
            .await?;

        tracing::debug!("Deleted {} {}", R::TABLE, id);
        Ok(())
    }

    /// Get a record by ID
    pub async fn get<R: Record>(&self, id: &RecordId) -> Result<Option<R>> {
        let user_id = self.user_id.clone();
        let id = *id;
        self.db
            .with_conn(move |conn| select_record::<R>(conn, &id, &user_id))
            .await
    }

    /// Records owned by `owner`; other users' records are never visible
    pub async fn list_by_owner<R: Record>(&self, owner: &UserId) -> Result<Vec<R>> {
        let user_id = self.user_id.clone();
        let owner = owner.clone();
        self.db
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(&select_sql::<R>("user_id = ? AND user_id = ?"))?;
                let records = stmt
                    .query_map(params![owner.as_str(), user_id.as_str()], parse_record::<R>)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(records)
            })
            .await
    }

    /// Records of the current user
    pub async fn list<R: Record>(&self) -> Result<Vec<R>> {
        self.list_by_owner(&self.user_id).await
    }

    /// Children of `parent_id` (lists of a board, cards of a list)
    pub async fn list_by_parent<R: ChildRecord>(&self, parent_id: &RecordId) -> Result<Vec<R>> {
        let user_id = self.user_id.clone();
        let parent_id = *parent_id;
        self.db
            .with_conn(move |conn| {
                let filter = format!("{} = ? AND user_id = ?", R::PARENT_COLUMN);
                let mut stmt = conn.prepare(&select_sql::<R>(&filter))?;
                let records = stmt
                    .query_map(params![parent_id, user_id.as_str()], parse_record::<R>)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(records)
            })
            .await
    }

    /// Current sync status of a record, `None` when it no longer exists locally
    pub async fn sync_status(
        &self,
        table: TableName,
        id: &RecordId,
    ) -> Result<Option<SyncStatus>> {
        let user_id = self.user_id.clone();
        let id = *id;
        self.db
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(
                        &format!(
                            "SELECT sync_status FROM {} WHERE id = ? AND user_id = ?",
                            table.as_str()
                        ),
                        params![id, user_id.as_str()],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await
    }

    /// Mark a record confirmed by the remote at `at`.
    ///
    /// Returns `false` when the record no longer exists locally.
    pub async fn mark_record_synced(
        &self,
        table: TableName,
        id: &RecordId,
        at: i64,
    ) -> Result<bool> {
        let user_id = self.user_id.clone();
        let id = *id;
        self.db
            .with_conn(move |conn| {
                set_record_status(conn, table, &id, &user_id, SyncStatus::Synced, Some(at))
            })
            .await
    }

    /// Overwrite a record's sync status; `false` when the record is gone
    pub async fn mark_record_status(
        &self,
        table: TableName,
        id: &RecordId,
        status: SyncStatus,
    ) -> Result<bool> {
        let user_id = self.user_id.clone();
        let id = *id;
        self.db
            .with_conn(move |conn| set_record_status(conn, table, &id, &user_id, status, None))
            .await
    }

    /// Reflect the terminal outcome of `operation` on its record.
    ///
    /// The record stays `pending` while another entry for it is queued;
    /// otherwise it becomes `outcome` (with `last_sync_at` stamped when
    /// `Synced`). Returns the status written, or `None` when nothing changed
    /// (record deleted locally or still pending).
    pub async fn settle_record(
        &self,
        operation: &SyncOperation,
        outcome: SyncStatus,
    ) -> Result<Option<SyncStatus>> {
        let now = self.clock.now_millis();
        let user_id = self.user_id.clone();
        let table = operation.table_name;
        let record_id = operation.record_id;
        let operation_id = operation.id;

        self.db
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                if has_other_pending(&tx, table, &record_id, &operation_id)? {
                    return Ok(None);
                }

                let last_sync_at = (outcome == SyncStatus::Synced).then_some(now);
                let changed =
                    set_record_status(&tx, table, &record_id, &user_id, outcome, last_sync_at)?;
                tx.commit()?;
                Ok(changed.then_some(outcome))
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::{MutationQueue, RetryPolicy};
    use crate::models::{
        Board, BoardDraft, Card, CardDraft, CardPatch, List, ListDraft, Note, NoteDraft,
        OperationStatus, SyncPayload, Task, TaskDraft, TaskPatch,
    };
    use pretty_assertions::assert_eq;

    struct Fixture {
        clock: Arc<ManualClock>,
        store: LocalStore,
        queue: MutationQueue,
    }

    fn setup() -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(1_000));
        let user = UserId::new("u1").unwrap();
        Fixture {
            store: LocalStore::new(db.clone(), user.clone(), clock.clone()),
            queue: MutationQueue::new(db, user, clock.clone(), RetryPolicy::default()),
            clock,
        }
    }

    fn task_draft(title: &str) -> TaskDraft {
        TaskDraft {
            title_encrypted: title.to_string(),
            priority: 2,
            ..TaskDraft::default()
        }
    }

    #[tokio::test]
    async fn test_create_persists_pending_and_queues_snapshot() {
        let fx = setup();
        let task: Task = fx.store.create(task_draft("enc:buy milk")).await.unwrap();

        assert_eq!(task.meta.sync_status, SyncStatus::Pending);
        assert_eq!(task.meta.user_id.as_str(), "u1");

        let fetched: Task = fx.store.get(&task.id()).await.unwrap().unwrap();
        assert_eq!(fetched, task);

        let pending = fx.queue.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].operation, OperationKind::Create);
        assert_eq!(pending[0].table_name, TableName::Tasks);
        assert_eq!(pending[0].record_id, task.id());
        assert_eq!(pending[0].data, Some(SyncPayload::Tasks(task)));
    }

    #[tokio::test]
    async fn test_update_merges_and_queues_post_merge_record() {
        let fx = setup();
        let task: Task = fx.store.create(task_draft("enc:a")).await.unwrap();

        fx.clock.advance(500);
        let updated: Task = fx
            .store
            .update(
                &task.id(),
                TaskPatch {
                    completed: Some(true),
                    ..TaskPatch::default()
                },
            )
            .await
            .unwrap();

        assert!(updated.completed);
        assert_eq!(updated.title_encrypted, "enc:a");
        assert_eq!(updated.priority, 2);
        assert_eq!(updated.meta.updated_at, 1_500);
        assert_eq!(updated.meta.created_at, 1_000);

        let pending = fx.queue.pending().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[1].operation, OperationKind::Update);
        assert_eq!(pending[1].data, Some(SyncPayload::Tasks(updated)));
    }

    #[tokio::test]
    async fn test_update_missing_record_is_not_found() {
        let fx = setup();
        let result = fx
            .store
            .update::<Card>(&RecordId::new(), CardPatch::default())
            .await;

        assert!(result.unwrap_err().is_not_found());
        assert!(fx.queue.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_record_immediately() {
        let fx = setup();
        let user = fx.store.user_id().clone();
        let note: Note = fx
            .store
            .create(NoteDraft {
                title_encrypted: "enc:n1".to_string(),
                ..NoteDraft::default()
            })
            .await
            .unwrap();

        fx.store.delete::<Note>(&note.id()).await.unwrap();

        let notes: Vec<Note> = fx.store.list_by_owner(&user).await.unwrap();
        assert!(notes.is_empty());

        let pending = fx.queue.pending().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[1].operation, OperationKind::Delete);
        assert_eq!(pending[1].data, None);
    }

    #[tokio::test]
    async fn test_delete_missing_record_is_not_found() {
        let fx = setup();
        let result = fx.store.delete::<Board>(&RecordId::new()).await;
        assert!(result.unwrap_err().is_not_found());
        assert!(fx.queue.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_every_mutation_queues_exactly_one_operation() {
        let fx = setup();
        let board: Board = fx
            .store
            .create(BoardDraft {
                name_encrypted: "enc:b".to_string(),
                ..BoardDraft::default()
            })
            .await
            .unwrap();
        for position in 1..=3 {
            fx.store
                .update::<Board>(
                    &board.id(),
                    crate::models::BoardPatch {
                        position: Some(position),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }
        fx.store.delete::<Board>(&board.id()).await.unwrap();

        let kinds: Vec<_> = fx
            .queue
            .pending()
            .await
            .unwrap()
            .into_iter()
            .map(|op| op.operation)
            .collect();
        assert_eq!(
            kinds,
            vec![
                OperationKind::Create,
                OperationKind::Update,
                OperationKind::Update,
                OperationKind::Update,
                OperationKind::Delete,
            ]
        );
    }

    #[tokio::test]
    async fn test_list_by_parent() {
        let fx = setup();
        let board: Board = fx
            .store
            .create(BoardDraft {
                name_encrypted: "enc:b".to_string(),
                ..BoardDraft::default()
            })
            .await
            .unwrap();
        let list: List = fx
            .store
            .create(ListDraft {
                board_id: board.id(),
                name_encrypted: "enc:todo".to_string(),
                position: 0,
            })
            .await
            .unwrap();
        let other_list: List = fx
            .store
            .create(ListDraft {
                board_id: RecordId::new(),
                name_encrypted: "enc:elsewhere".to_string(),
                position: 0,
            })
            .await
            .unwrap();
        let card: Card = fx
            .store
            .create(CardDraft {
                list_id: list.id(),
                title_encrypted: "enc:c".to_string(),
                description_encrypted: None,
                position: 1,
                due_date: Some(42),
            })
            .await
            .unwrap();

        let lists: Vec<List> = fx.store.list_by_parent(&board.id()).await.unwrap();
        assert_eq!(lists, vec![list.clone()]);
        assert_ne!(lists[0].id(), other_list.id());

        let cards: Vec<Card> = fx.store.list_by_parent(&list.id()).await.unwrap();
        assert_eq!(cards, vec![card]);
    }

    #[tokio::test]
    async fn test_records_are_isolated_per_user() {
        let fx = setup();
        fx.store.create::<Task>(task_draft("enc:mine")).await.unwrap();

        let other = LocalStore::new(
            fx.store.db.clone(),
            UserId::new("u2").unwrap(),
            fx.clock.clone(),
        );
        assert!(other.list::<Task>().await.unwrap().is_empty());
        let u1 = UserId::new("u1").unwrap();
        assert!(other.list_by_owner::<Task>(&u1).await.unwrap().is_empty());
        assert_eq!(fx.store.list::<Task>().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_settle_record_waits_for_later_operations() {
        let fx = setup();
        let task: Task = fx.store.create(task_draft("enc:a")).await.unwrap();
        fx.store
            .update::<Task>(&task.id(), TaskPatch::default())
            .await
            .unwrap();

        let pending = fx.queue.pending().await.unwrap();
        fx.queue.mark_synced(&pending[0].id).await.unwrap();
        let settled = fx
            .store
            .settle_record(&pending[0], SyncStatus::Synced)
            .await
            .unwrap();
        assert_eq!(settled, None);
        assert_eq!(
            fx.store.sync_status(TableName::Tasks, &task.id()).await.unwrap(),
            Some(SyncStatus::Pending)
        );

        fx.clock.set(9_000);
        fx.queue.mark_synced(&pending[1].id).await.unwrap();
        let settled = fx
            .store
            .settle_record(&pending[1], SyncStatus::Synced)
            .await
            .unwrap();
        assert_eq!(settled, Some(SyncStatus::Synced));

        let stored: Task = fx.store.get(&task.id()).await.unwrap().unwrap();
        assert_eq!(stored.meta.sync_status, SyncStatus::Synced);
        assert_eq!(stored.meta.last_sync_at, Some(9_000));
        assert_eq!(
            fx.queue.count(OperationStatus::Pending).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_settle_record_after_local_delete_is_noop() {
        let fx = setup();
        let task: Task = fx.store.create(task_draft("enc:a")).await.unwrap();
        let create = fx.queue.pending().await.unwrap().remove(0);
        fx.store.delete::<Task>(&task.id()).await.unwrap();
        let delete = fx.queue.pending().await.unwrap().remove(1);

        fx.queue.mark_synced(&create.id).await.unwrap();
        fx.queue.mark_synced(&delete.id).await.unwrap();
        let settled = fx
            .store
            .settle_record(&delete, SyncStatus::Synced)
            .await
            .unwrap();
        assert_eq!(settled, None);
    }

    #[tokio::test]
    async fn test_mark_record_status_and_synced() {
        let fx = setup();
        let task: Task = fx.store.create(task_draft("enc:a")).await.unwrap();

        assert!(fx
            .store
            .mark_record_status(TableName::Tasks, &task.id(), SyncStatus::Conflict)
            .await
            .unwrap());
        assert_eq!(
            fx.store.sync_status(TableName::Tasks, &task.id()).await.unwrap(),
            Some(SyncStatus::Conflict)
        );

        assert!(fx
            .store
            .mark_record_synced(TableName::Tasks, &task.id(), 7_000)
            .await
            .unwrap());
        let stored: Task = fx.store.get(&task.id()).await.unwrap().unwrap();
        assert_eq!(stored.meta.sync_status, SyncStatus::Synced);
        assert_eq!(stored.meta.last_sync_at, Some(7_000));

        fx.store.delete::<Task>(&task.id()).await.unwrap();
        assert!(!fx
            .store
            .mark_record_synced(TableName::Tasks, &task.id(), 8_000)
            .await
            .unwrap());
    }
}
