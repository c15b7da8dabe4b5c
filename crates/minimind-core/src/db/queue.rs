//! Mutation queue: durable, ordered log of operations awaiting the remote

use std::sync::Arc;
use std::time::Duration;

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::Database;
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::models::{
    OperationId, OperationKind, OperationStatus, RecordId, SyncOperation, SyncPayload, TableName,
    UserId,
};

const OPERATION_COLUMNS: &str =
    "id, user_id, operation, table_name, record_id, data, timestamp, retry_count, status";

/// Retry ceiling and backoff base shared by the queue and the sync manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failed attempts after which an operation is abandoned
    pub max_retries: u32,
    /// Base of the linear backoff
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before the `retry_count`-th retry: `retry_delay * retry_count`
    pub fn backoff(&self, retry_count: u32) -> Duration {
        self.retry_delay.saturating_mul(retry_count)
    }

    /// Whether an operation with this many failures is abandoned
    pub const fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }

    /// Total backoff an operation can spend waiting between its attempts
    pub fn retry_window(&self) -> Duration {
        (1..self.max_retries).fold(Duration::ZERO, |total, retry_count| {
            total.saturating_add(self.backoff(retry_count))
        })
    }
}

/// Outcome of [`MutationQueue::try_acquire_lease`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseGrant {
    /// Taken over: the lease was free, expired, or held by someone else
    Acquired,
    /// Still held by the caller; expiry extended
    Renewed,
    /// Held by another live agent
    Denied,
}

impl LeaseGrant {
    pub const fn is_granted(self) -> bool {
        !matches!(self, Self::Denied)
    }
}

/// Insert a queue entry on an existing connection or transaction
pub(crate) fn insert_operation(conn: &Connection, operation: &SyncOperation) -> Result<()> {
    operation.validate().map_err(Error::InvalidInput)?;
    let data = operation
        .data
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        "INSERT INTO sync_operations (id, user_id, operation, table_name, record_id, data, timestamp, retry_count, status)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            operation.id,
            operation.user_id.as_str(),
            operation.operation,
            operation.table_name,
            operation.record_id,
            data,
            operation.timestamp,
            operation.retry_count,
            operation.status,
        ],
    )?;
    Ok(())
}

/// Whether another pending entry still targets the same record
pub(crate) fn has_other_pending(
    conn: &Connection,
    table: TableName,
    record_id: &RecordId,
    excluding: &OperationId,
) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM sync_operations
            WHERE table_name = ? AND record_id = ? AND status = 'pending' AND id != ?
        )",
        params![table, record_id, excluding],
        |row| row.get(0),
    )?)
}

fn parse_operation(row: &Row<'_>) -> rusqlite::Result<SyncOperation> {
    let user_id: String = row.get(1)?;
    let data: Option<String> = row.get(5)?;
    let data = data
        .map(|json| serde_json::from_str::<SyncPayload>(&json))
        .transpose()
        .map_err(|error| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(error)))?;

    Ok(SyncOperation {
        id: row.get(0)?,
        user_id: UserId::new(user_id)
            .ok_or_else(|| rusqlite::Error::InvalidColumnType(1, "user_id".into(), Type::Text))?,
        operation: row.get(2)?,
        table_name: row.get(3)?,
        record_id: row.get(4)?,
        data,
        timestamp: row.get(6)?,
        retry_count: row.get(7)?,
        status: row.get(8)?,
    })
}

/// Per-user handle on the `sync_operations` table
#[derive(Clone)]
pub struct MutationQueue {
    db: Arc<Database>,
    user_id: UserId,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl MutationQueue {
    pub fn new(
        db: Arc<Database>,
        user_id: UserId,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            db,
            user_id,
            clock,
            policy,
        }
    }

    pub const fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Append a new pending entry stamped with the current time
    pub async fn enqueue(
        &self,
        operation: OperationKind,
        table: TableName,
        record_id: RecordId,
        data: Option<SyncPayload>,
    ) -> Result<SyncOperation> {
        let entry = SyncOperation::new(
            self.user_id.clone(),
            operation,
            table,
            record_id,
            data,
            self.clock.now_millis(),
        );
        let stored = entry.clone();
        self.db
            .with_conn(move |conn| insert_operation(conn, &stored))
            .await?;

        tracing::debug!(
            "Queued {} for {} {}",
            entry.operation,
            entry.table_name,
            entry.record_id
        );
        Ok(entry)
    }

    /// Snapshot of all pending entries, oldest first
    pub async fn pending(&self) -> Result<Vec<SyncOperation>> {
        let user_id = self.user_id.as_str().to_string();
        self.db
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {OPERATION_COLUMNS} FROM sync_operations
                     WHERE user_id = ? AND status = 'pending'
                     ORDER BY timestamp ASC, rowid ASC"
                ))?;
                let operations = stmt
                    .query_map(params![user_id], parse_operation)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(operations)
            })
            .await
    }

    /// Pending entries a drain pass may replay now: not claimed by another
    /// replay and past their backoff, oldest first
    pub async fn due(&self) -> Result<Vec<SyncOperation>> {
        let user_id = self.user_id.as_str().to_string();
        let now = self.clock.now_millis();
        self.db
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {OPERATION_COLUMNS} FROM sync_operations
                     WHERE user_id = ? AND status = 'pending' AND in_flight = 0
                       AND (next_attempt_at IS NULL OR next_attempt_at <= ?)
                     ORDER BY timestamp ASC, rowid ASC"
                ))?;
                let operations = stmt
                    .query_map(params![user_id, now], parse_operation)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(operations)
            })
            .await
    }

    /// Entries abandoned after exhausting their retries, newest first
    pub async fn failed(&self) -> Result<Vec<SyncOperation>> {
        let user_id = self.user_id.as_str().to_string();
        self.db
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {OPERATION_COLUMNS} FROM sync_operations
                     WHERE user_id = ? AND status = 'failed'
                     ORDER BY timestamp DESC, rowid DESC"
                ))?;
                let operations = stmt
                    .query_map(params![user_id], parse_operation)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(operations)
            })
            .await
    }

    pub async fn get(&self, id: &OperationId) -> Result<Option<SyncOperation>> {
        let user_id = self.user_id.as_str().to_string();
        let id = *id;
        self.db
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(
                        &format!(
                            "SELECT {OPERATION_COLUMNS} FROM sync_operations
                             WHERE id = ? AND user_id = ?"
                        ),
                        params![id, user_id],
                        parse_operation,
                    )
                    .optional()?)
            })
            .await
    }

    /// Count entries in the given status
    pub async fn count(&self, status: OperationStatus) -> Result<usize> {
        let user_id = self.user_id.as_str().to_string();
        self.db
            .with_conn(move |conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sync_operations WHERE user_id = ? AND status = ?",
                    params![user_id, status],
                    |row| row.get(0),
                )?)
            })
            .await
    }

    pub async fn pending_count(&self) -> Result<usize> {
        self.count(OperationStatus::Pending).await
    }

    /// Pending entries targeting one record, oldest first
    pub async fn pending_for_record(
        &self,
        table: TableName,
        record_id: &RecordId,
    ) -> Result<Vec<SyncOperation>> {
        let user_id = self.user_id.as_str().to_string();
        let record_id = *record_id;
        self.db
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {OPERATION_COLUMNS} FROM sync_operations
                     WHERE user_id = ? AND table_name = ? AND record_id = ? AND status = 'pending'
                     ORDER BY timestamp ASC, rowid ASC"
                ))?;
                let operations = stmt
                    .query_map(params![user_id, table, record_id], parse_operation)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(operations)
            })
            .await
    }

    /// Transition a pending entry to `synced`. Terminal: never revisited.
    ///
    /// Already-synced entries are left untouched.
    pub async fn mark_synced(&self, id: &OperationId) -> Result<()> {
        let user_id = self.user_id.as_str().to_string();
        let id = *id;
        let changed = self
            .db
            .with_conn(move |conn| {
                Ok(conn.execute(
                    "UPDATE sync_operations
                     SET status = 'synced', in_flight = 0, claimed_by = NULL, next_attempt_at = NULL
                     WHERE id = ? AND user_id = ? AND status = 'pending'",
                    params![id, user_id],
                )?)
            })
            .await?;

        if changed == 0 && self.get(&id).await?.is_none() {
            return Err(Error::InvalidInput(format!("unknown sync operation {id}")));
        }
        Ok(())
    }

    /// Record a failed attempt.
    ///
    /// Sets `retry_count` (never lowering it) and returns the resulting
    /// status: `Failed` once the retry ceiling is reached, otherwise
    /// `Pending` with the next attempt scheduled after the backoff delay.
    pub async fn mark_failed(
        &self,
        id: &OperationId,
        new_retry_count: u32,
    ) -> Result<OperationStatus> {
        let status = if self.policy.is_exhausted(new_retry_count) {
            OperationStatus::Failed
        } else {
            OperationStatus::Pending
        };
        let backoff_ms = i64::try_from(self.policy.backoff(new_retry_count).as_millis())
            .unwrap_or(i64::MAX);
        let next_attempt_at = (status == OperationStatus::Pending)
            .then(|| self.clock.now_millis().saturating_add(backoff_ms));
        let user_id = self.user_id.as_str().to_string();
        let id = *id;

        let current = self
            .db
            .with_conn(move |conn| {
                conn.execute(
                    "UPDATE sync_operations
                     SET retry_count = MAX(retry_count, ?), status = ?, in_flight = 0, claimed_by = NULL,
                         next_attempt_at = ?
                     WHERE id = ? AND user_id = ? AND status = 'pending'",
                    params![new_retry_count, status, next_attempt_at, id, user_id],
                )?;
                Ok(conn
                    .query_row(
                        "SELECT status FROM sync_operations WHERE id = ? AND user_id = ?",
                        params![id, user_id],
                        |row| row.get::<_, OperationStatus>(0),
                    )
                    .optional()?)
            })
            .await?;

        current.ok_or_else(|| Error::InvalidInput(format!("unknown sync operation {id}")))
    }

    /// Atomically mark a pending entry as being replayed by `holder`.
    ///
    /// Returns `false` when the entry is already claimed or no longer
    /// pending, in which case the caller must not replay it.
    pub async fn claim(&self, id: &OperationId, holder: &str) -> Result<bool> {
        let user_id = self.user_id.as_str().to_string();
        let holder = holder.to_string();
        let id = *id;
        self.db
            .with_conn(move |conn| {
                let changed = conn.execute(
                    "UPDATE sync_operations SET in_flight = 1, claimed_by = ?
                     WHERE id = ? AND user_id = ? AND status = 'pending' AND in_flight = 0",
                    params![holder, id, user_id],
                )?;
                Ok(changed == 1)
            })
            .await
    }

    /// Drop the in-flight mark without recording an outcome
    pub async fn release(&self, id: &OperationId) -> Result<()> {
        let user_id = self.user_id.as_str().to_string();
        let id = *id;
        self.db
            .with_conn(move |conn| {
                conn.execute(
                    "UPDATE sync_operations SET in_flight = 0, claimed_by = NULL
                     WHERE id = ? AND user_id = ?",
                    params![id, user_id],
                )?;
                Ok(())
            })
            .await
    }

    /// Clear claims left behind by agents other than `holder`.
    ///
    /// Only safe while `holder` owns the lease: no other agent can be
    /// replaying entries at that point.
    pub async fn release_claims(&self, holder: &str) -> Result<usize> {
        let user_id = self.user_id.as_str().to_string();
        let holder = holder.to_string();
        self.db
            .with_conn(move |conn| {
                Ok(conn.execute(
                    "UPDATE sync_operations SET in_flight = 0, claimed_by = NULL
                     WHERE user_id = ? AND in_flight = 1 AND claimed_by IS NOT ?",
                    params![user_id, holder],
                )?)
            })
            .await
    }

    /// Delete synced entries enqueued before `before` (Unix ms)
    pub async fn prune_synced(&self, before: i64) -> Result<usize> {
        let user_id = self.user_id.as_str().to_string();
        self.db
            .with_conn(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM sync_operations
                     WHERE user_id = ? AND status = 'synced' AND timestamp < ?",
                    params![user_id, before],
                )?)
            })
            .await
    }

    /// Take or renew the single-agent lease for this user's queue.
    ///
    /// Granted when the lease is free, expired, or already held by `holder`.
    pub async fn try_acquire_lease(&self, holder: &str, ttl: Duration) -> Result<LeaseGrant> {
        let name = self.lease_name();
        let holder = holder.to_string();
        let now = self.clock.now_millis();
        let expires_at =
            now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX));
        self.db
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                let current = tx
                    .query_row(
                        "SELECT holder, expires_at FROM sync_lease WHERE name = ?",
                        params![name],
                        |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
                    )
                    .optional()?;

                let grant = match current {
                    Some((current, current_expiry)) if current_expiry > now => {
                        if current == holder {
                            LeaseGrant::Renewed
                        } else {
                            LeaseGrant::Denied
                        }
                    }
                    _ => LeaseGrant::Acquired,
                };
                if grant.is_granted() {
                    tx.execute(
                        "INSERT INTO sync_lease (name, holder, expires_at) VALUES (?, ?, ?)
                         ON CONFLICT(name) DO UPDATE
                         SET holder = excluded.holder, expires_at = excluded.expires_at",
                        params![name, holder, expires_at],
                    )?;
                }
                tx.commit()?;
                Ok(grant)
            })
            .await
    }

    /// Give up the lease if `holder` owns it
    pub async fn release_lease(&self, holder: &str) -> Result<()> {
        let name = self.lease_name();
        let holder = holder.to_string();
        self.db
            .with_conn(move |conn| {
                conn.execute(
                    "DELETE FROM sync_lease WHERE name = ? AND holder = ?",
                    params![name, holder],
                )?;
                Ok(())
            })
            .await
    }

    fn lease_name(&self) -> String {
        format!("sync-agent:{}", self.user_id)
    }
}
