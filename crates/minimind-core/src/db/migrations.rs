//! Database migrations

use crate::error::Result;
use rusqlite::{params, Connection};

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        apply(conn, 1, &MIGRATION_V1)?;
    }
    if version < 2 {
        apply(conn, 2, &MIGRATION_V2)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Apply one migration atomically and record its version
fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    for stmt in statements {
        tx.execute_batch(stmt)?;
    }
    tx.execute(
        "INSERT INTO schema_version (version) VALUES (?)",
        params![version],
    )?;
    tx.commit()?;

    tracing::info!("Migrated database to version {version} (latest {CURRENT_VERSION})");
    Ok(())
}

/// Migration to version 1: record tables and the mutation queue
const MIGRATION_V1: [&str; 15] = [
    // Schema version tracking
    "CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    )",
    // Parent links are plain columns: offline creates may arrive child-first
    "CREATE TABLE IF NOT EXISTS boards (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        sync_status TEXT NOT NULL DEFAULT 'pending',
        last_sync_at INTEGER,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        name_encrypted TEXT NOT NULL,
        description_encrypted TEXT,
        position INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_boards_user ON boards(user_id, position)",
    "CREATE TABLE IF NOT EXISTS lists (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        sync_status TEXT NOT NULL DEFAULT 'pending',
        last_sync_at INTEGER,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        board_id TEXT NOT NULL,
        name_encrypted TEXT NOT NULL,
        position INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_lists_board ON lists(user_id, board_id, position)",
    "CREATE TABLE IF NOT EXISTS cards (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        sync_status TEXT NOT NULL DEFAULT 'pending',
        last_sync_at INTEGER,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        list_id TEXT NOT NULL,
        title_encrypted TEXT NOT NULL,
        description_encrypted TEXT,
        position INTEGER NOT NULL DEFAULT 0,
        due_date INTEGER
    )",
    "CREATE INDEX IF NOT EXISTS idx_cards_list ON cards(user_id, list_id, position)",
    "CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        sync_status TEXT NOT NULL DEFAULT 'pending',
        last_sync_at INTEGER,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        title_encrypted TEXT NOT NULL,
        description_encrypted TEXT,
        completed INTEGER NOT NULL DEFAULT 0,
        priority INTEGER NOT NULL DEFAULT 0,
        due_date INTEGER
    )",
    "CREATE INDEX IF NOT EXISTS idx_tasks_user ON tasks(user_id, completed, priority)",
    "CREATE TABLE IF NOT EXISTS notes (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        sync_status TEXT NOT NULL DEFAULT 'pending',
        last_sync_at INTEGER,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        title_encrypted TEXT NOT NULL,
        content_encrypted TEXT NOT NULL,
        tags_encrypted TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_notes_user ON notes(user_id, updated_at DESC)",
    // Mutation queue
    "CREATE TABLE IF NOT EXISTS sync_operations (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        operation TEXT NOT NULL CHECK (operation IN ('create', 'update', 'delete')),
        table_name TEXT NOT NULL,
        record_id TEXT NOT NULL,
        data TEXT,
        timestamp INTEGER NOT NULL,
        retry_count INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'synced', 'failed'))
    )",
    "CREATE INDEX IF NOT EXISTS idx_sync_operations_pending
        ON sync_operations(user_id, status, timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_sync_operations_record
        ON sync_operations(table_name, record_id)",
    "CREATE INDEX IF NOT EXISTS idx_sync_operations_retry ON sync_operations(retry_count)",
];

/// Migration to version 2: in-flight claims, retry scheduling and the agent lease
const MIGRATION_V2: [&str; 5] = [
    "ALTER TABLE sync_operations ADD COLUMN in_flight INTEGER NOT NULL DEFAULT 0",
    "ALTER TABLE sync_operations ADD COLUMN claimed_by TEXT",
    "ALTER TABLE sync_operations ADD COLUMN next_attempt_at INTEGER",
    "CREATE TABLE IF NOT EXISTS sync_lease (
        name TEXT PRIMARY KEY,
        holder TEXT NOT NULL,
        expires_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_sync_operations_due
        ON sync_operations(status, next_attempt_at)",
];

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)",
            params![name],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_migrations() {
        let conn = setup();
        run(&conn).unwrap();

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_migrations_idempotent() {
        let conn = setup();
        run(&conn).unwrap();
        run(&conn).unwrap(); // Should not fail

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_creates_record_and_queue_tables() {
        let conn = setup();
        run(&conn).unwrap();

        for table in [
            "boards",
            "lists",
            "cards",
            "tasks",
            "notes",
            "sync_operations",
            "sync_lease",
        ] {
            assert!(table_exists(&conn, table), "missing table {table}");
        }
    }

    #[test]
    fn test_queue_rejects_unknown_status() {
        let conn = setup();
        run(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO sync_operations (id, user_id, operation, table_name, record_id, timestamp, status)
             VALUES ('op', 'u1', 'create', 'notes', 'r1', 1, 'stuck')",
            [],
        );
        assert!(result.is_err());
    }
}
