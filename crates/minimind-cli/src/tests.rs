use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use minimind_core::models::{Board, List, OperationKind, OperationStatus, Task};
use minimind_core::sync::{
    ConnectivityObserver, RemoteApi, RemoteError, RemoteRequest, RemoteResult, SyncManager,
};
use minimind_core::{ManualClock, SyncSettings, SyncState, SyncStatus, TableName, UserId};

use crate::cli::TableArg;
use crate::commands::common::{
    format_relative_time, format_sync_timestamp, normalize_payload, parse_record_id,
    resolve_user_id, AppContext,
};
use crate::commands::queue::{format_operation_lines, prune_queue};
use crate::commands::records::{create_record, format_record_lines, list_records, update_record};
use crate::commands::status::load_status;
use crate::commands::sync::{build_manager, sync_until_settled};
use crate::error::CliError;

#[test]
fn normalize_payload_trims_and_rejects_empty() {
    assert_eq!(normalize_payload("  {} "), Some("{}".to_string()));
    assert_eq!(normalize_payload(" \n\t "), None);
}

#[test]
fn parse_record_id_validates_input() {
    assert!(matches!(parse_record_id("  "), Err(CliError::EmptyRecordId)));
    assert!(matches!(
        parse_record_id("not-a-uuid"),
        Err(CliError::InvalidRecordId(_))
    ));
    assert!(parse_record_id(" 0190c5a4-8f9e-7c3a-9b1d-2e4f6a8b0c1d ").is_ok());
}

#[test]
fn resolve_user_id_prefers_flag_and_rejects_blank() {
    assert_eq!(
        resolve_user_id(Some(" u-42 ".to_string())).unwrap().as_str(),
        "u-42"
    );
    assert!(matches!(
        resolve_user_id(Some("   ".to_string())),
        Err(CliError::MissingUser)
    ));
}

#[test]
fn table_arg_maps_to_table_name() {
    assert_eq!(TableName::from(TableArg::Cards), TableName::Cards);
    assert_eq!(TableName::from(TableArg::Notes), TableName::Notes);
}

#[test]
fn format_relative_time_units() {
    let now = 10_000_000;
    assert_eq!(format_relative_time(now - 30_000, now), "just now");
    assert_eq!(format_relative_time(now - 120_000, now), "2m ago");
    assert_eq!(format_relative_time(now - 2 * 60 * 60_000, now), "2h ago");
}

#[test]
fn format_sync_timestamp_renders_utc() {
    assert_eq!(format_sync_timestamp(0), "1970-01-01 00:00:00 UTC");
}

#[tokio::test(flavor = "current_thread")]
async fn create_update_and_list_records() {
    let db_path = unique_test_db_path();
    let ctx = test_context(&db_path, SyncSettings::default());

    let task: Task = create_record(&ctx.store, r#"{"titleEncrypted":"enc:milk","priority":1}"#)
        .await
        .unwrap();
    assert_eq!(task.meta.sync_status, SyncStatus::Pending);

    let updated: Task = update_record(&ctx.store, &task.meta.id, r#"{"completed":true}"#)
        .await
        .unwrap();
    assert!(updated.completed);
    assert_eq!(updated.priority, 1);

    let items = list_records(&ctx, TableName::Tasks, None).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].label, "enc:milk");
    let lines = format_record_lines(&items);
    assert!(lines[0].contains("pending"));
    assert!(lines[0].contains("enc:milk"));

    let operations = ctx.queue.pending().await.unwrap();
    assert_eq!(operations.len(), 2);
    assert_eq!(operations[1].operation, OperationKind::Update);
    assert!(format_operation_lines(&operations)[0].contains("create"));

    cleanup_db_files(&db_path);
}

#[tokio::test(flavor = "current_thread")]
async fn invalid_payload_is_rejected_without_queueing() {
    let db_path = unique_test_db_path();
    let ctx = test_context(&db_path, SyncSettings::default());

    let result = create_record::<Board>(&ctx.store, r#"{"title":"wrong field"}"#).await;
    assert!(matches!(
        result,
        Err(CliError::InvalidPayload {
            table: TableName::Boards,
            ..
        })
    ));
    assert!(ctx.queue.pending().await.unwrap().is_empty());

    cleanup_db_files(&db_path);
}

#[tokio::test(flavor = "current_thread")]
async fn list_by_parent_only_for_child_tables() {
    let db_path = unique_test_db_path();
    let ctx = test_context(&db_path, SyncSettings::default());

    let board: Board = create_record(&ctx.store, r#"{"nameEncrypted":"enc:board"}"#)
        .await
        .unwrap();
    let payload = format!(
        r#"{{"boardId":"{}","nameEncrypted":"enc:todo"}}"#,
        board.meta.id
    );
    let list: List = create_record(&ctx.store, &payload).await.unwrap();

    let children = list_records(&ctx, TableName::Lists, Some(&board.meta.id))
        .await
        .unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id, list.meta.id.to_string());

    let error = list_records(&ctx, TableName::Tasks, Some(&board.meta.id))
        .await
        .unwrap_err();
    assert!(matches!(error, CliError::NoParent(TableName::Tasks)));

    cleanup_db_files(&db_path);
}

#[tokio::test(flavor = "current_thread")]
async fn prune_removes_old_synced_operations_only() {
    let db_path = unique_test_db_path();
    let clock = Arc::new(ManualClock::new(1_000));
    let ctx = test_context_with_clock(&db_path, SyncSettings::default(), clock.clone());

    create_record::<Task>(&ctx.store, r#"{"titleEncrypted":"enc:a"}"#)
        .await
        .unwrap();
    create_record::<Task>(&ctx.store, r#"{"titleEncrypted":"enc:b"}"#)
        .await
        .unwrap();
    let first = ctx.queue.pending().await.unwrap().remove(0);
    ctx.queue.mark_synced(&first.id).await.unwrap();

    clock.advance(2 * 86_400_000);
    assert_eq!(prune_queue(&ctx, 3).await.unwrap(), 0);
    assert_eq!(prune_queue(&ctx, 1).await.unwrap(), 1);
    assert_eq!(ctx.queue.count(OperationStatus::Pending).await.unwrap(), 1);

    cleanup_db_files(&db_path);
}

#[tokio::test(flavor = "current_thread")]
async fn status_reports_pending_work() {
    let db_path = unique_test_db_path();
    let clock = Arc::new(ManualClock::new(5_000));
    let ctx = test_context_with_clock(&db_path, SyncSettings::default(), clock);

    let empty = load_status(&ctx).await.unwrap();
    assert_eq!(empty.state(), SyncState::Synced);

    create_record::<Task>(&ctx.store, r#"{"titleEncrypted":"enc:a"}"#)
        .await
        .unwrap();
    let status = load_status(&ctx).await.unwrap();
    assert_eq!(status.pending_operations, 1);
    assert_eq!(status.last_sync_at, Some(5_000));
    assert_eq!(status.state(), SyncState::Syncing);

    cleanup_db_files(&db_path);
}

#[tokio::test(flavor = "current_thread")]
async fn build_manager_requires_api_url() {
    let db_path = unique_test_db_path();
    let ctx = test_context(&db_path, SyncSettings::default());

    assert!(matches!(
        build_manager(&ctx),
        Err(CliError::SyncNotConfigured)
    ));

    let configured = test_context(
        &db_path,
        SyncSettings {
            api_base_url: Some("http://127.0.0.1:9".to_string()),
            ..SyncSettings::default()
        },
    );
    assert!(build_manager(&configured).is_ok());

    cleanup_db_files(&db_path);
}

/// Fails the first `failures` calls with HTTP 503, then succeeds
#[derive(Clone, Default)]
struct FlakyRemote {
    failures: usize,
    calls: Arc<AtomicUsize>,
}

impl RemoteApi for FlakyRemote {
    async fn send(&self, _request: RemoteRequest) -> RemoteResult<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(RemoteError::Rejected {
                status: 503,
                message: "HTTP 503".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[tokio::test(flavor = "current_thread")]
async fn sync_until_settled_waits_for_retries() {
    let db_path = unique_test_db_path();
    let settings = SyncSettings {
        retry_delay_ms: 20,
        ..SyncSettings::default()
    };
    let ctx = test_context(&db_path, settings.clone());
    create_record::<Task>(&ctx.store, r#"{"titleEncrypted":"enc:a"}"#)
        .await
        .unwrap();

    let remote = FlakyRemote {
        failures: 2,
        ..FlakyRemote::default()
    };
    let manager = build_test_manager(&ctx, remote.clone(), settings);

    let report = sync_until_settled(
        &manager,
        &ctx.queue,
        Duration::from_millis(10),
        Duration::from_secs(5),
    )
    .await
    .unwrap();
    manager.destroy().await;

    assert_eq!(report.retried, 1);
    assert_eq!(remote.calls.load(Ordering::SeqCst), 3);
    assert!(ctx.queue.pending().await.unwrap().is_empty());
    let tasks = list_records(&ctx, TableName::Tasks, None).await.unwrap();
    assert_eq!(tasks[0].sync_status, SyncStatus::Synced);

    cleanup_db_files(&db_path);
}

#[tokio::test(flavor = "current_thread")]
async fn sync_recovers_entry_left_claimed_by_killed_process() {
    let db_path = unique_test_db_path();
    let settings = SyncSettings {
        retry_delay_ms: 20,
        ..SyncSettings::default()
    };
    let ctx = AppContext::open(&db_path, settings.clone(), UserId::new("cli-user").unwrap())
        .unwrap();
    create_record::<Task>(&ctx.store, r#"{"titleEncrypted":"enc:a"}"#)
        .await
        .unwrap();

    // A previous process failed once, then died while retrying
    let operation = ctx.queue.pending().await.unwrap().remove(0);
    ctx.queue.mark_failed(&operation.id, 1).await.unwrap();
    assert!(ctx.queue.claim(&operation.id, "agent-killed").await.unwrap());

    let remote = FlakyRemote::default();
    let manager = build_test_manager(&ctx, remote.clone(), settings);
    let result = tokio::time::timeout(
        Duration::from_secs(3),
        sync_until_settled(
            &manager,
            &ctx.queue,
            Duration::from_millis(10),
            Duration::from_secs(2),
        ),
    )
    .await;
    manager.destroy().await;

    assert!(result.is_ok(), "sync did not settle");
    assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    let stored = ctx.queue.get(&operation.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OperationStatus::Synced);

    cleanup_db_files(&db_path);
}

#[tokio::test(flavor = "current_thread")]
async fn sync_stops_waiting_at_deadline() {
    let db_path = unique_test_db_path();
    // The manual clock never reaches the backoff, so the entry never becomes due
    let ctx = test_context(&db_path, SyncSettings::default());
    create_record::<Task>(&ctx.store, r#"{"titleEncrypted":"enc:a"}"#)
        .await
        .unwrap();
    let operation = ctx.queue.pending().await.unwrap().remove(0);
    ctx.queue.mark_failed(&operation.id, 1).await.unwrap();

    let remote = FlakyRemote::default();
    let manager = build_test_manager(&ctx, remote.clone(), SyncSettings::default());
    let result = tokio::time::timeout(
        Duration::from_secs(3),
        sync_until_settled(
            &manager,
            &ctx.queue,
            Duration::from_millis(10),
            Duration::from_millis(100),
        ),
    )
    .await;
    manager.destroy().await;

    let report = result.expect("deadline not honored").unwrap();
    assert_eq!(report.attempted, 0);
    assert_eq!(remote.calls.load(Ordering::SeqCst), 0);
    assert_eq!(ctx.queue.pending_count().await.unwrap(), 1);

    cleanup_db_files(&db_path);
}

fn build_test_manager(
    ctx: &AppContext,
    remote: FlakyRemote,
    settings: SyncSettings,
) -> SyncManager<FlakyRemote> {
    SyncManager::new(
        ctx.store.clone(),
        ctx.queue.clone(),
        remote,
        Arc::new(ConnectivityObserver::default()),
        settings,
    )
}

fn test_context(db_path: &PathBuf, settings: SyncSettings) -> AppContext {
    test_context_with_clock(db_path, settings, Arc::new(ManualClock::new(1_000)))
}

fn test_context_with_clock(
    db_path: &PathBuf,
    settings: SyncSettings,
    clock: Arc<ManualClock>,
) -> AppContext {
    AppContext::with_clock(db_path, settings, UserId::new("cli-user").unwrap(), clock).unwrap()
}

fn unique_test_db_path() -> PathBuf {
    static NEXT_TEST_DB_ID: AtomicU64 = AtomicU64::new(0);

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    let sequence = NEXT_TEST_DB_ID.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("minimind-cli-test-{timestamp}-{sequence}.db"))
}

fn cleanup_db_files(path: &PathBuf) {
    let _ = std::fs::remove_file(path);
    let _ = std::fs::remove_file(path.with_extension("db-shm"));
    let _ = std::fs::remove_file(path.with_extension("db-wal"));
}
