use std::sync::Arc;
use std::time::Duration;

use minimind_core::sync::{
    ConnectivityObserver, DrainReport, HttpRemoteApi, RemoteApi, SkipReason, SyncManager,
};
use minimind_core::MutationQueue;

use crate::commands::common::AppContext;
use crate::commands::status::{format_status_lines, load_status};
use crate::error::CliError;

const SETTLE_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Slack on top of the retry window for the remote calls themselves
const SETTLE_GRACE: Duration = Duration::from_secs(30);

pub fn build_manager(ctx: &AppContext) -> Result<SyncManager<HttpRemoteApi>, CliError> {
    if ctx.settings.api_base_url.is_none() {
        return Err(CliError::SyncNotConfigured);
    }
    let remote = HttpRemoteApi::from_settings(&ctx.settings)?;
    Ok(SyncManager::new(
        ctx.store.clone(),
        ctx.queue.clone(),
        remote,
        Arc::new(ConnectivityObserver::default()),
        ctx.settings.clone(),
    ))
}

/// How long `sync` waits for retries before leaving them to the next run
pub fn settle_deadline(ctx: &AppContext) -> Duration {
    ctx.settings
        .retry_policy()
        .retry_window()
        .saturating_add(SETTLE_GRACE)
}

/// Run a pass, then keep the agent alive until no failed entry is waiting
/// for a retry or `deadline` passes. Returns the report of the first pass.
pub async fn sync_until_settled<R: RemoteApi>(
    manager: &SyncManager<R>,
    queue: &MutationQueue,
    poll_interval: Duration,
    deadline: Duration,
) -> Result<DrainReport, CliError> {
    let give_up_at = tokio::time::Instant::now() + deadline;
    let report = manager.force_sync().await?;
    if report.skipped_reason.is_some() {
        return Ok(report);
    }

    loop {
        let waiting = queue
            .pending()
            .await?
            .iter()
            .filter(|operation| operation.retry_count > 0)
            .count();
        if waiting == 0 {
            break;
        }

        if tokio::time::Instant::now() >= give_up_at {
            tracing::warn!(
                "{waiting} operations still awaiting retry; leaving them for the next sync"
            );
            break;
        }

        tracing::info!("Waiting for {waiting} operations to retry");
        tokio::time::sleep(poll_interval).await;
        // Picks up entries whose retry timer belonged to an earlier process
        if let Some(reason) = manager.force_sync().await?.skipped_reason {
            tracing::warn!("Stopped waiting for retries: {reason:?}");
            break;
        }
    }

    Ok(report)
}

pub async fn run_sync(ctx: &AppContext) -> Result<(), CliError> {
    let manager = build_manager(ctx)?;
    let result = sync_until_settled(
        &manager,
        &ctx.queue,
        SETTLE_POLL_INTERVAL,
        settle_deadline(ctx),
    )
    .await;
    manager.destroy().await;
    let report = result?;

    match report.skipped_reason {
        Some(SkipReason::LeaseHeld) => {
            println!("Another sync agent is active for this user; nothing to do.");
            return Ok(());
        }
        Some(reason) => {
            println!("Sync skipped: {reason:?}");
            return Ok(());
        }
        None => {}
    }

    println!(
        "Sync pass: {} synced, {} retried, {} failed",
        report.synced, report.retried, report.failed
    );
    for line in format_status_lines(&load_status(ctx).await?) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_watch(ctx: &AppContext) -> Result<(), CliError> {
    let manager = build_manager(ctx)?;
    manager.start().await?;
    println!("Sync agent running. Press Ctrl-C to stop.");

    tokio::signal::ctrl_c().await?;
    manager.destroy().await;
    println!("Sync agent stopped");
    Ok(())
}
