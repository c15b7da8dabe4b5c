use minimind_core::{Clock, SyncOperation};

use crate::commands::common::{format_sync_timestamp, short_id, AppContext};
use crate::error::CliError;

const DAY_MS: i64 = 86_400_000;

pub fn format_operation_lines(operations: &[SyncOperation]) -> Vec<String> {
    operations
        .iter()
        .map(|operation| {
            format!(
                "{:<13}  {}  {:<6}  {:<6}  {:<13}  retries={}",
                short_id(&operation.id),
                format_sync_timestamp(operation.timestamp),
                operation.operation.as_str(),
                operation.table_name.as_str(),
                short_id(&operation.record_id),
                operation.retry_count
            )
        })
        .collect()
}

pub async fn run_queue(ctx: &AppContext, failed: bool, as_json: bool) -> Result<(), CliError> {
    let operations = if failed {
        ctx.queue.failed().await?
    } else {
        ctx.queue.pending().await?
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&operations)?);
        return Ok(());
    }

    if operations.is_empty() {
        println!(
            "No {} operations.",
            if failed { "failed" } else { "pending" }
        );
        return Ok(());
    }

    for line in format_operation_lines(&operations) {
        println!("{line}");
    }
    Ok(())
}

/// Delete synced entries enqueued more than `older_than_days` ago
pub async fn prune_queue(ctx: &AppContext, older_than_days: u32) -> Result<usize, CliError> {
    let cutoff = ctx
        .clock
        .now_millis()
        .saturating_sub(i64::from(older_than_days).saturating_mul(DAY_MS));
    Ok(ctx.queue.prune_synced(cutoff).await?)
}

pub async fn run_prune(ctx: &AppContext, older_than_days: u32) -> Result<(), CliError> {
    let pruned = prune_queue(ctx, older_than_days).await?;
    println!("Pruned {pruned} synced operations");
    Ok(())
}
