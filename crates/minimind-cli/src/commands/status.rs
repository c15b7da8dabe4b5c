use minimind_core::models::OperationStatus;
use minimind_core::sync::SyncStatusSnapshot;

use crate::commands::common::{format_sync_timestamp, AppContext};
use crate::error::CliError;

/// Status projection as seen from a process that is not draining the queue
pub async fn load_status(ctx: &AppContext) -> Result<SyncStatusSnapshot, CliError> {
    let pending = ctx.queue.pending().await?;
    let failed = ctx.queue.count(OperationStatus::Failed).await?;
    Ok(SyncStatusSnapshot::project(true, false, &pending, failed))
}

pub fn format_status_lines(status: &SyncStatusSnapshot) -> Vec<String> {
    vec![
        format!("State:      {}", status.state()),
        format!("Pending:    {}", status.pending_operations),
        format!("Failed:     {}", status.failed_operations),
        format!(
            "Newest:     {}",
            status
                .last_sync_at
                .map_or_else(|| "-".to_string(), format_sync_timestamp)
        ),
    ]
}

pub async fn run_status(ctx: &AppContext, as_json: bool) -> Result<(), CliError> {
    let status = load_status(ctx).await?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        for line in format_status_lines(&status) {
            println!("{line}");
        }
    }
    Ok(())
}
