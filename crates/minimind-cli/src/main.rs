//! Minimind CLI - local-first boards, tasks and notes from the terminal
//!
//! Every command works against the local store; `sync` and `watch` replay
//! the queued mutations against the remote API.

mod cli;
mod commands;
mod error;
#[cfg(test)]
mod tests;

use clap::Parser;

use crate::cli::{Cli, Commands, QueueCommands};
use crate::commands::common::{
    load_cli_settings, resolve_config_path, resolve_db_path, resolve_user_id, AppContext,
};
use crate::commands::queue::{run_prune, run_queue};
use crate::commands::records::{run_create, run_delete, run_list, run_update};
use crate::commands::status::run_status;
use crate::commands::sync::{run_sync, run_watch};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("minimind=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);
    let settings = load_cli_settings(&resolve_config_path(cli.config))?;
    let user_id = resolve_user_id(cli.user)?;
    let ctx = AppContext::open(&db_path, settings, user_id)?;

    match cli.command {
        Commands::Create { table, json } => run_create(&ctx, table.into(), json).await?,
        Commands::Update { table, id, json } => {
            run_update(&ctx, table.into(), &id, json).await?;
        }
        Commands::Delete { table, id } => run_delete(&ctx, table.into(), &id).await?,
        Commands::List {
            table,
            parent,
            json,
        } => run_list(&ctx, table.into(), parent.as_deref(), json).await?,
        Commands::Queue {
            command: Some(QueueCommands::Prune { older_than_days }),
            ..
        } => run_prune(&ctx, older_than_days).await?,
        Commands::Queue {
            command: None,
            failed,
            json,
        } => run_queue(&ctx, failed, json).await?,
        Commands::Status { json } => run_status(&ctx, json).await?,
        Commands::Sync => run_sync(&ctx).await?,
        Commands::Watch => run_watch(&ctx).await?,
    }

    Ok(())
}
