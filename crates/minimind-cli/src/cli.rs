use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use minimind_core::TableName;

#[derive(Parser)]
#[command(name = "minimind")]
#[command(about = "Offline-first boards, tasks and notes with background sync")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to sync settings JSON
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// User whose data to work on (defaults to MINIMIND_USER_ID)
    #[arg(long, global = true, value_name = "ID")]
    pub user: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a record from a JSON draft (reads stdin when omitted)
    #[command(alias = "new")]
    Create {
        #[arg(value_enum)]
        table: TableArg,
        /// Draft fields as JSON, e.g. '{"titleEncrypted":"..."}'
        json: Option<String>,
    },
    /// Merge JSON fields into an existing record
    Update {
        #[arg(value_enum)]
        table: TableArg,
        /// Record ID
        id: String,
        /// Fields to change as JSON; null clears optional fields
        json: Option<String>,
    },
    /// Delete a record locally and queue the remote delete
    Delete {
        #[arg(value_enum)]
        table: TableArg,
        /// Record ID
        id: String,
    },
    /// List records
    List {
        #[arg(value_enum)]
        table: TableArg,
        /// Only children of this board (lists) or list (cards)
        #[arg(long, value_name = "ID")]
        parent: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect the mutation queue
    Queue {
        #[command(subcommand)]
        command: Option<QueueCommands>,
        /// Show abandoned operations instead of pending ones
        #[arg(long)]
        failed: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the aggregate sync status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run one sync pass and wait for its retries to settle
    Sync,
    /// Run the sync agent until interrupted
    Watch,
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// Delete synced operations older than the given age
    Prune {
        #[arg(long, value_name = "DAYS")]
        older_than_days: u32,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum TableArg {
    Boards,
    Lists,
    Cards,
    Tasks,
    Notes,
}

impl From<TableArg> for TableName {
    fn from(table: TableArg) -> Self {
        match table {
            TableArg::Boards => Self::Boards,
            TableArg::Lists => Self::Lists,
            TableArg::Cards => Self::Cards,
            TableArg::Tasks => Self::Tasks,
            TableArg::Notes => Self::Notes,
        }
    }
}
