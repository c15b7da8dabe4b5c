//! minimind-core - Core library for Minimind
//!
//! This crate contains the record models, the local store with its mutation
//! queue, and the background sync engine that replays queued mutations
//! against the remote API. Clients (currently the CLI) compose these pieces
//! for one signed-in user.

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod state;
pub mod sync;
pub mod util;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SyncSettings;
pub use db::{Database, LocalStore, MutationQueue, RetryPolicy};
pub use error::{Error, Result};
pub use models::{RecordId, SyncOperation, SyncStatus, TableName, UserId};
pub use state::SyncState;
pub use sync::{ConnectivityObserver, HttpRemoteApi, SyncManager};
