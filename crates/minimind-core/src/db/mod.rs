//! Database layer for Minimind

mod connection;
mod migrations;
mod queue;
mod store;

pub use connection::Database;
pub use queue::{LeaseGrant, MutationQueue, RetryPolicy};
pub use store::LocalStore;
