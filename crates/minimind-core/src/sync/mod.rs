//! Background synchronization: remote client, connectivity triggers, the
//! sync manager and the status projection.

mod connectivity;
mod manager;
mod remote;
mod status;

pub use connectivity::{ConnectivityObserver, SyncTrigger};
pub use manager::{DrainReport, OperationOutcome, SkipReason, SyncManager, SyncPhase};
pub use remote::{HttpRemoteApi, RemoteApi, RemoteError, RemoteRequest, RemoteResult};
pub use status::SyncStatusSnapshot;
