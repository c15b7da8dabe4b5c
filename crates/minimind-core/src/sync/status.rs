//! Read-only sync status view for clients.

use serde::Serialize;

use crate::models::SyncOperation;
use crate::state::SyncState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusSnapshot {
    pub is_online: bool,
    pub is_syncing: bool,
    pub pending_operations: usize,
    pub failed_operations: usize,
    /// Newest pending enqueue time, approximating the latest unsynced activity
    pub last_sync_at: Option<i64>,
}

impl SyncStatusSnapshot {
    /// Build the view from a snapshot of the pending queue entries
    pub fn project(
        is_online: bool,
        is_syncing: bool,
        pending: &[SyncOperation],
        failed_operations: usize,
    ) -> Self {
        Self {
            is_online,
            is_syncing,
            pending_operations: pending.len(),
            failed_operations,
            last_sync_at: pending.iter().map(|operation| operation.timestamp).max(),
        }
    }

    pub const fn state(&self) -> SyncState {
        if !self.is_online {
            SyncState::Offline
        } else if self.is_syncing || self.pending_operations > 0 {
            SyncState::Syncing
        } else if self.failed_operations > 0 {
            SyncState::Error
        } else {
            SyncState::Synced
        }
    }
}
