//! Translates platform online/visibility signals into sync triggers.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;

const TRIGGER_CHANNEL_CAPACITY: usize = 16;

/// Why a drain pass was requested outside the periodic timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// The platform went from offline to online
    ConnectivityRestored,
    /// The client became visible again while online
    BecameVisible,
}

/// Holds the last-known online flag and fans triggers out to subscribers.
#[derive(Debug)]
pub struct ConnectivityObserver {
    online: AtomicBool,
    triggers: broadcast::Sender<SyncTrigger>,
}

impl Default for ConnectivityObserver {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectivityObserver {
    pub fn new(initially_online: bool) -> Self {
        let (triggers, _) = broadcast::channel(TRIGGER_CHANNEL_CAPACITY);
        Self {
            online: AtomicBool::new(initially_online),
            triggers,
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Record a network signal. Fires only on an offline → online transition.
    pub fn set_online(&self, online: bool) -> Option<SyncTrigger> {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        match (was_online, online) {
            (false, true) => {
                tracing::info!("Connectivity restored");
                Some(self.emit(SyncTrigger::ConnectivityRestored))
            }
            (true, false) => {
                tracing::info!("Connectivity lost");
                None
            }
            _ => None,
        }
    }

    /// Record a visibility signal. Fires when becoming visible while online.
    pub fn set_visible(&self, visible: bool) -> Option<SyncTrigger> {
        (visible && self.is_online()).then(|| self.emit(SyncTrigger::BecameVisible))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncTrigger> {
        self.triggers.subscribe()
    }

    fn emit(&self, trigger: SyncTrigger) -> SyncTrigger {
        // No subscribers is fine: nothing is driving sync yet
        let _ = self.triggers.send(trigger);
        trigger
    }
}
