//! Wake-up signals for the synchronizer
//!
//! Producers, the transport and the synchronizer itself run in different
//! tasks. They never call each other; they raise a flag here and wake the
//! synchronizer, which consumes the flags at the start of its next tick.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Flags consumed by the synchronizer
#[derive(Debug, Default)]
pub struct SyncSignals {
    notify: Notify,
    discovery_changed: AtomicBool,
    resync_requested: AtomicBool,
    deletion_occurred: AtomicBool,
}

/// Flags taken at the start of a synchronizer tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingSignals {
    pub discovery_changed: bool,
    pub resync_requested: bool,
    pub deletion_occurred: bool,
}

impl PendingSignals {
    /// A full reconciliation pass is required right away
    pub fn forces_full_pass(&self) -> bool {
        self.resync_requested || self.deletion_occurred || self.discovery_changed
    }
}

impl SyncSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Local service or container discovery changed
    pub fn notify_discovery_changed(&self) {
        self.discovery_changed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    /// The platform asked for a full resynchronization
    pub fn request_resync(&self) {
        self.resync_requested.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    /// An entity was deleted; the next pass must re-read the registry
    pub fn note_deletion(&self) {
        self.deletion_occurred.store(true, Ordering::Release);
    }

    /// Take and clear all flags
    pub fn take(&self) -> PendingSignals {
        PendingSignals {
            discovery_changed: self.discovery_changed.swap(false, Ordering::AcqRel),
            resync_requested: self.resync_requested.swap(false, Ordering::AcqRel),
            deletion_occurred: self.deletion_occurred.swap(false, Ordering::AcqRel),
        }
    }

    /// Wait until a producer or the transport wakes the synchronizer
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}
