//! Status events published for whatever presentation layer is attached.
//!
//! The core never renders anything itself. It publishes plain events on a
//! broadcast channel; the console logger and the tray subscribe to it.

use tokio::sync::broadcast;

use crate::backend::BackendState;
use crate::daemon::LifecycleState;

/// Events published by the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Lifecycle(LifecycleState),
    Backend(BackendState),
    /// Emitted every second while a model pull is running
    PullInProgress { model: String, elapsed_secs: u64 },
    DownloadProgress(u8),
    DownloadFinished,
    DownloadFailed(String),
    ClipboardImproved { chars: usize },
    MonitoringChanged(bool),
    NotificationsChanged(bool),
    AutoPasteChanged(bool),
}

/// Cloneable handle to the broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StatusEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: StatusEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }
}
