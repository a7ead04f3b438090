//! System tray icon and menu using D-Bus StatusNotifierItem.
//!
//! Uses the ksni crate for cross-desktop tray support (KDE, GNOME with extensions, etc.)
//! without requiring GTK dependencies. Other platforms run without a tray.

use crate::backend::BackendState;
use crate::daemon::LifecycleState;
use crate::events::StatusEvent;
use thiserror::Error;

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "linux")]
pub use linux::TrayManager;

#[derive(Error, Debug)]
pub enum TrayError {
    #[error("System tray not supported on this platform")]
    NotSupported,

    #[error("D-Bus error: {0}")]
    DBus(String),
}

/// Check if system tray is likely to be supported
pub fn is_tray_supported() -> bool {
    #[cfg(target_os = "linux")]
    {
        std::env::var("DBUS_SESSION_BUS_ADDRESS").is_ok()
    }

    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

/// What the tray shows, folded from status events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrayStatus {
    pub lifecycle: LifecycleState,
    pub backend: BackendState,
}

impl Default for TrayStatus {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleState::Booting,
            backend: BackendState::Unvalidated,
        }
    }
}

impl TrayStatus {
    /// Whether the event changes anything in the icon or the menu.
    pub fn affects(event: &StatusEvent) -> bool {
        matches!(
            event,
            StatusEvent::Lifecycle(_)
                | StatusEvent::Backend(_)
                | StatusEvent::MonitoringChanged(_)
                | StatusEvent::NotificationsChanged(_)
                | StatusEvent::AutoPasteChanged(_)
        )
    }

    pub fn apply(&mut self, event: &StatusEvent) {
        match *event {
            StatusEvent::Lifecycle(state) => self.lifecycle = state,
            StatusEvent::Backend(state) => self.backend = state,
            // Toggles are read from the flags on render
            _ => {}
        }
    }

    pub fn line(&self) -> String {
        status_line(self.lifecycle, self.backend)
    }
}

/// Text of the disabled status item at the top of the menu.
pub fn status_line(lifecycle: LifecycleState, backend: BackendState) -> String {
    let detail = match (lifecycle, backend) {
        (LifecycleState::Running, _) => "Ready",
        (LifecycleState::ShuttingDown | LifecycleState::Terminated, _) => "Shutting down...",
        (_, BackendState::AwaitingDownload) => "Downloading Ollama...",
        (_, BackendState::ModelPulling) => "Pulling model...",
        (_, BackendState::Failed) => "Error",
        _ => "Starting...",
    };
    format!("Status: {}", detail)
}

/// Freedesktop icon name for the current state.
pub fn icon_name(lifecycle: LifecycleState, monitoring: bool) -> &'static str {
    match lifecycle {
        LifecycleState::Running if monitoring => "edit-paste",
        LifecycleState::Running => "media-playback-pause",
        LifecycleState::ShuttingDown | LifecycleState::Terminated => "process-stop",
        _ => "view-refresh",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ===================
    // Status Line Tests
    // ===================

    #[test]
    fn test_status_line_running() {
        assert_eq!(
            status_line(LifecycleState::Running, BackendState::ModelReady),
            "Status: Ready"
        );
    }

    #[test]
    fn test_status_line_during_init() {
        assert_eq!(
            status_line(LifecycleState::Initializing, BackendState::ModelPulling),
            "Status: Pulling model..."
        );
        assert_eq!(
            status_line(LifecycleState::Initializing, BackendState::AwaitingDownload),
            "Status: Downloading Ollama..."
        );
        assert_eq!(
            status_line(LifecycleState::Booting, BackendState::Unvalidated),
            "Status: Starting..."
        );
    }

    #[test]
    fn test_status_line_shutdown() {
        assert_eq!(
            status_line(LifecycleState::ShuttingDown, BackendState::ModelReady),
            "Status: Shutting down..."
        );
    }

    // ===================
    // TrayStatus Tests
    // ===================

    #[test]
    fn test_tray_status_follows_initialization() {
        let mut status = TrayStatus::default();
        assert_eq!(status.line(), "Status: Starting...");

        status.apply(&StatusEvent::Lifecycle(LifecycleState::Initializing));
        status.apply(&StatusEvent::Backend(BackendState::AwaitingDownload));
        assert_eq!(status.line(), "Status: Downloading Ollama...");

        status.apply(&StatusEvent::Backend(BackendState::ModelPulling));
        assert_eq!(status.line(), "Status: Pulling model...");

        status.apply(&StatusEvent::Backend(BackendState::Failed));
        assert_eq!(status.line(), "Status: Error");

        status.apply(&StatusEvent::Lifecycle(LifecycleState::ShuttingDown));
        assert_eq!(status.line(), "Status: Shutting down...");
    }

    #[test]
    fn test_tray_status_ignores_progress_events() {
        assert!(!TrayStatus::affects(&StatusEvent::DownloadProgress(40)));
        assert!(!TrayStatus::affects(&StatusEvent::ClipboardImproved { chars: 3 }));
        assert!(TrayStatus::affects(&StatusEvent::Backend(BackendState::ModelPulling)));
        assert!(TrayStatus::affects(&StatusEvent::MonitoringChanged(false)));

        let mut status = TrayStatus::default();
        status.apply(&StatusEvent::DownloadProgress(40));
        assert_eq!(status, TrayStatus::default());
    }

    #[test]
    fn test_icon_follows_monitoring() {
        assert_eq!(icon_name(LifecycleState::Running, true), "edit-paste");
        assert_eq!(
            icon_name(LifecycleState::Running, false),
            "media-playback-pause"
        );
        assert_eq!(icon_name(LifecycleState::Initializing, true), "view-refresh");
    }

    // ===================
    // TrayError Tests
    // ===================

    #[test]
    fn test_tray_error_display() {
        let err = TrayError::NotSupported;
        assert!(err.to_string().contains("not supported"));

        let err = TrayError::DBus("test".into());
        assert!(err.to_string().contains("D-Bus error"));
    }
}
