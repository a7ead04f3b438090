//! Desktop side effects: notification toasts and the completion sound.
//!
//! Both are fire-and-forget. Callers log failures and move on.

use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Audio error: {0}")]
    Audio(String),
}

/// Trait for platform-specific notifications
pub trait Notifier: Send + Sync {
    /// Show a notification
    fn notify(&self, title: &str, body: &str) -> Result<(), PlatformError>;
}

/// Trait for platform-specific audio feedback
pub trait AudioFeedback: Send + Sync {
    /// Sound played after the clipboard was rewritten
    fn play_done_sound(&self) -> Result<(), PlatformError>;
}

/// Detect the current display environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayServer {
    X11,
    Wayland,
    Windows,
    MacOS,
    Tty,
    Unknown,
}

impl DisplayServer {
    /// Detect the current display server
    pub fn detect() -> Self {
        #[cfg(target_os = "linux")]
        {
            if std::env::var("WAYLAND_DISPLAY").is_ok() {
                return DisplayServer::Wayland;
            }
            if std::env::var("DISPLAY").is_ok() {
                return DisplayServer::X11;
            }
            if std::env::var("TERM").is_ok() {
                return DisplayServer::Tty;
            }
            DisplayServer::Unknown
        }

        #[cfg(target_os = "macos")]
        {
            DisplayServer::MacOS
        }

        #[cfg(target_os = "windows")]
        {
            DisplayServer::Windows
        }

        #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
        {
            DisplayServer::Unknown
        }
    }

    pub fn is_graphical(self) -> bool {
        !matches!(self, DisplayServer::Tty | DisplayServer::Unknown)
    }
}

/// Toasts through the desktop notification service.
pub struct DesktopNotifier {
    display_server: DisplayServer,
}

impl DesktopNotifier {
    pub fn new() -> Self {
        Self {
            display_server: DisplayServer::detect(),
        }
    }
}

impl Default for DesktopNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, title: &str, body: &str) -> Result<(), PlatformError> {
        if !self.display_server.is_graphical() {
            debug!("No display, dropping notification: {}", title);
            return Ok(());
        }

        notify_rust::Notification::new()
            .summary(title)
            .body(body)
            .appname("oclip")
            .show()
            .map_err(|e| PlatformError::Notification(e.to_string()))?;

        Ok(())
    }
}

/// Terminal bell.
#[derive(Debug, Default, Clone, Copy)]
pub struct BellFeedback;

impl AudioFeedback for BellFeedback {
    fn play_done_sound(&self) -> Result<(), PlatformError> {
        use std::io::Write;

        let mut stdout = std::io::stdout();
        stdout
            .write_all(b"\x07")
            .and_then(|_| stdout.flush())
            .map_err(|e| PlatformError::Audio(e.to_string()))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    // ===================
    // DisplayServer Tests
    // ===================

    #[test]
    fn test_display_server_graphical() {
        assert!(DisplayServer::X11.is_graphical());
        assert!(DisplayServer::Wayland.is_graphical());
        assert!(DisplayServer::MacOS.is_graphical());
        assert!(!DisplayServer::Tty.is_graphical());
        assert!(!DisplayServer::Unknown.is_graphical());
    }

    #[test]
    fn test_display_server_detect_returns_valid() {
        match DisplayServer::detect() {
            DisplayServer::X11
            | DisplayServer::Wayland
            | DisplayServer::Windows
            | DisplayServer::MacOS
            | DisplayServer::Tty
            | DisplayServer::Unknown => {}
        }
    }

    #[test]
    fn test_notifier_without_display_is_silent() {
        let notifier = DesktopNotifier {
            display_server: DisplayServer::Tty,
        };
        assert!(notifier.notify("oclip", "hello").is_ok());
    }

    // ===================
    // PlatformError Tests
    // ===================

    #[test]
    fn test_platform_error_display() {
        let err = PlatformError::Notification("notify failed".to_string());
        assert!(err.to_string().contains("Notification error"));
        assert!(err.to_string().contains("notify failed"));

        let err = PlatformError::Audio("audio failed".to_string());
        assert!(err.to_string().contains("Audio error"));
    }
}
