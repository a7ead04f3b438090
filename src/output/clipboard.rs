//! Clipboard operations using arboard.

use arboard::Clipboard;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum ClipboardError {
    #[error("Failed to access clipboard: {0}")]
    AccessFailed(String),

    #[error("Failed to set clipboard content: {0}")]
    SetFailed(String),

    #[error("Failed to get clipboard content: {0}")]
    GetFailed(String),
}

/// Text clipboard as seen by the watcher.
pub trait ClipboardAccess: Send + Sync {
    fn get_text(&self) -> Result<String, ClipboardError>;
    fn set_text(&self, text: &str) -> Result<(), ClipboardError>;
}

/// System clipboard. Opens a fresh handle per call so nothing is held
/// between polls.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArboardClipboard;

impl ArboardClipboard {
    fn open() -> Result<Clipboard, ClipboardError> {
        Clipboard::new().map_err(|e| ClipboardError::AccessFailed(e.to_string()))
    }
}

impl ClipboardAccess for ArboardClipboard {
    fn get_text(&self) -> Result<String, ClipboardError> {
        Self::open()?
            .get_text()
            .map_err(|e| ClipboardError::GetFailed(e.to_string()))
    }

    fn set_text(&self, text: &str) -> Result<(), ClipboardError> {
        Self::open()?
            .set_text(text)
            .map_err(|e| ClipboardError::SetFailed(e.to_string()))?;
        debug!("Copied {} characters to clipboard", text.len());
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// In-memory clipboard.
    #[derive(Default)]
    pub struct MemoryClipboard {
        pub content: Mutex<String>,
        pub fail_reads: std::sync::atomic::AtomicBool,
    }

    impl MemoryClipboard {
        pub fn with_text(text: &str) -> Self {
            Self {
                content: Mutex::new(text.to_string()),
                ..Default::default()
            }
        }

        pub fn text(&self) -> String {
            self.content.lock().unwrap().clone()
        }
    }

    impl ClipboardAccess for MemoryClipboard {
        fn get_text(&self) -> Result<String, ClipboardError> {
            if self.fail_reads.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(ClipboardError::GetFailed("no text on clipboard".into()));
            }
            Ok(self.text())
        }

        fn set_text(&self, text: &str) -> Result<(), ClipboardError> {
            *self.content.lock().unwrap() = text.to_string();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clipboard_error_display() {
        let err = ClipboardError::GetFailed("empty".into());
        assert!(err.to_string().contains("get clipboard"));
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    #[ignore = "Requires display server"]
    fn test_clipboard_roundtrip() {
        let clipboard = ArboardClipboard;
        clipboard.set_text("Hello, oclip!").unwrap();
        assert_eq!(clipboard.get_text().unwrap(), "Hello, oclip!");
    }
}
