//! Paste keystroke using enigo.

use enigo::{Direction, Enigo, Key, Keyboard, Settings};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum PasteError {
    #[error("Failed to initialize input simulator: {0}")]
    InitFailed(String),

    #[error("Failed to send paste keystroke: {0}")]
    KeystrokeFailed(String),
}

/// Synthesizes the platform paste shortcut in the focused window.
pub trait PasteKeystroke: Send + Sync {
    fn paste(&self) -> Result<(), PasteError>;
}

/// Modifier used for paste on this platform.
pub fn paste_modifier() -> Key {
    #[cfg(target_os = "macos")]
    {
        Key::Meta
    }
    #[cfg(not(target_os = "macos"))]
    {
        Key::Control
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EnigoPaste;

impl PasteKeystroke for EnigoPaste {
    fn paste(&self) -> Result<(), PasteError> {
        let mut enigo =
            Enigo::new(&Settings::default()).map_err(|e| PasteError::InitFailed(format!("{:?}", e)))?;
        let modifier = paste_modifier();

        // Let the hotkey's own modifiers settle first
        thread::sleep(Duration::from_millis(50));

        enigo
            .key(modifier, Direction::Press)
            .map_err(|e| PasteError::KeystrokeFailed(format!("{:?}", e)))?;

        let clicked = enigo
            .key(Key::Unicode('v'), Direction::Click)
            .map_err(|e| PasteError::KeystrokeFailed(format!("{:?}", e)));

        // Always release, even if the click failed
        enigo
            .key(modifier, Direction::Release)
            .map_err(|e| PasteError::KeystrokeFailed(format!("{:?}", e)))?;
        clicked?;

        info!("Pasted from clipboard");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    pub struct CountingPaste {
        pub calls: AtomicUsize,
    }

    impl CountingPaste {
        pub fn count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl PasteKeystroke for CountingPaste {
        fn paste(&self) -> Result<(), PasteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
