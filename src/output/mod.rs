//! Output side of the watcher: reading/writing the clipboard and the paste keystroke.

pub mod clipboard;
pub mod paste;

pub use clipboard::{ArboardClipboard, ClipboardAccess, ClipboardError};
pub use paste::{EnigoPaste, PasteError, PasteKeystroke};
