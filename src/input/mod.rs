//! Input handling: global hotkeys.

pub mod hotkey;

pub use hotkey::{Action, ActionDispatcher, Bindings, Hotkey, HotkeyError, HotkeyRouter};
