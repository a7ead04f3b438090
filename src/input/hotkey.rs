//! Global hotkey detection using rdev.
//!
//! Each configured combination (`ctrl+shift+c`, `ctrl+alt+n`, ...) is bound
//! to an [`Action`]. Callbacks only flip session flags and queue a
//! notification; nothing in here blocks the listener thread.

use crate::config::{Config, ConfigKey};
use crate::events::{EventBus, StatusEvent};
use crate::platform::Notifier;
use crate::session::SessionFlags;
use crate::tasks::BackgroundTasks;
use rdev::{listen, Event, EventType, Key};
use std::sync::Arc;
use std::thread;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum HotkeyError {
    #[error("Failed to start hotkey listener: {0}")]
    StartFailed(String),

    #[error("Invalid hotkey: {0}")]
    InvalidHotkey(String),
}

/// What a hotkey (or the matching tray item) does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ToggleMonitor,
    Trigger,
    ToggleNotifications,
    ToggleAutoPaste,
}

impl Action {
    /// Config key holding the combination for this action.
    pub fn config_key(self) -> ConfigKey {
        match self {
            Action::ToggleMonitor => ConfigKey::MonitorHotkey,
            Action::Trigger => ConfigKey::TriggerHotkey,
            Action::ToggleNotifications => ConfigKey::NotifHotkey,
            Action::ToggleAutoPaste => ConfigKey::AutoPasteHotkey,
        }
    }

    pub const ALL: [Action; 4] = [
        Action::ToggleMonitor,
        Action::Trigger,
        Action::ToggleNotifications,
        Action::ToggleAutoPaste,
    ];
}

/// Modifier state, either held or required.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub meta: bool,
}

impl Modifiers {
    /// Record a press or release of `key` if it is a modifier.
    /// Returns false for ordinary keys.
    fn update(&mut self, key: Key, down: bool) -> bool {
        let slot = match key {
            Key::ControlLeft | Key::ControlRight => &mut self.ctrl,
            Key::Alt | Key::AltGr => &mut self.alt,
            Key::ShiftLeft | Key::ShiftRight => &mut self.shift,
            Key::MetaLeft | Key::MetaRight => &mut self.meta,
            _ => return false,
        };
        *slot = down;
        true
    }

    fn set_by_name(&mut self, name: &str) -> bool {
        match name {
            "ctrl" | "control" => self.ctrl = true,
            "alt" | "option" => self.alt = true,
            "shift" => self.shift = true,
            "super" | "meta" | "win" | "cmd" | "command" => self.meta = true,
            _ => return false,
        }
        true
    }
}

/// A key plus the exact set of modifiers that must be held with it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hotkey {
    pub modifiers: Modifiers,
    pub key: Key,
}

impl Hotkey {
    /// Parse a `+`-separated combination. Everything before the last part
    /// must be a modifier; a lone key (`f9`, `ctrl_r`) is allowed.
    pub fn parse(combo: &str) -> Result<Self, HotkeyError> {
        let parts: Vec<String> = combo
            .split('+')
            .map(|p| p.trim().to_lowercase())
            .collect();

        let Some((last, leading)) = parts.split_last() else {
            return Err(HotkeyError::InvalidHotkey(combo.to_string()));
        };

        let mut modifiers = Modifiers::default();
        for part in leading {
            if !modifiers.set_by_name(part) {
                return Err(HotkeyError::InvalidHotkey(format!(
                    "'{}' in '{}' is not a modifier (ctrl, alt, shift, super)",
                    part, combo
                )));
            }
        }

        Ok(Self {
            modifiers,
            key: parse_key(last)?,
        })
    }
}

/// Parse a key string into an rdev Key
///
/// Supports formats like:
/// - "ControlRight", "ControlLeft", "ctrl_r", "ctrl_l"
/// - "AltRight", "AltLeft", "alt_r", "alt_l"
/// - "F1" through "F12"
/// - "a" through "z", "0" through "9"
/// - "Space", "Escape", "Tab", etc.
pub fn parse_key(key_str: &str) -> Result<Key, HotkeyError> {
    let normalized = key_str.to_lowercase().replace(['_', '-'], "");

    let mut chars = normalized.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if let Some(key) = char_key(c) {
            return Ok(key);
        }
    }

    match normalized.as_str() {
        // Control keys
        "controlright" | "ctrlr" | "ctrlright" | "rctrl" => Ok(Key::ControlRight),
        "controlleft" | "ctrll" | "ctrlleft" | "lctrl" | "ctrl" => Ok(Key::ControlLeft),

        // Alt keys
        "altright" | "altr" | "ralt" | "altgr" => Ok(Key::AltGr),
        "altleft" | "altl" | "lalt" | "alt" => Ok(Key::Alt),

        // Shift keys
        "shiftright" | "shiftr" | "rshift" => Ok(Key::ShiftRight),
        "shiftleft" | "shiftl" | "lshift" | "shift" => Ok(Key::ShiftLeft),

        // Meta/Super/Windows keys
        "metaleft" | "superleft" | "winleft" | "lsuper" | "lmeta" | "lwin" => Ok(Key::MetaLeft),
        "metaright" | "superright" | "winright" | "rsuper" | "rmeta" | "rwin" => Ok(Key::MetaRight),

        // Function keys
        "f1" => Ok(Key::F1),
        "f2" => Ok(Key::F2),
        "f3" => Ok(Key::F3),
        "f4" => Ok(Key::F4),
        "f5" => Ok(Key::F5),
        "f6" => Ok(Key::F6),
        "f7" => Ok(Key::F7),
        "f8" => Ok(Key::F8),
        "f9" => Ok(Key::F9),
        "f10" => Ok(Key::F10),
        "f11" => Ok(Key::F11),
        "f12" => Ok(Key::F12),

        // Special keys
        "space" => Ok(Key::Space),
        "escape" | "esc" => Ok(Key::Escape),
        "tab" => Ok(Key::Tab),
        "capslock" | "caps" => Ok(Key::CapsLock),
        "backspace" | "back" => Ok(Key::Backspace),
        "enter" | "return" => Ok(Key::Return),
        "insert" | "ins" => Ok(Key::Insert),
        "delete" | "del" => Ok(Key::Delete),
        "home" => Ok(Key::Home),
        "end" => Ok(Key::End),
        "pageup" | "pgup" => Ok(Key::PageUp),
        "pagedown" | "pgdn" => Ok(Key::PageDown),
        "up" | "uparrow" => Ok(Key::UpArrow),
        "down" | "downarrow" => Ok(Key::DownArrow),
        "left" | "leftarrow" => Ok(Key::LeftArrow),
        "right" | "rightarrow" => Ok(Key::RightArrow),

        _ => Err(HotkeyError::InvalidHotkey(format!(
            "Unknown key: '{}'. Valid examples: c, F12, Space, ctrl_r",
            key_str
        ))),
    }
}

fn char_key(c: char) -> Option<Key> {
    let key = match c {
        'a' => Key::KeyA,
        'b' => Key::KeyB,
        'c' => Key::KeyC,
        'd' => Key::KeyD,
        'e' => Key::KeyE,
        'f' => Key::KeyF,
        'g' => Key::KeyG,
        'h' => Key::KeyH,
        'i' => Key::KeyI,
        'j' => Key::KeyJ,
        'k' => Key::KeyK,
        'l' => Key::KeyL,
        'm' => Key::KeyM,
        'n' => Key::KeyN,
        'o' => Key::KeyO,
        'p' => Key::KeyP,
        'q' => Key::KeyQ,
        'r' => Key::KeyR,
        's' => Key::KeyS,
        't' => Key::KeyT,
        'u' => Key::KeyU,
        'v' => Key::KeyV,
        'w' => Key::KeyW,
        'x' => Key::KeyX,
        'y' => Key::KeyY,
        'z' => Key::KeyZ,
        '0' => Key::Num0,
        '1' => Key::Num1,
        '2' => Key::Num2,
        '3' => Key::Num3,
        '4' => Key::Num4,
        '5' => Key::Num5,
        '6' => Key::Num6,
        '7' => Key::Num7,
        '8' => Key::Num8,
        '9' => Key::Num9,
        _ => return None,
    };
    Some(key)
}

/// Hotkey to action table, built from the config.
#[derive(Debug, Clone)]
pub struct Bindings {
    entries: Vec<(Hotkey, Action)>,
}

impl Bindings {
    /// Parse every hotkey entry of `config`. Fails on the first bad combo.
    pub fn from_config(config: &Config) -> Result<Self, HotkeyError> {
        let entries = Action::ALL
            .iter()
            .map(|&action| {
                let combo = config.get(action.config_key());
                Hotkey::parse(combo)
                    .map(|hotkey| (hotkey, action))
                    .map_err(|e| {
                        HotkeyError::InvalidHotkey(format!(
                            "{} = {}: {}",
                            action.config_key().as_str(),
                            combo,
                            e
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }

    fn lookup(&self, modifiers: Modifiers, key: Key) -> Option<Action> {
        self.entries
            .iter()
            .find(|(hotkey, _)| hotkey.key == key && hotkey.modifiers == modifiers)
            .map(|(_, action)| *action)
    }
}

/// Follows the raw key stream and reports when a binding fires.
#[derive(Debug, Default)]
pub struct KeyTracker {
    held: Modifiers,
    // Key that last fired; suppresses auto-repeat until it is released
    latched: Option<Key>,
}

impl KeyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&mut self, event: &EventType, bindings: &Bindings) -> Option<Action> {
        match *event {
            EventType::KeyPress(key) => {
                if self.latched == Some(key) {
                    return None;
                }
                // A lone modifier binding matches against the other held modifiers
                let before = self.held;
                self.held.update(key, true);

                let action = bindings.lookup(before, key);
                if action.is_some() {
                    self.latched = Some(key);
                }
                action
            }
            EventType::KeyRelease(key) => {
                self.held.update(key, false);
                if self.latched == Some(key) {
                    self.latched = None;
                }
                None
            }
            _ => None,
        }
    }
}

/// Applies actions to the session flags. Shared by hotkeys and the tray.
pub struct ActionDispatcher {
    flags: Arc<SessionFlags>,
    notifier: Arc<dyn Notifier>,
    tasks: BackgroundTasks,
    events: EventBus,
}

impl ActionDispatcher {
    pub fn new(
        flags: Arc<SessionFlags>,
        notifier: Arc<dyn Notifier>,
        tasks: BackgroundTasks,
        events: EventBus,
    ) -> Self {
        Self {
            flags,
            notifier,
            tasks,
            events,
        }
    }

    pub fn flags(&self) -> &Arc<SessionFlags> {
        &self.flags
    }

    /// Apply `action`. Returns false if it was ignored.
    pub fn dispatch(&self, action: Action) -> bool {
        match action {
            Action::ToggleMonitor => {
                let enabled = self.flags.toggle_monitoring();
                info!("Clipboard monitoring {}", on_off(enabled));
                self.events.publish(StatusEvent::MonitoringChanged(enabled));
                self.announce(format!("Clipboard monitoring {}.", on_off(enabled)));
                true
            }
            Action::Trigger => {
                if !self.flags.monitoring() {
                    return false;
                }
                let queued = self.flags.request_trigger();
                if queued {
                    debug!("Improve requested");
                }
                queued
            }
            Action::ToggleNotifications => {
                let enabled = self.flags.toggle_notifications();
                info!("Notifications {}", on_off(enabled));
                self.events.publish(StatusEvent::NotificationsChanged(enabled));
                // Only announced when switching on; announce() checks the new value
                self.announce("Notifications enabled.".to_string());
                true
            }
            Action::ToggleAutoPaste => {
                let enabled = self.flags.toggle_auto_paste();
                info!("Auto-paste {}", on_off(enabled));
                self.events.publish(StatusEvent::AutoPasteChanged(enabled));
                self.announce(format!("Auto-paste {}.", on_off(enabled)));
                true
            }
        }
    }

    /// Queue a toast if notifications are on.
    pub fn announce(&self, body: String) {
        if !self.flags.notifications() {
            return;
        }
        let notifier = self.notifier.clone();
        self.tasks.spawn("notification", move || {
            if let Err(e) = notifier.notify("oclip", &body) {
                warn!("Notification failed: {}", e);
            }
        });
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "enabled"
    } else {
        "disabled"
    }
}

/// Global listener feeding key events into the dispatcher.
pub struct HotkeyRouter {
    bindings: Bindings,
    dispatcher: Arc<ActionDispatcher>,
}

impl HotkeyRouter {
    pub fn new(bindings: Bindings, dispatcher: Arc<ActionDispatcher>) -> Self {
        Self {
            bindings,
            dispatcher,
        }
    }

    /// Spawn the listener thread. rdev offers no way to stop it, so it lives
    /// until the process exits.
    pub fn start(self) -> Result<(), HotkeyError> {
        let Self {
            bindings,
            dispatcher,
        } = self;

        thread::Builder::new()
            .name("hotkey-listener".to_string())
            .spawn(move || {
                info!("Hotkey listener started");
                let mut tracker = KeyTracker::new();

                let callback = move |event: Event| {
                    if let Some(action) = tracker.handle(&event.event_type, &bindings) {
                        debug!("Hotkey fired: {:?}", action);
                        dispatcher.dispatch(action);
                    }
                };

                if let Err(e) = listen(callback) {
                    error!("Hotkey listener error: {:?}", e);
                }
            })
            .map(|_| ())
            .map_err(|e| HotkeyError::StartFailed(e.to_string()))
    }
}
