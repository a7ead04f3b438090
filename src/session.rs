//! Flags shared between the watcher thread, hotkey callbacks and the tray.
//!
//! Each flag is independently meaningful; nothing relies on two flags changing
//! together. Writers per flag:
//! - `monitoring`, `notifications`, `auto_paste`: hotkey router and tray toggles
//! - `trigger_pending`: set by the hotkey router, cleared only by the watcher
//! - `stop_requested`: set once by the shutdown sequence

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug)]
pub struct SessionFlags {
    monitoring: AtomicBool,
    notifications: AtomicBool,
    auto_paste: AtomicBool,
    trigger_pending: AtomicBool,
    stop_requested: AtomicBool,
}

impl Default for SessionFlags {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionFlags {
    /// Monitoring and notifications start enabled, auto-paste disabled.
    pub fn new() -> Self {
        Self {
            monitoring: AtomicBool::new(true),
            notifications: AtomicBool::new(true),
            auto_paste: AtomicBool::new(false),
            trigger_pending: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
        }
    }

    pub fn monitoring(&self) -> bool {
        self.monitoring.load(Ordering::SeqCst)
    }

    pub fn set_monitoring(&self, enabled: bool) {
        self.monitoring.store(enabled, Ordering::SeqCst);
    }

    /// Flip monitoring and return the new value.
    pub fn toggle_monitoring(&self) -> bool {
        !self.monitoring.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn notifications(&self) -> bool {
        self.notifications.load(Ordering::SeqCst)
    }

    pub fn toggle_notifications(&self) -> bool {
        !self.notifications.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn auto_paste(&self) -> bool {
        self.auto_paste.load(Ordering::SeqCst)
    }

    pub fn toggle_auto_paste(&self) -> bool {
        !self.auto_paste.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn trigger_pending(&self) -> bool {
        self.trigger_pending.load(Ordering::SeqCst)
    }

    /// Request an improve cycle. Returns false if one was already pending.
    pub fn request_trigger(&self) -> bool {
        !self.trigger_pending.swap(true, Ordering::SeqCst)
    }

    pub fn clear_trigger(&self) {
        self.trigger_pending.store(false, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }
}
