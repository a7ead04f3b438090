//! Clipboard watcher: polls the trigger flag and rewrites the clipboard.
//!
//! Runs on its own thread. Each iteration checks `monitoring && trigger_pending`,
//! does the improve cycle if set, then clears the trigger no matter what.

use crate::backend::TextImprover;
use crate::events::{EventBus, StatusEvent};
use crate::output::{ArboardClipboard, ClipboardAccess, EnigoPaste, PasteKeystroke};
use crate::platform::{AudioFeedback, BellFeedback};
use crate::session::SessionFlags;
use crate::tasks::BackgroundTasks;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct ClipboardWatcher {
    flags: Arc<SessionFlags>,
    improver: Arc<dyn TextImprover>,
    clipboard: Arc<dyn ClipboardAccess>,
    paste: Arc<dyn PasteKeystroke>,
    sound: Arc<dyn AudioFeedback>,
    tasks: BackgroundTasks,
    events: EventBus,
    interval: Duration,
}

impl ClipboardWatcher {
    /// Watcher on the system clipboard with the default poll interval.
    pub fn new(flags: Arc<SessionFlags>, improver: Arc<dyn TextImprover>, events: EventBus) -> Self {
        Self {
            flags,
            improver,
            clipboard: Arc::new(ArboardClipboard),
            paste: Arc::new(EnigoPaste),
            sound: Arc::new(BellFeedback),
            tasks: BackgroundTasks::new(),
            events,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_clipboard(mut self, clipboard: Arc<dyn ClipboardAccess>) -> Self {
        self.clipboard = clipboard;
        self
    }

    pub fn with_paste(mut self, paste: Arc<dyn PasteKeystroke>) -> Self {
        self.paste = paste;
        self
    }

    pub fn with_sound(mut self, sound: Arc<dyn AudioFeedback>) -> Self {
        self.sound = sound;
        self
    }

    pub fn with_tasks(mut self, tasks: BackgroundTasks) -> Self {
        self.tasks = tasks;
        self
    }

    /// One loop iteration. Returns true if an improve cycle ran.
    pub fn run_once(&self, runtime: &Handle) -> bool {
        let ran = self.flags.monitoring() && self.flags.trigger_pending();
        if ran {
            self.improve_clipboard(runtime);
        }
        // Cleared even when nothing ran so a stale trigger never fires later
        self.flags.clear_trigger();
        ran
    }

    fn improve_clipboard(&self, runtime: &Handle) {
        let text = match self.clipboard.get_text() {
            Ok(text) => text,
            Err(e) => {
                warn!("Skipping improve, clipboard unreadable: {}", e);
                return;
            }
        };

        let started = Instant::now();
        let improved = runtime.block_on(self.improver.improve_text(&text));
        debug!(
            "Improve cycle took {}ms ({} -> {} chars)",
            started.elapsed().as_millis(),
            text.chars().count(),
            improved.chars().count()
        );

        if let Err(e) = self.clipboard.set_text(&improved) {
            error!("Could not write improved text to clipboard: {}", e);
            return;
        }
        info!("Clipboard improved");
        self.events.publish(StatusEvent::ClipboardImproved {
            chars: improved.chars().count(),
        });

        if self.flags.auto_paste() {
            if let Err(e) = self.paste.paste() {
                warn!("Auto-paste failed: {}", e);
            }
        }

        if self.flags.notifications() {
            let sound = self.sound.clone();
            self.tasks.spawn("notification-sound", move || {
                if let Err(e) = sound.play_done_sound() {
                    warn!("Notification sound failed: {}", e);
                }
            });
        }
    }

    /// Loop until `stop_requested` is set.
    pub fn run(&self, runtime: &Handle) {
        info!("Clipboard watcher started (poll every {}ms)", self.interval.as_millis());
        while !self.flags.stop_requested() {
            self.run_once(runtime);
            thread::sleep(self.interval);
        }
        info!("Clipboard watcher stopped");
    }

    /// Run on a dedicated `clipboard-watcher` thread.
    pub fn spawn(self, runtime: Handle) -> std::io::Result<WatcherHandle> {
        let flags = self.flags.clone();
        let thread = thread::Builder::new()
            .name("clipboard-watcher".to_string())
            .spawn(move || self.run(&runtime))?;

        Ok(WatcherHandle {
            flags,
            thread: Some(thread),
        })
    }
}

/// Owner of the watcher thread.
pub struct WatcherHandle {
    flags: Arc<SessionFlags>,
    thread: Option<JoinHandle<()>>,
}

impl WatcherHandle {
    /// Ask the loop to exit and wait for it. Safe to call more than once.
    pub fn stop_and_join(&mut self) {
        self.flags.request_stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Clipboard watcher thread panicked");
            }
        }
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}
