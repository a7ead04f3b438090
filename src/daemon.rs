//! Lifecycle controller for the clipboard improver.
//!
//! The daemon:
//! 1. Loads settings and parses the hotkey bindings
//! 2. Starts listening for SIGINT, SIGTERM and tray "Quit", shows the tray
//! 3. Locates (or downloads) Ollama, starts it and pulls the model
//! 4. Spawns the clipboard watcher and the hotkey listener
//! 5. Shuts down exactly once when a trigger fires, during initialization too

use crate::backend::{
    BackendControl, BackendError, BackendLocator, BackendSupervisor, InferenceBackend,
    LocatorOptions, OllamaBackend, TextImprover,
};
use crate::config::{Config, ConfigError, ConfigKey, ConfigSink, ConfigStore, Settings};
use crate::download::{Artifact, DownloadManager};
use crate::events::{EventBus, StatusEvent};
use crate::input::{ActionDispatcher, Bindings, HotkeyError, HotkeyRouter};
use crate::platform::DesktopNotifier;
use crate::session::SessionFlags;
use crate::tasks::BackgroundTasks;
use crate::watcher::{ClipboardWatcher, WatcherHandle, DEFAULT_POLL_INTERVAL};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, error, info, warn};

/// Exit status after a normal shutdown.
pub const EXIT_SUCCESS: u8 = 0;

/// Exit status when startup fails.
pub const EXIT_INIT_FAILURE: u8 = 255;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Hotkey error: {0}")]
    Hotkey(#[from] HotkeyError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Process lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Booting,
    Initializing,
    Running,
    ShuttingDown,
    Terminated,
}

/// Current lifecycle state, broadcast on every transition.
pub struct Lifecycle {
    state: Mutex<LifecycleState>,
    events: EventBus,
}

impl Lifecycle {
    pub fn new(events: EventBus) -> Self {
        Self {
            state: Mutex::new(LifecycleState::Booting),
            events,
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn transition(&self, next: LifecycleState) {
        let previous = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *state, next)
        };
        debug!("Lifecycle: {:?} -> {:?}", previous, next);
        self.events.publish(StatusEvent::Lifecycle(next));
    }
}

/// Something shown to the user that must be torn down at exit (the tray).
pub trait StatusSurface: Send + Sync {
    fn stop(&self);
}

/// The shutdown sequence. Runs at most once no matter how many triggers fire.
pub struct Shutdown {
    started: AtomicBool,
    lifecycle: Arc<Lifecycle>,
    config: Arc<dyn ConfigSink>,
    backend: Arc<dyn BackendControl>,
    watcher: Mutex<Option<WatcherHandle>>,
    surface: Mutex<Option<Arc<dyn StatusSurface>>>,
    tasks: BackgroundTasks,
}

impl Shutdown {
    pub fn new(
        lifecycle: Arc<Lifecycle>,
        config: Arc<dyn ConfigSink>,
        backend: Arc<dyn BackendControl>,
        tasks: BackgroundTasks,
    ) -> Self {
        Self {
            started: AtomicBool::new(false),
            lifecycle,
            config,
            backend,
            watcher: Mutex::new(None),
            surface: Mutex::new(None),
            tasks,
        }
    }

    pub fn attach_watcher(&self, handle: WatcherHandle) {
        *self.watcher.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    pub fn attach_surface(&self, surface: Arc<dyn StatusSurface>) {
        *self.surface.lock().unwrap_or_else(|e| e.into_inner()) = Some(surface);
    }

    /// Persist config, stop the watcher, stop the backend, remove the tray.
    /// Blocks. Returns false if another caller already ran it.
    pub fn run(&self) -> bool {
        self.sequence(true, true)
    }

    /// Teardown when initialization never completed. Nothing is persisted;
    /// `stop_backend` is false when no backend was found at all.
    pub fn abort(&self, stop_backend: bool) -> bool {
        self.sequence(false, stop_backend)
    }

    fn sequence(&self, persist: bool, stop_backend: bool) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Shutdown already in progress");
            return false;
        }

        info!("Shutting down...");
        self.lifecycle.transition(LifecycleState::ShuttingDown);

        if persist {
            match self.config.persist() {
                Ok(()) => debug!("Settings saved"),
                Err(e) => warn!("Could not save settings: {}", e),
            }
        }

        let watcher = self.watcher.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(mut watcher) = watcher {
            watcher.stop_and_join();
        }

        if stop_backend {
            self.backend.stop();
        }

        let surface = self.surface.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(surface) = surface {
            surface.stop();
        }

        let pending = self.tasks.in_flight();
        if pending > 0 {
            debug!("Leaving {} background task(s) behind", pending);
        }

        self.lifecycle.transition(LifecycleState::Terminated);
        info!("Shutdown complete");
        true
    }
}

/// Startup options, normally from the command line.
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub model: Option<String>,
    pub sys_prompt: Option<String>,
    pub ollama_path: Option<PathBuf>,
    pub force_path: bool,
    pub config_path: Option<PathBuf>,
    pub host: String,
    pub allow_download: bool,
    pub download_retries: u32,
    pub poll_interval: Duration,
    pub tray: bool,
}

impl Default for DaemonOptions {
    fn default() -> Self {
        Self {
            model: None,
            sys_prompt: None,
            ollama_path: None,
            force_path: false,
            config_path: None,
            host: crate::backend::ollama::DEFAULT_HOST.to_string(),
            allow_download: true,
            download_retries: 2,
            poll_interval: DEFAULT_POLL_INTERVAL,
            tray: true,
        }
    }
}

/// Load settings and apply command line overrides. Overrides count as
/// session changes and are written back at shutdown.
pub fn load_settings(options: &DaemonOptions) -> Result<Settings, ConfigError> {
    let store = match &options.config_path {
        Some(path) => ConfigStore::new(path),
        None => ConfigStore::default_location()?,
    };
    info!("Config: {}", store.path().display());

    let settings = Settings::load(store);
    if let Some(model) = &options.model {
        settings.set(ConfigKey::Model, model.clone());
    }
    if let Some(prompt) = &options.sys_prompt {
        settings.set(ConfigKey::SysPrompt, prompt.clone());
    }
    Ok(settings)
}

/// Main daemon struct
pub struct Daemon {
    options: DaemonOptions,
    events: EventBus,
    lifecycle: Arc<Lifecycle>,
    flags: Arc<SessionFlags>,
    tasks: BackgroundTasks,
    config: Config,
    bindings: Bindings,
    install_dir: PathBuf,
    supervisor: Arc<BackendSupervisor>,
    shutdown: Arc<Shutdown>,
    quit: Arc<Notify>,
}

impl Daemon {
    /// Booting: settings, bindings and paths. Nothing is started yet.
    pub fn boot(options: DaemonOptions, events: EventBus) -> Result<Self, DaemonError> {
        let backend = Arc::new(OllamaBackend::new(&options.host));
        Self::boot_with_backend(options, events, backend)
    }

    pub fn boot_with_backend(
        options: DaemonOptions,
        events: EventBus,
        backend: Arc<dyn InferenceBackend>,
    ) -> Result<Self, DaemonError> {
        let lifecycle = Arc::new(Lifecycle::new(events.clone()));
        let settings = Arc::new(load_settings(&options)?);
        let config = settings.current();
        let bindings = Bindings::from_config(&config)?;
        let install_dir = Config::data_dir()?.join("ollama");

        let supervisor = Arc::new(BackendSupervisor::new(
            backend,
            config.model.clone(),
            config.system_prompt(),
            events.clone(),
        ));

        let tasks = BackgroundTasks::new();
        let shutdown = Arc::new(Shutdown::new(
            lifecycle.clone(),
            settings,
            supervisor.clone(),
            tasks.clone(),
        ));

        Ok(Self {
            options,
            events,
            lifecycle,
            flags: Arc::new(SessionFlags::new()),
            tasks,
            config,
            bindings,
            install_dir,
            supervisor,
            shutdown,
            quit: Arc::new(Notify::new()),
        })
    }

    /// Notified by the tray's "Quit"; same effect as SIGTERM.
    pub fn quit_handle(&self) -> Arc<Notify> {
        self.quit.clone()
    }

    fn locator(&self) -> BackendLocator {
        let mut options = LocatorOptions::new(&self.install_dir).discover();
        options.explicit_path = self.options.ollama_path.clone();
        options.force_path = self.options.force_path;
        options.allow_download = self.options.allow_download;
        options.download_retries = self.options.download_retries;

        let locator = BackendLocator::new(options);
        match Artifact::current() {
            Ok(artifact) => locator.with_installer(Box::new(DownloadManager::new(
                &self.install_dir,
                artifact,
                self.events.clone(),
            ))),
            Err(e) => {
                debug!("Automatic download unavailable: {}", e);
                locator
            }
        }
    }

    /// Initialize, run until a shutdown trigger fires, shut down.
    /// Returns the process exit status.
    pub async fn run(self) -> u8 {
        self.lifecycle.transition(LifecycleState::Initializing);
        info!("Model: {}", self.config.model);

        // Installed before initialization so a signal during a download or
        // pull still tears the backend down
        let mut triggers = ShutdownTriggers::install(self.quit.clone());

        let dispatcher = Arc::new(ActionDispatcher::new(
            self.flags.clone(),
            Arc::new(DesktopNotifier::new()),
            self.tasks.clone(),
            self.events.clone(),
        ));
        self.start_tray(dispatcher.clone()).await;

        let locator = self.locator();
        let initialized = tokio::select! {
            result = self.supervisor.initialize(&locator) => Some(result),
            _ = triggers.wait() => None,
        };

        match initialized {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                error!("Error initializing Ollama: {}", e);
                self.abort(!matches!(e, BackendError::NotFound(_))).await;
                return EXIT_INIT_FAILURE;
            }
            None => {
                warn!("Shutdown requested before initialization finished");
                self.abort(true).await;
                return EXIT_INIT_FAILURE;
            }
        }

        if let Err(e) = self.start_running(dispatcher) {
            error!("Failed to start: {}", e);
            self.shut_down().await;
            return EXIT_INIT_FAILURE;
        }

        triggers.wait().await;
        self.shut_down().await;
        EXIT_SUCCESS
    }

    fn start_running(&self, dispatcher: Arc<ActionDispatcher>) -> Result<(), DaemonError> {
        self.lifecycle.transition(LifecycleState::Running);

        let improver: Arc<dyn TextImprover> = self.supervisor.clone();
        let watcher = ClipboardWatcher::new(self.flags.clone(), improver, self.events.clone())
            .with_interval(self.options.poll_interval)
            .with_tasks(self.tasks.clone());
        self.shutdown
            .attach_watcher(watcher.spawn(tokio::runtime::Handle::current())?);

        // The tray still works without global hotkeys
        if let Err(e) = HotkeyRouter::new(self.bindings.clone(), dispatcher).start() {
            warn!("Hotkeys unavailable: {}", e);
        }

        info!(
            "oclip running. {} improves the clipboard, {} toggles monitoring, {} toggles notifications, {} toggles auto-paste.",
            self.config.trigger_hotkey,
            self.config.monitor_hotkey,
            self.config.notif_hotkey,
            self.config.auto_paste_hotkey
        );
        Ok(())
    }

    #[cfg(target_os = "linux")]
    async fn start_tray(&self, dispatcher: Arc<ActionDispatcher>) {
        use crate::tray::TrayManager;

        if !self.options.tray {
            debug!("Tray disabled");
            return;
        }

        let tray = match TrayManager::new(dispatcher, self.quit.clone()).await {
            Ok(tray) => Arc::new(tray),
            Err(e) => {
                warn!("Running without tray: {}", e);
                return;
            }
        };
        self.shutdown.attach_surface(tray.clone());

        // Status line and checkmarks follow lifecycle, backend and toggles
        let mut rx = self.events.subscribe();
        tray.handle_event(StatusEvent::Lifecycle(self.lifecycle.state()))
            .await;
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => tray.handle_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    #[cfg(not(target_os = "linux"))]
    async fn start_tray(&self, _dispatcher: Arc<ActionDispatcher>) {
        if self.options.tray {
            debug!("No tray on this platform");
        }
    }

    async fn shut_down(&self) {
        let shutdown = self.shutdown.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || shutdown.run()).await {
            error!("Shutdown task failed: {}", e);
        }
    }

    async fn abort(&self, stop_backend: bool) {
        let shutdown = self.shutdown.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || shutdown.abort(stop_backend)).await {
            error!("Teardown task failed: {}", e);
        }
    }
}

/// SIGINT, SIGTERM and tray "Quit". Signal handlers are installed on
/// creation and stay installed until the process exits.
struct ShutdownTriggers {
    quit: Arc<Notify>,
    #[cfg(unix)]
    interrupt: Option<tokio::signal::unix::Signal>,
    #[cfg(unix)]
    terminate: Option<tokio::signal::unix::Signal>,
}

impl ShutdownTriggers {
    #[cfg(unix)]
    fn install(quit: Arc<Notify>) -> Self {
        use tokio::signal::unix::SignalKind;

        Self {
            quit,
            interrupt: listen(SignalKind::interrupt(), "SIGINT"),
            terminate: listen(SignalKind::terminate(), "SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    fn install(quit: Arc<Notify>) -> Self {
        Self { quit }
    }

    /// Resolves when any trigger fires.
    #[cfg(unix)]
    async fn wait(&mut self) {
        tokio::select! {
            _ = next_signal(&mut self.interrupt) => info!("Shutdown signal received (SIGINT)"),
            _ = next_signal(&mut self.terminate) => info!("Shutdown signal received (SIGTERM)"),
            _ = self.quit.notified() => info!("Quit requested from tray"),
        }
    }

    #[cfg(not(unix))]
    async fn wait(&mut self) {
        tokio::select! {
            _ = interrupt_signal() => info!("Shutdown signal received (Ctrl+C)"),
            _ = self.quit.notified() => info!("Quit requested from tray"),
        }
    }
}

#[cfg(unix)]
fn listen(kind: tokio::signal::unix::SignalKind, name: &str) -> Option<tokio::signal::unix::Signal> {
    match tokio::signal::unix::signal(kind) {
        Ok(signal) => Some(signal),
        Err(e) => {
            warn!("Cannot listen for {}: {}", name, e);
            None
        }
    }
}

#[cfg(unix)]
async fn next_signal(signal: &mut Option<tokio::signal::unix::Signal>) {
    match signal {
        Some(signal) => {
            signal.recv().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(not(unix))]
async fn interrupt_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Log status events that nothing else reports.
fn spawn_status_logger(events: &EventBus) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        let mut last_reported = 0u8;
        loop {
            match rx.recv().await {
                Ok(StatusEvent::DownloadProgress(percent)) => {
                    if percent >= last_reported.saturating_add(10) || percent == 100 {
                        info!("Downloading Ollama: {}%", percent);
                        last_reported = percent;
                    }
                }
                Ok(StatusEvent::DownloadFinished) => {
                    info!("Ollama download finished");
                    last_reported = 0;
                }
                Ok(StatusEvent::DownloadFailed(_)) => last_reported = 0,
                Ok(StatusEvent::Lifecycle(state)) => debug!("Lifecycle state: {:?}", state),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => debug!("Status log skipped {} events", n),
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Boot, run and shut down. Returns the process exit status.
pub async fn run(options: DaemonOptions) -> u8 {
    let events = EventBus::new();
    spawn_status_logger(&events);

    match Daemon::boot(options, events) {
        Ok(daemon) => daemon.run().await,
        Err(e) => {
            error!("Startup failed: {}", e);
            EXIT_INIT_FAILURE
        }
    }
}
