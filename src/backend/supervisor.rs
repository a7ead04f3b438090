//! Brings the backend up and owns the handle used for generation.
//!
//! Initialization is start → pull → warm load; any failure there is fatal.
//! After that, generation failures never escape: [`TextImprover::improve_text`]
//! hands back the input unchanged.

use super::locator::{BackendLocator, LocatedBackend};
use super::{BackendError, BackendState, GenerateRequest, GenerationError, InferenceBackend};
use crate::events::{EventBus, StatusEvent};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Seconds the backend keeps the model loaded after a request.
const KEEP_ALIVE_SECS: f32 = 10.0;

/// Prompt used to force the model into memory.
const WARM_LOAD_PROMPT: &str = "Hello";

/// Turns clipboard text into improved text. Never fails.
#[async_trait]
pub trait TextImprover: Send + Sync {
    async fn improve_text(&self, text: &str) -> String;
}

/// Teardown side of the backend, used by the shutdown sequence.
pub trait BackendControl: Send + Sync {
    /// Best-effort; errors are logged, not returned.
    fn stop(&self);
}

pub struct BackendSupervisor {
    backend: Arc<dyn InferenceBackend>,
    model: String,
    system_prompt: String,
    state: Mutex<BackendState>,
    events: EventBus,
    pull_tick: Duration,
    startup_poll: Duration,
    startup_timeout: Duration,
}

impl BackendSupervisor {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        events: EventBus,
    ) -> Self {
        Self {
            backend,
            model: model.into(),
            system_prompt: system_prompt.into(),
            state: Mutex::new(BackendState::Unvalidated),
            events,
            pull_tick: Duration::from_secs(1),
            startup_poll: Duration::from_millis(250),
            startup_timeout: Duration::from_secs(30),
        }
    }

    /// Override the startup wait (poll interval, give-up time).
    pub fn with_startup_wait(mut self, poll: Duration, timeout: Duration) -> Self {
        self.startup_poll = poll;
        self.startup_timeout = timeout;
        self
    }

    /// Override how often the pull indicator fires.
    pub fn with_pull_tick(mut self, tick: Duration) -> Self {
        self.pull_tick = tick;
        self
    }

    pub fn state(&self) -> BackendState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: BackendState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
        debug!("Backend state: {:?}", state);
        self.events.publish(StatusEvent::Backend(state));
    }

    /// Locate, start, pull and warm-load. Leaves the handle in `ModelReady`.
    pub async fn initialize(&self, locator: &BackendLocator) -> Result<(), BackendError> {
        let located = locator
            .locate(self.backend.as_ref(), &|state| self.set_state(state))
            .await?;

        let result = self.bring_up(&located).await;
        if result.is_err() {
            self.set_state(BackendState::Failed);
        }
        result
    }

    async fn bring_up(&self, located: &LocatedBackend) -> Result<(), BackendError> {
        self.start(located).await?;
        self.pull_model().await?;
        self.warm_load().await?;
        self.set_state(BackendState::ModelReady);
        info!("Model {} ready", self.model);
        Ok(())
    }

    /// Spawn the server unless we are attaching to one, then wait for it.
    /// A forced spawn first stops whatever server is already up.
    pub async fn start(&self, located: &LocatedBackend) -> Result<(), BackendError> {
        match located {
            LocatedBackend::Attach => {
                debug!("Attaching to running backend, no spawn");
            }
            LocatedBackend::Spawn {
                replace_running: false,
                ..
            } if self.backend.is_running().await => {
                debug!("Backend already running, not spawning another");
            }
            LocatedBackend::Spawn {
                path,
                replace_running,
            } => {
                if *replace_running && self.backend.is_running().await {
                    info!("Stopping the running Ollama to start {}", path.display());
                    self.backend.kill()?;
                    self.wait_for_reachable(false).await?;
                }
                self.backend.serve(path)?;
                self.wait_for_reachable(true).await?;
            }
        }
        self.set_state(BackendState::Started);
        Ok(())
    }

    /// Poll until the server is (or is no longer) reachable.
    async fn wait_for_reachable(&self, reachable: bool) -> Result<(), BackendError> {
        let deadline = Instant::now() + self.startup_timeout;
        loop {
            if self.backend.is_running().await == reachable {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BackendError::Init(format!(
                    "server did not {} within {}s",
                    if reachable { "come up" } else { "stop" },
                    self.startup_timeout.as_secs()
                )));
            }
            tokio::time::sleep(self.startup_poll).await;
        }
    }

    /// Pull the model on a separate task, reporting progress every tick.
    pub async fn pull_model(&self) -> Result<(), BackendError> {
        self.set_state(BackendState::ModelPulling);

        match self.backend.list_models().await {
            Ok(models) if models.iter().any(|m| same_model(m, &self.model)) => {
                info!("Model {} is available locally, checking for updates", self.model)
            }
            Ok(_) => info!("Model {} not available locally, downloading", self.model),
            Err(e) => debug!("Could not list local models: {}", e),
        }

        let backend = self.backend.clone();
        let model = self.model.clone();
        let mut pull = tokio::spawn(async move { backend.pull(&model).await });

        let started = Instant::now();
        let mut ticker = tokio::time::interval(self.pull_tick);
        ticker.tick().await;
        let mut dots = 0usize;

        let outcome = loop {
            tokio::select! {
                result = &mut pull => break result,
                _ = ticker.tick() => {
                    dots = dots % 3 + 1;
                    info!("Pulling Ollama model {}{}", self.model, ".".repeat(dots));
                    self.events.publish(StatusEvent::PullInProgress {
                        model: self.model.clone(),
                        elapsed_secs: started.elapsed().as_secs(),
                    });
                }
            }
        };

        match outcome {
            Ok(Ok(())) => {
                info!("Pulled {} in {}s", self.model, started.elapsed().as_secs());
                Ok(())
            }
            Ok(Err(e)) => Err(BackendError::Init(format!(
                "pulling {} failed: {}",
                self.model, e
            ))),
            Err(e) => Err(BackendError::Init(format!("pull task failed: {}", e))),
        }
    }

    /// Throwaway generation that makes the backend load the model.
    pub async fn warm_load(&self) -> Result<(), BackendError> {
        info!("Loading model {}...", self.model);
        let request = GenerateRequest::new(&self.model, WARM_LOAD_PROMPT);
        self.backend
            .generate(&request)
            .await
            .map(|_| ())
            .map_err(|e| BackendError::Init(format!("loading {} failed: {}", self.model, e)))
    }

    /// Generate with the session's system prompt. Only valid once ready.
    pub async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let state = self.state();
        if state != BackendState::ModelReady {
            return Err(GenerationError::NotReady(state));
        }

        let request = GenerateRequest::new(&self.model, prompt)
            .with_system(&self.system_prompt)
            .with_keep_alive(KEEP_ALIVE_SECS);
        Ok(self.backend.generate(&request).await?)
    }
}

/// `gemma3` and `gemma3:latest` name the same model.
fn same_model(listed: &str, wanted: &str) -> bool {
    let strip = |name: &str| name.strip_suffix(":latest").unwrap_or(name).to_string();
    strip(listed) == strip(wanted)
}

#[async_trait]
impl TextImprover for BackendSupervisor {
    async fn improve_text(&self, text: &str) -> String {
        if text.trim().is_empty() {
            debug!("Clipboard empty, nothing to improve");
            return text.to_string();
        }

        match self.generate(text).await {
            Ok(improved) => improved,
            Err(e) => {
                error!("Text improvement failed: {}", e);
                text.to_string()
            }
        }
    }
}

impl BackendControl for BackendSupervisor {
    fn stop(&self) {
        info!("Stopping backend");
        if let Err(e) = self.backend.kill() {
            warn!("Backend did not stop cleanly: {}", e);
        }
    }
}
