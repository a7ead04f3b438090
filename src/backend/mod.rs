//! Local inference backend: locating, supervising and talking to Ollama.

pub mod locator;
pub mod ollama;
pub mod supervisor;

pub use locator::{BackendLocator, LocatedBackend, LocatorOptions};
pub use ollama::OllamaBackend;
pub use supervisor::{BackendControl, BackendSupervisor, TextImprover};

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors while bringing the backend up or talking to it.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Backend executable not found: {0}")]
    NotFound(String),

    #[error("Backend initialization failed: {0}")]
    Init(String),

    #[error("Failed to spawn backend at {path}: {source}")]
    Spawn {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned error: {0}")]
    Api(String),

    #[error("Failed to stop backend: {0}")]
    Kill(String),
}

/// A single improve request failed. Never fatal.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Backend not ready (state: {0:?})")]
    NotReady(BackendState),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Readiness of the backend handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Unvalidated,
    PathResolved,
    AwaitingDownload,
    Started,
    ModelPulling,
    ModelReady,
    Failed,
}

/// Generation request as sent to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub system: Option<String>,
    pub keep_alive_secs: Option<f32>,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            system: None,
            keep_alive_secs: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_keep_alive(mut self, secs: f32) -> Self {
        self.keep_alive_secs = Some(secs);
        self
    }
}

/// Capability set of the inference server.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Whether a server is reachable.
    async fn is_running(&self) -> bool;

    /// Start the server from `executable` as a detached process.
    fn serve(&self, executable: &Path) -> Result<(), BackendError>;

    /// Download a model's weights. Long-running.
    async fn pull(&self, model: &str) -> Result<(), BackendError>;

    /// Single request/response generation.
    async fn generate(&self, request: &GenerateRequest) -> Result<String, BackendError>;

    /// Models available locally.
    async fn list_models(&self) -> Result<Vec<String>, BackendError>;

    /// Force-terminate the server process.
    fn kill(&self) -> Result<(), BackendError>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scriptable backend used across the crate's tests.

    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct StubBackend {
        pub running: AtomicBool,
        pub fail_serve: AtomicBool,
        pub fail_pull: AtomicBool,
        pub fail_generate: AtomicBool,
        /// `kill` is counted but the server stays up
        pub ignore_kill: AtomicBool,
        /// `pull` never completes
        pub hold_pull: AtomicBool,
        pub serve_calls: AtomicUsize,
        pub pull_calls: AtomicUsize,
        pub generate_calls: AtomicUsize,
        pub kill_calls: AtomicUsize,
        pub last_request: Mutex<Option<GenerateRequest>>,
    }

    impl StubBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn running() -> Self {
            let stub = Self::default();
            stub.running.store(true, Ordering::SeqCst);
            stub
        }
    }

    #[async_trait]
    impl InferenceBackend for StubBackend {
        async fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }

        fn serve(&self, executable: &Path) -> Result<(), BackendError> {
            self.serve_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_serve.load(Ordering::SeqCst) {
                return Err(BackendError::Spawn {
                    path: executable.to_path_buf(),
                    source: std::io::Error::other("spawn refused"),
                });
            }
            self.running.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn pull(&self, model: &str) -> Result<(), BackendError> {
            self.pull_calls.fetch_add(1, Ordering::SeqCst);
            if self.hold_pull.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if self.fail_pull.load(Ordering::SeqCst) {
                return Err(BackendError::Api(format!("pull of {} failed", model)));
            }
            Ok(())
        }

        async fn generate(&self, request: &GenerateRequest) -> Result<String, BackendError> {
            self.generate_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(request.clone());
            if self.fail_generate.load(Ordering::SeqCst) {
                return Err(BackendError::Api("model exploded".into()));
            }
            Ok(request.prompt.to_uppercase())
        }

        async fn list_models(&self) -> Result<Vec<String>, BackendError> {
            Ok(vec!["gemma3:latest".into()])
        }

        fn kill(&self) -> Result<(), BackendError> {
            self.kill_calls.fetch_add(1, Ordering::SeqCst);
            if !self.ignore_kill.load(Ordering::SeqCst) {
                self.running.store(false, Ordering::SeqCst);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_request_builder() {
        let request = GenerateRequest::new("gemma3", "hello")
            .with_system("be nice")
            .with_keep_alive(10.0);
        assert_eq!(request.model, "gemma3");
        assert_eq!(request.prompt, "hello");
        assert_eq!(request.system.as_deref(), Some("be nice"));
        assert_eq!(request.keep_alive_secs, Some(10.0));
    }

    #[test]
    fn test_backend_error_display() {
        let err = BackendError::NotFound("/opt/ollama".into());
        assert!(err.to_string().contains("not found"));
        assert!(err.to_string().contains("/opt/ollama"));

        let err = BackendError::Init("pull failed".into());
        assert!(err.to_string().contains("initialization failed"));
    }

    #[test]
    fn test_generation_error_not_ready() {
        let err = GenerationError::NotReady(BackendState::ModelPulling);
        assert!(err.to_string().contains("ModelPulling"));
    }
}
