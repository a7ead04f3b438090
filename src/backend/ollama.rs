//! Ollama client: HTTP API plus process control for `ollama serve`.

use super::{BackendError, GenerateRequest, InferenceBackend};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default Ollama API address.
pub const DEFAULT_HOST: &str = "http://127.0.0.1:11434";

/// Name of the backend executable, without extension.
pub const EXECUTABLE_NAME: &str = "ollama";

/// `pkill` selector: exact process name, never the command line, so a
/// process started with an ollama path in its arguments is left alone.
#[cfg(not(windows))]
const PKILL_MATCH: [&str; 2] = ["-x", EXECUTABLE_NAME];

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Ollama generate request.
#[derive(Debug, Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<f32>,
    stream: bool,
}

/// Ollama generate response.
#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    response: String,
    #[allow(dead_code)]
    done: bool,
}

#[derive(Debug, Serialize)]
struct OllamaPullRequest<'a> {
    model: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaPullResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct OllamaTagsResponse {
    #[serde(default)]
    models: Vec<OllamaModel>,
}

#[derive(Debug, Deserialize)]
struct OllamaModel {
    name: String,
}

/// Ollama backend reached over HTTP, optionally owning the server process.
pub struct OllamaBackend {
    client: Client,
    url: String,
    child: Mutex<Option<Child>>,
}

impl OllamaBackend {
    pub fn new(url: &str) -> Self {
        // No overall timeout: pulls and generations take as long as they take
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();

        Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            child: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(BackendError::Api(format!("HTTP {}: {}", status, body)))
    }

    /// Terminate the child we spawned ourselves, if any.
    fn stop_child(&self) {
        let mut guard = match self.child.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(mut child) = guard.take() else {
            return;
        };

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Err(e) = kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM) {
                debug!("SIGTERM to backend failed: {}", e);
            }
            let deadline = Instant::now() + Duration::from_secs(2);
            while Instant::now() < deadline {
                if let Ok(Some(status)) = child.try_wait() {
                    info!("Backend process exited ({})", status);
                    return;
                }
                std::thread::sleep(Duration::from_millis(50));
            }
        }

        if let Err(e) = child.kill() {
            debug!("Killing backend child failed: {}", e);
        }
        let _ = child.wait();
    }
}

/// Kill every process named like the backend.
fn kill_by_pattern() -> Result<(), BackendError> {
    #[cfg(windows)]
    let status = {
        use std::os::windows::process::CommandExt;
        Command::new("taskkill")
            .args(["/F", "/IM", "ollama.exe"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .creation_flags(CREATE_NO_WINDOW)
            .status()
    };

    #[cfg(not(windows))]
    let status = Command::new("pkill")
        .args(PKILL_MATCH)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    let status = status.map_err(|e| BackendError::Kill(e.to_string()))?;
    // pkill exits 1 when nothing matched; that is not a failure here
    if !status.success() {
        debug!("Backend kill command exited with {}", status);
    }
    Ok(())
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    async fn is_running(&self) -> bool {
        let url = format!("{}/api/tags", self.url);
        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(2))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    fn serve(&self, executable: &Path) -> Result<(), BackendError> {
        let mut command = Command::new(executable);
        command
            .arg("serve")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            command.creation_flags(CREATE_NO_WINDOW);
        }

        let child = command.spawn().map_err(|source| BackendError::Spawn {
            path: executable.to_path_buf(),
            source,
        })?;
        info!(
            "Started backend: {} serve (pid {})",
            executable.display(),
            child.id()
        );

        let mut guard = match self.child.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(child);
        Ok(())
    }

    async fn pull(&self, model: &str) -> Result<(), BackendError> {
        let url = format!("{}/api/pull", self.url);
        let request = OllamaPullRequest {
            model,
            stream: false,
        };
        debug!("Pulling model {} via {}", model, url);

        let response = self.client.post(&url).json(&request).send().await?;
        let result: OllamaPullResponse = Self::check_status(response).await?.json().await?;

        if result.status != "success" {
            return Err(BackendError::Api(format!(
                "pull of {} ended with status '{}'",
                model, result.status
            )));
        }
        Ok(())
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<String, BackendError> {
        let url = format!("{}/api/generate", self.url);
        let body = OllamaGenerateRequest {
            model: &request.model,
            prompt: &request.prompt,
            system: request.system.as_deref(),
            keep_alive: request.keep_alive_secs,
            stream: false,
        };

        let start = Instant::now();
        let response = self.client.post(&url).json(&body).send().await?;
        let result: OllamaGenerateResponse = Self::check_status(response).await?.json().await?;

        info!(
            "Ollama generate took {}ms ({} chars -> {} chars)",
            start.elapsed().as_millis(),
            request.prompt.len(),
            result.response.len()
        );

        Ok(result.response.trim().to_string())
    }

    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        let url = format!("{}/api/tags", self.url);
        let response = self.client.get(&url).send().await?;
        let tags: OllamaTagsResponse = Self::check_status(response).await?.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    fn kill(&self) -> Result<(), BackendError> {
        self.stop_child();
        kill_by_pattern().inspect_err(|e| warn!("{}", e))
    }
}
