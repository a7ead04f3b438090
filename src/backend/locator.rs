//! Finds the backend executable or decides to attach to a running server.
//!
//! Resolution order:
//! 1. an explicit path is always validated and used; with `force_path` it
//!    replaces a running server, without it a running server is kept
//! 2. `force_path` without an explicit path is an error
//! 3. a reachable server is attached to, nothing is spawned
//! 4. the executable found on `PATH`
//! 5. a previous install in the download folder
//! 6. a fresh download (unless disabled), retried a bounded number of times

use super::{BackendError, BackendState, InferenceBackend};
use crate::download::{find_executable, DownloadManager, DownloadStatus};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Inputs to backend resolution.
#[derive(Debug, Clone)]
pub struct LocatorOptions {
    /// `--ollama-path`
    pub explicit_path: Option<PathBuf>,
    /// `--force-path`
    pub force_path: bool,
    /// Executable discovered on the search path
    pub discovered: Option<PathBuf>,
    /// Fetch the backend when nothing else is found
    pub allow_download: bool,
    /// Extra attempts after a failed download
    pub download_retries: u32,
    /// Where downloads are unpacked
    pub install_dir: PathBuf,
    /// How often to check whether a download finished
    pub download_poll: Duration,
}

impl LocatorOptions {
    pub fn new(install_dir: impl Into<PathBuf>) -> Self {
        Self {
            explicit_path: None,
            force_path: false,
            discovered: None,
            allow_download: true,
            download_retries: 2,
            install_dir: install_dir.into(),
            download_poll: Duration::from_millis(500),
        }
    }

    /// Fill `discovered` from the system search path.
    pub fn discover(mut self) -> Self {
        self.discovered = which::which(super::ollama::EXECUTABLE_NAME).ok();
        self
    }
}

/// Outcome of resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocatedBackend {
    /// Use the server that is already running
    Attach,
    /// Start the server from this executable. With `replace_running`, a
    /// server that is already up is stopped first.
    Spawn {
        path: PathBuf,
        replace_running: bool,
    },
}

impl LocatedBackend {
    pub fn spawn(path: impl Into<PathBuf>) -> Self {
        Self::Spawn {
            path: path.into(),
            replace_running: false,
        }
    }
}

/// Something that can fetch and install the backend.
pub trait BackendInstaller: Send + Sync {
    fn start(&self) -> Arc<DownloadStatus>;
}

impl BackendInstaller for DownloadManager {
    fn start(&self) -> Arc<DownloadStatus> {
        DownloadManager::start(self)
    }
}

pub struct BackendLocator {
    options: LocatorOptions,
    installer: Option<Box<dyn BackendInstaller>>,
}

impl BackendLocator {
    pub fn new(options: LocatorOptions) -> Self {
        Self {
            options,
            installer: None,
        }
    }

    pub fn with_installer(mut self, installer: Box<dyn BackendInstaller>) -> Self {
        self.installer = Some(installer);
        self
    }

    /// Resolve the backend, reporting each state change through `on_state`.
    pub async fn locate(
        &self,
        backend: &dyn InferenceBackend,
        on_state: &(dyn Fn(BackendState) + Send + Sync),
    ) -> Result<LocatedBackend, BackendError> {
        let result = self.resolve(backend, on_state).await;
        match &result {
            Ok(LocatedBackend::Spawn { path, .. }) => {
                if let Some(dir) = path.parent() {
                    prepend_to_path(dir);
                }
                on_state(BackendState::PathResolved);
            }
            Ok(LocatedBackend::Attach) => on_state(BackendState::PathResolved),
            Err(_) => on_state(BackendState::Failed),
        }
        result
    }

    async fn resolve(
        &self,
        backend: &dyn InferenceBackend,
        on_state: &(dyn Fn(BackendState) + Send + Sync),
    ) -> Result<LocatedBackend, BackendError> {
        if let Some(path) = &self.options.explicit_path {
            let resolved = validate_executable(path).ok_or_else(|| {
                info!("Invalid Ollama path specified: {}", path.display());
                BackendError::NotFound(path.display().to_string())
            })?;
            info!("Using Ollama at {}", resolved.display());
            return Ok(LocatedBackend::Spawn {
                path: resolved,
                replace_running: self.options.force_path,
            });
        }

        if self.options.force_path {
            info!("Can't force a custom Ollama path as none was given");
            return Err(BackendError::NotFound(
                "--force-path requires --ollama-path".into(),
            ));
        }

        if backend.is_running().await {
            info!("Ollama is already running; use --ollama-path with --force-path to start a specific one");
            return Ok(LocatedBackend::Attach);
        }

        if let Some(path) = self.options.discovered.as_deref().and_then(validate_executable) {
            info!("Found Ollama on PATH: {}", path.display());
            return Ok(LocatedBackend::spawn(path));
        }

        if let Some(path) = find_executable(&self.options.install_dir) {
            info!("Using previously downloaded Ollama: {}", path.display());
            return Ok(LocatedBackend::spawn(path));
        }

        match (&self.installer, self.options.allow_download) {
            (Some(installer), true) => self.await_download(installer.as_ref(), on_state).await,
            _ => {
                info!("Ollama not found in PATH");
                Err(BackendError::NotFound("ollama is not on PATH".into()))
            }
        }
    }

    async fn await_download(
        &self,
        installer: &dyn BackendInstaller,
        on_state: &(dyn Fn(BackendState) + Send + Sync),
    ) -> Result<LocatedBackend, BackendError> {
        let attempts = self.options.download_retries + 1;

        for attempt in 1..=attempts {
            on_state(BackendState::AwaitingDownload);
            info!("Ollama not found, downloading it (attempt {}/{})", attempt, attempts);

            let status = installer.start();
            let mut reported = 0u8;
            while !status.is_finished() {
                tokio::time::sleep(self.options.download_poll).await;
                let progress = status.progress();
                if progress != reported {
                    debug!("Ollama download at {}%", progress);
                    reported = progress;
                }
            }

            match status.take_outcome() {
                Some(Ok(path)) => {
                    // Re-resolve from the folder rather than trusting the reported path
                    let resolved = find_executable(&self.options.install_dir)
                        .or_else(|| validate_executable(&path));
                    if let Some(resolved) = resolved {
                        return Ok(LocatedBackend::spawn(resolved));
                    }
                    warn!("Download finished but no executable in {}", self.options.install_dir.display());
                }
                Some(Err(e)) => warn!("Ollama download failed: {}", e),
                None => warn!("Ollama download finished without a result"),
            }
        }

        Err(BackendError::NotFound(format!(
            "download failed after {} attempt(s)",
            attempts
        )))
    }
}

/// Resolve `path` to an existing executable file. A directory is searched
/// for the executable name directly inside it.
fn validate_executable(path: &Path) -> Option<PathBuf> {
    let candidate = if path.is_dir() {
        path.join(format!(
            "{}{}",
            super::ollama::EXECUTABLE_NAME,
            std::env::consts::EXE_SUFFIX
        ))
    } else {
        path.to_path_buf()
    };

    let resolved = fs::canonicalize(&candidate).ok()?;
    resolved.is_file().then_some(resolved)
}

/// Put `dir` at the front of the process search path.
fn prepend_to_path(dir: &Path) {
    let current = std::env::var_os("PATH").unwrap_or_default();
    match prepended(&current, dir) {
        Ok(Some(joined)) => {
            std::env::set_var("PATH", &joined);
            debug!("PATH now starts with {}", dir.display());
        }
        Ok(None) => {}
        Err(e) => warn!("Could not update PATH with {}: {}", dir.display(), e),
    }
}

/// `path` with `dir` moved or inserted to the front; `None` if already first.
fn prepended(path: &OsString, dir: &Path) -> Result<Option<OsString>, std::env::JoinPathsError> {
    let mut entries: Vec<PathBuf> = std::env::split_paths(path).collect();
    if entries.first().map(PathBuf::as_path) == Some(dir) {
        return Ok(None);
    }
    entries.retain(|p| p != dir);
    entries.insert(0, dir.to_path_buf());
    std::env::join_paths(entries).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::StubBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn fake_executable(dir: &Path) -> PathBuf {
        let path = dir.join(format!(
            "{}{}",
            crate::backend::ollama::EXECUTABLE_NAME,
            std::env::consts::EXE_SUFFIX
        ));
        fs::write(&path, b"bin").unwrap();
        path
    }

    fn options(install: &TempDir) -> LocatorOptions {
        let mut options = LocatorOptions::new(install.path().join("install"));
        options.download_poll = Duration::from_millis(5);
        options
    }

    fn recorder() -> (Arc<Mutex<Vec<BackendState>>>, impl Fn(BackendState) + Send + Sync) {
        let states = Arc::new(Mutex::new(Vec::new()));
        let sink = states.clone();
        (states, move |s| sink.lock().unwrap().push(s))
    }

    /// Installer that either writes an executable or fails.
    struct FakeInstaller {
        dest: PathBuf,
        fail_first: usize,
        calls: AtomicUsize,
    }

    impl BackendInstaller for FakeInstaller {
        fn start(&self) -> Arc<DownloadStatus> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let status = Arc::new(DownloadStatus::default());
            let outcome = if call < self.fail_first {
                Err("network unreachable".to_string())
            } else {
                fs::create_dir_all(self.dest.join("bin")).unwrap();
                Ok(fake_executable(&self.dest.join("bin")))
            };
            status.complete(outcome);
            status
        }
    }

    // ===================
    // Precedence Tests
    // ===================

    #[tokio::test]
    async fn test_explicit_path_wins_over_running_backend() {
        let dir = TempDir::new().unwrap();
        let exe = fake_executable(dir.path());
        let mut opts = options(&dir);
        opts.explicit_path = Some(exe.clone());

        let (states, on_state) = recorder();
        let located = BackendLocator::new(opts)
            .locate(&StubBackend::running(), &on_state)
            .await
            .unwrap();

        // Not forced: the running server is kept when starting
        assert_eq!(
            located,
            LocatedBackend::spawn(fs::canonicalize(&exe).unwrap())
        );
        assert_eq!(*states.lock().unwrap(), vec![BackendState::PathResolved]);
    }

    #[tokio::test]
    async fn test_force_path_replaces_running_backend() {
        let dir = TempDir::new().unwrap();
        let exe = fake_executable(dir.path());
        let mut opts = options(&dir);
        opts.explicit_path = Some(exe.clone());
        opts.force_path = true;

        let located = BackendLocator::new(opts)
            .locate(&StubBackend::running(), &|_| {})
            .await
            .unwrap();
        assert_eq!(
            located,
            LocatedBackend::Spawn {
                path: fs::canonicalize(&exe).unwrap(),
                replace_running: true,
            }
        );
    }

    #[tokio::test]
    async fn test_explicit_directory_is_searched() {
        let dir = TempDir::new().unwrap();
        fake_executable(dir.path());
        let mut opts = options(&dir);
        opts.explicit_path = Some(dir.path().to_path_buf());

        let located = BackendLocator::new(opts)
            .locate(&StubBackend::new(), &|_| {})
            .await
            .unwrap();
        assert!(matches!(located, LocatedBackend::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_missing_explicit_path_is_not_found() {
        let dir = TempDir::new().unwrap();
        let mut opts = options(&dir);
        opts.explicit_path = Some(dir.path().join("nope").join("ollama"));

        let (states, on_state) = recorder();
        let result = BackendLocator::new(opts)
            .locate(&StubBackend::running(), &on_state)
            .await;
        assert!(matches!(result, Err(BackendError::NotFound(_))));
        assert_eq!(*states.lock().unwrap(), vec![BackendState::Failed]);
    }

    #[tokio::test]
    async fn test_force_path_without_path_fails() {
        let dir = TempDir::new().unwrap();
        let mut opts = options(&dir);
        opts.force_path = true;

        let result = BackendLocator::new(opts)
            .locate(&StubBackend::running(), &|_| {})
            .await;
        assert!(matches!(result, Err(BackendError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_running_backend_is_attached() {
        let dir = TempDir::new().unwrap();
        let mut opts = options(&dir);
        opts.discovered = Some(fake_executable(dir.path()));

        let located = BackendLocator::new(opts)
            .locate(&StubBackend::running(), &|_| {})
            .await
            .unwrap();
        assert_eq!(located, LocatedBackend::Attach);
    }

    #[tokio::test]
    async fn test_discovered_path_used_when_not_running() {
        let dir = TempDir::new().unwrap();
        let exe = fake_executable(dir.path());
        let mut opts = options(&dir);
        opts.discovered = Some(exe.clone());

        let located = BackendLocator::new(opts)
            .locate(&StubBackend::new(), &|_| {})
            .await
            .unwrap();
        assert_eq!(located, LocatedBackend::spawn(fs::canonicalize(&exe).unwrap()));
    }

    #[tokio::test]
    async fn test_not_found_without_download() {
        let dir = TempDir::new().unwrap();
        let mut opts = options(&dir);
        opts.allow_download = false;
        opts.discovered = Some(dir.path().join("gone"));

        let installer = FakeInstaller {
            dest: opts.install_dir.clone(),
            fail_first: 0,
            calls: AtomicUsize::new(0),
        };
        let result = BackendLocator::new(opts)
            .with_installer(Box::new(installer))
            .locate(&StubBackend::new(), &|_| {})
            .await;
        assert!(matches!(result, Err(BackendError::NotFound(_))));
    }

    // ===================
    // Download Tests
    // ===================

    #[tokio::test]
    async fn test_download_then_resolve_from_install_dir() {
        let dir = TempDir::new().unwrap();
        let opts = options(&dir);
        let installer = FakeInstaller {
            dest: opts.install_dir.clone(),
            fail_first: 0,
            calls: AtomicUsize::new(0),
        };

        let (states, on_state) = recorder();
        let located = BackendLocator::new(opts.clone())
            .with_installer(Box::new(installer))
            .locate(&StubBackend::new(), &on_state)
            .await
            .unwrap();

        let LocatedBackend::Spawn { path, .. } = located else {
            panic!("expected a spawn target");
        };
        assert!(path.starts_with(&opts.install_dir));
        assert_eq!(
            *states.lock().unwrap(),
            vec![BackendState::AwaitingDownload, BackendState::PathResolved]
        );
    }

    #[tokio::test]
    async fn test_download_retried_after_failure() {
        let dir = TempDir::new().unwrap();
        let opts = options(&dir);
        let installer = Box::new(FakeInstaller {
            dest: opts.install_dir.clone(),
            fail_first: 1,
            calls: AtomicUsize::new(0),
        });

        let (states, on_state) = recorder();
        let located = BackendLocator::new(opts)
            .with_installer(installer)
            .locate(&StubBackend::new(), &on_state)
            .await;
        assert!(located.is_ok());
        let states = states.lock().unwrap();
        assert_eq!(
            states.iter().filter(|s| **s == BackendState::AwaitingDownload).count(),
            2
        );
    }

    #[tokio::test]
    async fn test_download_gives_up_after_retries() {
        let dir = TempDir::new().unwrap();
        let mut opts = options(&dir);
        opts.download_retries = 1;
        let installer = Box::new(FakeInstaller {
            dest: opts.install_dir.clone(),
            fail_first: usize::MAX,
            calls: AtomicUsize::new(0),
        });

        let result = BackendLocator::new(opts)
            .with_installer(installer)
            .locate(&StubBackend::new(), &|_| {})
            .await;
        match result {
            Err(BackendError::NotFound(msg)) => assert!(msg.contains("2 attempt")),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    // ===================
    // PATH Tests
    // ===================

    #[test]
    fn test_prepended_puts_dir_first() {
        let dir = PathBuf::from("/opt/ollama/bin");
        let path = std::env::join_paths([PathBuf::from("/usr/bin"), dir.clone()]).unwrap();

        let updated = prepended(&path, &dir).unwrap().unwrap();
        let entries: Vec<PathBuf> = std::env::split_paths(&updated).collect();
        assert_eq!(entries, vec![dir.clone(), PathBuf::from("/usr/bin")]);

        // Already first: nothing to do
        assert!(prepended(&updated, &dir).unwrap().is_none());
    }

    #[test]
    fn test_prepended_on_empty_path() {
        let dir = PathBuf::from("/opt/ollama");
        let updated = prepended(&OsString::new(), &dir).unwrap().unwrap();
        let entries: Vec<PathBuf> = std::env::split_paths(&updated).collect();
        assert_eq!(entries.first(), Some(&dir));
    }
}
