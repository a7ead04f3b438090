//! Backend installer download.
//!
//! Fetches the platform's Ollama release archive, reports integer progress,
//! extracts it and locates the executable inside. The download runs on its
//! own thread; the caller polls a shared [`DownloadStatus`] until it flips to
//! finished.

use crate::events::{EventBus, StatusEvent};
use futures_util::StreamExt;
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use thiserror::Error;
use tracing::{debug, error, info};

const RELEASE_BASE_URL: &str = "https://github.com/ollama/ollama/releases/latest/download";

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("No backend build available for platform {0}")]
    UnsupportedPlatform(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download failed: HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to extract archive: {0}")]
    Extract(String),

    #[error("Archive extracted but no executable found in {0}")]
    ExecutableMissing(PathBuf),

    #[error("Download runtime error: {0}")]
    Runtime(String),
}

/// Archive format of a release artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
}

/// Release artifact for one platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub url: String,
    pub kind: ArchiveKind,
}

impl Artifact {
    /// Artifact for the platform this binary was built for.
    pub fn current() -> Result<Self, DownloadError> {
        Self::for_platform(std::env::consts::OS, std::env::consts::ARCH)
    }

    pub fn for_platform(os: &str, arch: &str) -> Result<Self, DownloadError> {
        let unsupported = || DownloadError::UnsupportedPlatform(format!("{}-{}", os, arch));
        let arch = match arch {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            _ => return Err(unsupported()),
        };

        let (file, kind) = match os {
            "linux" => (format!("ollama-linux-{}.tgz", arch), ArchiveKind::TarGz),
            // Universal binary
            "macos" => ("Ollama-darwin.zip".to_string(), ArchiveKind::Zip),
            "windows" => (format!("ollama-windows-{}.zip", arch), ArchiveKind::Zip),
            _ => return Err(unsupported()),
        };

        Ok(Self {
            url: format!("{}/{}", RELEASE_BASE_URL, file),
            kind,
        })
    }
}

/// Turns byte counts into non-decreasing integer percentages.
#[derive(Debug)]
pub struct ProgressTracker {
    total: Option<u64>,
    downloaded: u64,
    last: Option<u8>,
}

impl ProgressTracker {
    /// `total` is the content length, if the server sent one.
    pub fn new(total: Option<u64>) -> Self {
        Self {
            total: total.filter(|t| *t > 0),
            downloaded: 0,
            last: None,
        }
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded
    }

    /// Account for a chunk. Returns a percentage when it moved forward.
    pub fn advance(&mut self, bytes: u64) -> Option<u8> {
        self.downloaded += bytes;
        let total = self.total?;
        let percent = ((self.downloaded as f64 / total as f64) * 100.0).min(100.0) as u8;
        self.emit(percent)
    }

    /// Mark completion; always ends on 100.
    pub fn finish(&mut self) -> Option<u8> {
        self.emit(100)
    }

    fn emit(&mut self, percent: u8) -> Option<u8> {
        match self.last {
            Some(last) if percent <= last => None,
            _ => {
                self.last = Some(percent);
                Some(percent)
            }
        }
    }
}

/// Shared state between the download thread and whoever waits on it.
#[derive(Debug, Default)]
pub struct DownloadStatus {
    finished: AtomicBool,
    progress: AtomicU8,
    outcome: Mutex<Option<Result<PathBuf, String>>>,
}

impl DownloadStatus {
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::SeqCst)
    }

    /// Executable path on success, error text on failure.
    pub fn take_outcome(&self) -> Option<Result<PathBuf, String>> {
        self.outcome
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    pub(crate) fn report_progress(&self, percent: u8) {
        self.progress.store(percent, Ordering::SeqCst);
    }

    pub(crate) fn complete(&self, outcome: Result<PathBuf, String>) {
        *self.outcome.lock().unwrap_or_else(|e| e.into_inner()) = Some(outcome);
        self.finished.store(true, Ordering::SeqCst);
    }
}

/// Finishes the status with an error if the download thread ends without
/// reporting, panics included.
struct CompletionGuard(Arc<DownloadStatus>);

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if !self.0.is_finished() {
            self.0
                .complete(Err("download thread exited without a result".to_string()));
        }
    }
}

/// Downloads and installs the backend into a destination folder.
#[derive(Debug, Clone)]
pub struct DownloadManager {
    dest: PathBuf,
    artifact: Artifact,
    events: EventBus,
}

impl DownloadManager {
    pub fn new(dest: impl Into<PathBuf>, artifact: Artifact, events: EventBus) -> Self {
        Self {
            dest: dest.into(),
            artifact,
            events,
        }
    }

    /// Start the download on its own thread.
    pub fn start(&self) -> Arc<DownloadStatus> {
        let status = Arc::new(DownloadStatus::default());
        let thread_status = status.clone();
        let manager = self.clone();

        let spawned = thread::Builder::new()
            .name("backend-download".into())
            .spawn(move || {
                let _guard = CompletionGuard(thread_status.clone());
                let outcome = manager.run_blocking(&thread_status);
                match &outcome {
                    Ok(path) => {
                        info!("Backend installed at {}", path.display());
                        manager.events.publish(StatusEvent::DownloadFinished);
                    }
                    Err(e) => {
                        error!("Backend download failed: {}", e);
                        manager
                            .events
                            .publish(StatusEvent::DownloadFailed(e.to_string()));
                    }
                }
                thread_status.complete(outcome.map_err(|e| e.to_string()));
            });

        if let Err(e) = spawned {
            let message = format!("could not start download thread: {}", e);
            self.events
                .publish(StatusEvent::DownloadFailed(message.clone()));
            status.complete(Err(message));
        }

        status
    }

    fn run_blocking(&self, status: &DownloadStatus) -> Result<PathBuf, DownloadError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DownloadError::Runtime(e.to_string()))?;

        runtime.block_on(self.download(|percent| {
            status.report_progress(percent);
            self.events.publish(StatusEvent::DownloadProgress(percent));
        }))
    }

    /// Fetch, extract and locate the executable.
    pub async fn download<F>(&self, mut on_progress: F) -> Result<PathBuf, DownloadError>
    where
        F: FnMut(u8),
    {
        fs::create_dir_all(&self.dest)?;
        let archive_path = self.dest.join(match self.artifact.kind {
            ArchiveKind::Zip => "backend.zip.partial",
            ArchiveKind::TarGz => "backend.tgz.partial",
        });

        info!("Downloading backend from {}", self.artifact.url);
        let response = reqwest::get(&self.artifact.url).await?;
        if !response.status().is_success() {
            return Err(DownloadError::Status {
                status: response.status().as_u16(),
                url: self.artifact.url.clone(),
            });
        }

        let mut tracker = ProgressTracker::new(response.content_length());
        let mut file = File::create(&archive_path)?;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk)?;
            if let Some(percent) = tracker.advance(chunk.len() as u64) {
                debug!("Download progress: {}%", percent);
                on_progress(percent);
            }
        }
        file.flush()?;
        drop(file);

        if let Some(percent) = tracker.finish() {
            on_progress(percent);
        }
        info!("Downloaded {} bytes, extracting", tracker.downloaded());

        let kind = self.artifact.kind;
        let dest = self.dest.clone();
        let archive = archive_path.clone();
        tokio::task::spawn_blocking(move || extract(&archive, kind, &dest))
            .await
            .map_err(|e| DownloadError::Extract(format!("extract task failed: {}", e)))??;

        if let Err(e) = fs::remove_file(&archive_path) {
            debug!("Could not remove {}: {}", archive_path.display(), e);
        }

        find_executable(&self.dest).ok_or_else(|| DownloadError::ExecutableMissing(self.dest.clone()))
    }
}

/// Unpack `archive` into `dest`.
pub fn extract(archive: &Path, kind: ArchiveKind, dest: &Path) -> Result<(), DownloadError> {
    let file = File::open(archive)?;
    match kind {
        ArchiveKind::TarGz => {
            let decoder = flate2::read::GzDecoder::new(BufReader::new(file));
            tar::Archive::new(decoder)
                .unpack(dest)
                .map_err(|e| DownloadError::Extract(e.to_string()))?;
        }
        ArchiveKind::Zip => {
            let mut zip = zip::ZipArchive::new(BufReader::new(file))
                .map_err(|e| DownloadError::Extract(e.to_string()))?;
            zip.extract(dest)
                .map_err(|e| DownloadError::Extract(e.to_string()))?;
        }
    }
    Ok(())
}

fn executable_file_name() -> String {
    format!(
        "{}{}",
        crate::backend::ollama::EXECUTABLE_NAME,
        std::env::consts::EXE_SUFFIX
    )
}

/// Walk `dir` looking for the backend executable.
pub fn find_executable(dir: &Path) -> Option<PathBuf> {
    let name = executable_file_name();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let Ok(entries) = fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.file_name().is_some_and(|n| n == name.as_str()) {
                make_executable(&path);
                return Some(path);
            }
        }
    }
    None
}

#[cfg(unix)]
fn make_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Ok(metadata) = fs::metadata(path) {
        let mut permissions = metadata.permissions();
        if permissions.mode() & 0o111 == 0 {
            permissions.set_mode(0o755);
            if let Err(e) = fs::set_permissions(path, permissions) {
                debug!("Could not mark {} executable: {}", path.display(), e);
            }
        }
    }
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) {}
