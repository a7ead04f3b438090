use clap::Parser;
use oclip::config::Config;
use oclip::daemon::{self, DaemonOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser)]
#[command(name = "oclip")]
#[command(author, version, about = "Improve clipboard text with a local Ollama model", long_about = None)]
struct Cli {
    /// Ollama model to use (overrides the config file)
    #[arg(long)]
    model: Option<String>,

    /// System prompt (overrides the config file)
    #[arg(long)]
    sys_prompt: Option<String>,

    /// Path to the ollama executable or the folder containing it
    #[arg(long)]
    ollama_path: Option<PathBuf>,

    /// Start --ollama-path even if a server is already running (that server is
    /// stopped first); never search PATH or download
    #[arg(long)]
    force_path: bool,

    /// Config file to use instead of the default location
    #[arg(long)]
    config: Option<PathBuf>,

    /// Ollama API address
    #[arg(long, default_value = oclip::backend::ollama::DEFAULT_HOST)]
    host: String,

    /// Never download Ollama automatically
    #[arg(long)]
    no_download: bool,

    /// How many times to retry a failed Ollama download
    #[arg(long, default_value_t = 2)]
    download_retries: u32,

    /// Clipboard watcher poll interval in milliseconds
    #[arg(long, default_value_t = 500, value_parser = clap::value_parser!(u64).range(10..))]
    poll_interval_ms: u64,

    /// Run without a tray icon
    #[arg(long)]
    no_tray: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn into_options(self) -> DaemonOptions {
        DaemonOptions {
            model: self.model,
            sys_prompt: self.sys_prompt,
            ollama_path: self.ollama_path,
            force_path: self.force_path,
            config_path: self.config,
            host: self.host,
            allow_download: !self.no_download,
            download_retries: self.download_retries,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            tray: !self.no_tray,
        }
    }
}

fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("warn,oclip=debug")
        } else {
            EnvFilter::new("warn,oclip=info")
        }
    })
}

/// Console logging plus a daily log file in the data directory.
/// The returned guard flushes the file writer when dropped.
fn init_logging(verbose: bool) -> Option<WorkerGuard> {
    let file = Config::data_dir()
        .map(|dir| dir.join("logs"))
        .ok()
        .and_then(|dir| std::fs::create_dir_all(&dir).ok().map(|_| dir))
        .map(|dir| {
            let appender = tracing_appender::rolling::daily(dir, "oclip.log");
            tracing_appender::non_blocking(appender)
        });

    let (file_layer, guard) = match file {
        Some((writer, guard)) => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(writer)
                    .with_filter(env_filter(verbose)),
            ),
            Some(guard),
        ),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(env_filter(verbose)),
        )
        .with(file_layer)
        .init();

    if guard.is_none() {
        warn!("Log directory unavailable, logging to stderr only");
    }
    guard
}

#[tokio::main]
async fn main() -> ExitCode {
    oclip::panic_handler::install();

    let cli = Cli::parse();
    let _log_guard = init_logging(cli.verbose);

    info!("Starting oclip {}", env!("CARGO_PKG_VERSION"));
    let status = daemon::run(cli.into_options()).await;
    ExitCode::from(status)
}
