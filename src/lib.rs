//! oclip library exports for the binary, integration tests and fuzzing.

pub mod backend;
pub mod config;
pub mod daemon;
pub mod download;
pub mod events;
pub mod input;
pub mod output;
pub mod panic_handler;
pub mod platform;
pub mod session;
pub mod tasks;
pub mod tray;
pub mod watcher;

// Re-export commonly used types for convenience
pub use config::Config;
pub use daemon::{DaemonOptions, EXIT_INIT_FAILURE, EXIT_SUCCESS};
