//! Crash reports for the daemon.
//!
//! Appends the panic message and a backtrace to `crash.log` in the data
//! directory before the process goes down.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::panic::{self, PanicHookInfo};
use std::path::PathBuf;

/// Install the panic hook. Call first thing in `main`.
pub fn install() {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        handle_panic(info);
        previous(info);
    }));
}

/// Get the path for the crash report file.
pub fn crash_report_path() -> Option<PathBuf> {
    crate::config::Config::data_dir()
        .ok()
        .map(|dir| dir.join("crash.log"))
}

fn handle_panic(info: &PanicHookInfo) {
    let crash_report = format_crash_report(info);

    let Some(path) = crash_report_path() else {
        eprintln!("{}", crash_report);
        return;
    };
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    // Append so earlier crashes are kept
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&path) {
        let _ = file.write_all(b"\n\n========================================\n\n");
        let _ = file.write_all(crash_report.as_bytes());
        let _ = file.flush();
        eprintln!("Crash report appended to: {}", path.display());
    } else {
        eprintln!("{}", crash_report);
    }
}

fn panic_message(info: &PanicHookInfo) -> String {
    if let Some(s) = info.payload().downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = info.payload().downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

fn format_crash_report(info: &PanicHookInfo) -> String {
    let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");

    let thread = std::thread::current();
    let thread_name = thread.name().unwrap_or("<unnamed>");

    let location = info
        .location()
        .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
        .unwrap_or_else(|| "unknown".to_string());

    let backtrace = std::backtrace::Backtrace::force_capture();

    format!(
        r"================================================================================
OCLIP CRASH REPORT (v{})
================================================================================
Time:     {}
Thread:   {} ({:?})
Location: {}
Message:  {}

Backtrace:
{}
================================================================================
",
        env!("CARGO_PKG_VERSION"),
        timestamp,
        thread_name,
        thread.id(),
        location,
        panic_message(info),
        backtrace,
    )
}
