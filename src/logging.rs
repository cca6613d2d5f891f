//! Tracing configuration and log routing.
//!
//! Events go to stderr through a compact formatter so command output on stdout stays clean, and
//! to a file. `RAGLINE_LOG_FILE` selects the file; otherwise `logs/ragline.log` is used.
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Environment variable naming an explicit log file.
pub const LOG_FILE_VAR: &str = "RAGLINE_LOG_FILE";
const DEFAULT_LOG_FILE: &str = "ragline.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global subscriber. `RUST_LOG` filters events and defaults to `info`.
///
/// Calling this twice is harmless; the second call leaves the first subscriber in place.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    if let Some(writer) = configure_file_writer() {
        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
            .compact();

        let _ = registry.with(file_layer).try_init();
    } else {
        let _ = registry.try_init();
    }
}

/// Returns `None` when the logs directory cannot be created or the target file cannot be opened.
fn configure_file_writer() -> Option<NonBlocking> {
    if let Ok(path) = std::env::var(LOG_FILE_VAR) {
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
        {
            Ok(file) => {
                let (non_blocking, guard) = tracing_appender::non_blocking(file);
                let _ = LOG_GUARD.set(guard);
                Some(non_blocking)
            }
            Err(err) => {
                eprintln!("Failed to open log file {path}: {err}");
                None
            }
        }
    } else {
        if let Err(err) = std::fs::create_dir_all("logs") {
            eprintln!("Failed to create logs directory: {err}");
            return None;
        }
        let file_appender = tracing_appender::rolling::never("logs", DEFAULT_LOG_FILE);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let _ = LOG_GUARD.set(guard);
        Some(non_blocking)
    }
}
