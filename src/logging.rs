//! File-based logging setup
//!
//! Writes logs to files in logs/ directory, separated by log type:
//! - logs/main.log - General application logs
//! - logs/ws.log - Connection and frame traffic logs (target "ws")
//!
//! Console output stays on for development.

use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

/// Initialize file logging
///
/// Creates the logs/ directory and sets up the file appenders. Returns
/// WorkerGuards which must be kept alive for the duration of the program.
pub fn init_logging() -> std::io::Result<Vec<WorkerGuard>> {
    let logs_dir = Path::new("logs");
    for sub in ["main", "ws"] {
        let dir = logs_dir.join(sub);
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
    }

    let mut guards = Vec::new();

    let (main_appender, main_guard) = create_appender("logs/main", "main");
    guards.push(main_guard);

    let (ws_appender, ws_guard) = create_appender("logs/ws", "ws");
    guards.push(ws_guard);

    let main_layer = tracing_subscriber::fmt::layer()
        .with_writer(main_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .json();

    let ws_layer = tracing_subscriber::fmt::layer()
        .with_writer(ws_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_filter(tracing_subscriber::filter::filter_fn(|metadata| {
            metadata.target().contains("ws")
        }));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_level(true);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(main_layer)
        .with(ws_layer)
        .with(console_layer)
        .init();

    tracing::info!("Logging initialized, files in logs/");

    Ok(guards)
}

/// Create a rolling file appender
fn create_appender(dir: &str, name: &str) -> (NonBlocking, WorkerGuard) {
    let appender = RollingFileAppender::new(Rotation::DAILY, dir, name);
    tracing_appender::non_blocking(appender)
}
