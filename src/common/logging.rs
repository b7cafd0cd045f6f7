//! Logging and tracing configuration
//!
//! Stdout carries the DAP stream in `serve` mode, so log output never goes
//! there. The adapter logs to a file under the data directory and to stderr,
//! which editors usually show in their debug console.

use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::paths;

const LOG_FILE_NAME: &str = "nyx-dap.log";

/// Initialize tracing for the adapter (file + stderr logging)
///
/// The log level is controlled by `RUST_LOG`; the default keeps our own
/// messages at debug so runtime traffic is visible in the log file.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the lifetime of the process.
pub fn init(log_file: Option<&Path>) -> (Option<PathBuf>, Option<WorkerGuard>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("nyx_dap=debug,info"));

    let log_path = log_file.map(Path::to_path_buf).or_else(default_log_path);

    if let Some(path) = &log_path {
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let file_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| LOG_FILE_NAME.into());

        if std::fs::create_dir_all(&dir).is_ok() {
            let appender = tracing_appender::rolling::never(&dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);

            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true);

            // Each layer is typed by the subscriber it sits on, so the
            // stderr layer is built separately for both setups
            let stderr_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .compact();

            tracing_subscriber::registry()
                .with(filter)
                .with(file_layer)
                .with(stderr_layer)
                .init();

            return (log_path, Some(guard));
        }
        eprintln!("Warning: Could not create log directory {}", dir.display());
    }

    // Fallback: stderr only
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .compact();

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .init();

    (None, None)
}

/// Get the default path of the adapter log file
pub fn default_log_path() -> Option<PathBuf> {
    match paths::ensure_log_dir() {
        Ok(Some(dir)) => Some(dir.join(LOG_FILE_NAME)),
        _ => None,
    }
}
