//! peerchat: peer-to-peer session client library
//!
//! Manages chat sessions with remote endpoints over a signaling server:
//! an allow-list of remotes, one negotiated channel per remote, routing of
//! inbound signaling traffic, and ordered delivery of session notifications.

pub mod app;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod session;
pub mod signaling;
pub mod stream;

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;

pub use error::{ErrorKind, P2PError, P2PResult};
pub use session::{P2PClientObserver, Publication, SessionManager};

/// Initialize tracing subscriber for logging.
///
/// With `file_path` set, output also goes to a daily-rolling file. Keep the
/// returned guard alive for as long as file logging should be flushed.
pub fn init_logging(level: &str, file_path: Option<&str>) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("peerchat={}", level).into());

    let (file_layer, guard) = match file_path {
        Some(path) => {
            let path = Path::new(path);
            let directory = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .context("Log file path has no file name")?;
            std::fs::create_dir_all(directory).with_context(|| {
                format!("Failed to create log directory: {}", directory.display())
            })?;

            let appender = tracing_appender::rolling::daily(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
