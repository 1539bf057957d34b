//! Logging setup
//!
//! Console output always; when `logging.directory` is set, a daily rolling
//! JSON file is written alongside it through a non-blocking appender.

use crate::infrastructure::config::LoggingConfig;
use std::fs;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging
///
/// RUST_LOG takes precedence over `config.level`. Returns the file writer's
/// WorkerGuard, which must be kept alive for the duration of the program.
pub fn init_logging(config: &LoggingConfig) -> std::io::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let (file_layer, guard) = match &config.directory {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let (writer, guard) = create_appender(dir, &config.file_prefix);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .json();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_level(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    tracing::info!(
        directory = ?config.directory,
        level = %config.level,
        "Logging system initialized"
    );

    Ok(guard)
}

/// Create a daily rolling file appender
fn create_appender(dir: &std::path::Path, prefix: &str) -> (NonBlocking, WorkerGuard) {
    let appender = RollingFileAppender::new(Rotation::DAILY, dir, prefix);
    tracing_appender::non_blocking(appender)
}
