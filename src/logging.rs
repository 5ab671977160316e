//! Subscriber setup driven by [`LoggingConfig`].
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is left to binaries and embedding services.

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

const FALLBACK_DIRECTIVE: &str = "info";

/// Keeps the non-blocking file writer alive; drop it to flush.
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

/// Filter for the configured directive, `info` when it does not parse
pub fn env_filter(directive: &str) -> EnvFilter {
    EnvFilter::try_new(directive).unwrap_or_else(|err| {
        eprintln!("invalid log filter '{directive}' ({err}), using {FALLBACK_DIRECTIVE}");
        EnvFilter::new(FALLBACK_DIRECTIVE)
    })
}

fn file_writer(config: &LoggingConfig) -> Option<(NonBlocking, WorkerGuard)> {
    if !config.file_logs {
        return None;
    }
    if let Err(err) = std::fs::create_dir_all(&config.log_dir) {
        eprintln!("failed to create log directory {}: {err}", config.log_dir);
        return None;
    }
    let appender = RollingFileAppender::new(Rotation::DAILY, &config.log_dir, &config.file_prefix);
    Some(tracing_appender::non_blocking(appender))
}

/// Install the global subscriber. A second call is a no-op and returns `None`.
pub fn init_tracing(config: &LoggingConfig) -> Option<FileLogGuard> {
    let stdout_layer = fmt::layer().with_target(true);
    let registry = tracing_subscriber::registry()
        .with(env_filter(&config.level))
        .with(stdout_layer);

    match file_writer(config) {
        Some((writer, guard)) => {
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            let installed = registry.with(file_layer).try_init().is_ok();
            installed.then_some(FileLogGuard { _guard: guard })
        }
        None => {
            let _ = registry.try_init();
            None
        }
    }
}
