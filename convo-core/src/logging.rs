//! Structured logging setup using the `tracing` ecosystem.
//!
//! Console output goes to stderr so it never mixes with command output on
//! stdout (the CLI prints JSON events there). A daily-rotated file keeps the
//! full history, optionally as JSON lines.

use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;
use crate::constants::{DEFAULT_LOG_FILTER, LOG_FILE_NAME};
use crate::error::{ConvoError, ConvoResult};

/// Guard that keeps the non-blocking log writer alive.
/// Drop this to flush and close the log file.
pub struct LogGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Resolve the active filter.
///
/// `RUST_LOG` wins over everything. Otherwise `verbose` forces debug for the
/// convo crates, and the configured level applies to the rest.
pub fn build_filter(level: &str, verbose: bool) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let directive = if verbose {
        format!("{level},convo_socket=debug,convo_services=debug,convo_cli=debug,rustls=warn")
    } else if level.trim().is_empty() {
        DEFAULT_LOG_FILTER.to_string()
    } else {
        format!("{level},rustls=warn")
    };
    EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Install the global subscriber: compact stderr output plus a rolling
/// file under [`LoggingConfig::log_dir`].
pub fn init_logging(settings: &LoggingConfig, verbose: bool) -> ConvoResult<LogGuard> {
    let log_dir = settings.log_dir()?;
    std::fs::create_dir_all(&log_dir)?;

    let (writer, guard) = tracing_appender::non_blocking(rolling::daily(&log_dir, LOG_FILE_NAME));
    let file_layer = if settings.json_output {
        fmt::layer()
            .json()
            .with_writer(writer)
            .with_current_span(false)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };
    let console_layer = fmt::layer().with_writer(std::io::stderr).compact();

    tracing_subscriber::registry()
        .with(build_filter(&settings.level, verbose))
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| ConvoError::Internal(format!("failed to install subscriber: {e}")))?;

    tracing::info!(dir = %log_dir.display(), json = settings.json_output, "logging initialized");
    Ok(LogGuard { _guard: guard })
}

/// Console-only logger for tests and one-shot tools. Later calls are no-ops.
pub fn init_console_logging(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(build_filter(level, false))
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
