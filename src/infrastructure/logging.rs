use std::fs;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::domain::config::LoggingConfig;
use crate::domain::DomainError;

const LOG_FILE_PREFIX: &str = "refyna";
const LOG_FILE_SUFFIX: &str = "log";

/// Default directive for a configured level.
fn directive(level: &str) -> String {
    format!("refyna={level},refyna_lib={level},warn")
}

/// Install the global subscriber: console output plus an optional JSON file
/// rotated daily under `logs_dir`.
///
/// `RUST_LOG` overrides the console filter. The returned guard flushes the
/// file writer on drop and must live as long as the process logs.
pub fn init_logging(logs_dir: &Path, config: &LoggingConfig) -> Result<Option<WorkerGuard>, DomainError> {
    let level = config.level.as_str();
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive(level)));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_file(false)
        .with_span_events(FmtSpan::NONE)
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    if !config.file_logging {
        let _ = tracing_subscriber::registry().with(console_layer).try_init();
        tracing::debug!(level = level, "Console logging initialized");
        return Ok(None);
    }

    fs::create_dir_all(logs_dir)?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix(LOG_FILE_SUFFIX)
        .max_log_files(config.max_files.max(1) as usize)
        .build(logs_dir)
        .map_err(|e| DomainError::Config(format!("Cannot open log directory: {e}")))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .json()
        .with_span_events(FmtSpan::CLOSE)
        .with_filter(EnvFilter::new(directive(level)));

    if tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .is_ok()
    {
        tracing::debug!(logs_dir = ?logs_dir, level = level, max_files = config.max_files, "File logging initialized");
    }
    Ok(Some(guard))
}
