/*!
 * Logging and tracing initialization
 */

use std::fs::File;
use std::path::Path;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::error::{Result, SyncError};

/// Initialize structured logging.
///
/// Stdout gets a compact human-readable layer; a log file gets JSON lines
/// suitable for external rotation and ingestion.
pub fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("updraft={}", log_level)))
        .map_err(|e| SyncError::Config(format!("Failed to create log filter: {}", e)))?;

    if let Some(log_path) = log_file {
        init_file_logging(log_path, env_filter)?;
    } else {
        init_stdout_logging(env_filter);
    }

    Ok(())
}

fn init_stdout_logging(env_filter: EnvFilter) {
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_span_events(FmtSpan::NONE)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn init_file_logging(log_path: &Path, env_filter: EnvFilter) -> Result<()> {
    // Append, never truncate: one append-safe log per scheduler instance,
    // rotated externally.
    let file = File::options()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|e| SyncError::Config(format!("Failed to open log file: {}", e)))?;

    let fmt_layer = fmt::layer()
        .with_writer(file)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false)
        .json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    Ok(())
}

/// Initialize logging with custom format for testing
#[cfg(test)]
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("updraft=debug"));

        let fmt_layer = fmt::layer().with_test_writer().with_target(false).compact();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .ok();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_file_logging_appends() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(temp_file.path(), b"existing line\n").unwrap();

        // Opening for logging must not truncate what an earlier instance
        // wrote.
        let file = File::options()
            .create(true)
            .append(true)
            .open(temp_file.path())
            .unwrap();
        drop(file);

        let contents = std::fs::read_to_string(temp_file.path()).unwrap();
        assert!(contents.contains("existing line"));
    }

    #[test]
    fn test_test_logging_initializes_once() {
        init_test_logging();
        init_test_logging();
    }
}
