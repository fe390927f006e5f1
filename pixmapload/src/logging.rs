//! Logging setup for applications embedding the pixmap loader.
//!
//! The library only emits `tracing` events: loader lifecycle at INFO,
//! coalescing and eviction decisions at DEBUG, memo hits at TRACE. An
//! application that has no subscriber of its own can install this one:
//! - Writes to `logs/pixmapload.log` (cleared on session start)
//! - Optionally mirrors to stdout
//! - Filter from RUST_LOG, falling back to [`DEFAULT_FILTER`]
//!
//! ```ignore
//! let _guard = pixmapload::logging::init_logging(
//!     pixmapload::logging::default_log_dir(),
//!     pixmapload::logging::default_log_file(),
//!     true,
//! )?;
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter used when RUST_LOG is not set.
pub const DEFAULT_FILTER: &str = "pixmapload=info";

/// Keeps the non-blocking file writer alive.
///
/// Dropping the guard flushes and closes the log file.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
    log_path: PathBuf,
}

impl LoggingGuard {
    /// Path of the active log file.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

/// Install the global subscriber.
///
/// Creates `log_dir` if needed and truncates `log_file` so each session
/// starts with an empty log. With `stdout` set, events are also printed
/// to the terminal.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the log file
/// cannot be truncated.
pub fn init_logging(
    log_dir: impl AsRef<Path>,
    log_file: &str,
    stdout: bool,
) -> Result<LoggingGuard, io::Error> {
    let log_dir = log_dir.as_ref();
    let log_path = prepare_log_file(log_dir, log_file)?;

    let file_appender = tracing_appender::rolling::never(log_dir, log_file);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true);

    let stdout_layer = stdout.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(io::stdout)
            .with_ansi(true)
            .compact()
    });

    tracing_subscriber::registry()
        .with(env_filter())
        .with(file_layer)
        .with(stdout_layer)
        .init();

    Ok(LoggingGuard {
        _file_guard: file_guard,
        log_path,
    })
}

/// Create the log directory and truncate the log file.
fn prepare_log_file(log_dir: &Path, log_file: &str) -> Result<PathBuf, io::Error> {
    fs::create_dir_all(log_dir)?;
    let log_path = log_dir.join(log_file);
    fs::write(&log_path, "")?;
    Ok(log_path)
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Default log directory, relative to the working directory.
pub fn default_log_dir() -> &'static str {
    "logs"
}

/// Default log file name.
pub fn default_log_file() -> &'static str {
    "pixmapload.log"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths() {
        assert_eq!(default_log_dir(), "logs");
        assert_eq!(default_log_file(), "pixmapload.log");
    }

    #[test]
    fn test_prepare_creates_nested_directory() {
        let root = tempfile::tempdir().unwrap();
        let log_dir = root.path().join("deep/nested");

        let path = prepare_log_file(&log_dir, "pixmapload.log").unwrap();

        assert_eq!(path, log_dir.join("pixmapload.log"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_prepare_truncates_previous_session() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("pixmapload.log");
        fs::write(&path, "old session").unwrap();

        prepare_log_file(root.path(), "pixmapload.log").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_prepare_fails_when_directory_is_a_file() {
        let root = tempfile::tempdir().unwrap();
        let blocker = root.path().join("logs");
        fs::write(&blocker, "not a directory").unwrap();

        assert!(prepare_log_file(&blocker, "pixmapload.log").is_err());
    }

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }

    // init_logging installs a process-wide subscriber and is not exercised here.
}
