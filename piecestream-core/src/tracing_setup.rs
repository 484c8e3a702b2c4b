//! Tracing setup for Piecestream
//!
//! Console output follows the level the user picks; a per-run log file under
//! `logs/` always records everything down to TRACE, including which thread
//! (dispatcher, swarm or a stream's delivery worker) emitted each line.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Name of the per-run debug log inside the logs directory.
pub const LOG_FILE_NAME: &str = "piecestream-last-run.log";

/// Errors raised while installing the tracing subscriber.
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("Cannot prepare log file {path}: {source}")]
    LogFile { path: PathBuf, source: io::Error },

    #[error("Tracing subscriber already installed: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

/// Installs a console layer at `console_level` and a TRACE file layer.
///
/// `RUST_LOG` overrides the console filter when set. The file is truncated on
/// every run; `logs_dir` defaults to `./logs`.
///
/// Returns the path of the log file.
///
/// # Errors
///
/// - `TracingError::LogFile` - If the directory or file cannot be created
/// - `TracingError::Install` - If a global subscriber is already set
pub fn init_tracing(console_level: Level, logs_dir: Option<&Path>) -> Result<PathBuf, TracingError> {
    let logs_dir = logs_dir.unwrap_or_else(|| Path::new("logs"));
    let log_path = logs_dir.join(LOG_FILE_NAME);
    let log_file = fs::create_dir_all(logs_dir)
        .and_then(|()| File::create(&log_path))
        .map_err(|source| TracingError::LogFile {
            path: log_path.clone(),
            source,
        })?;

    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_level.to_string()));
    let console_layer = fmt::layer()
        .with_target(false)
        .with_filter(console_filter);

    let file_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(log_file)
        .with_filter(EnvFilter::new("trace"));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::debug!(console = %console_level, log = %log_path.display(), "Tracing initialized");
    Ok(log_path)
}

/// Console verbosity selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliLogLevel {
    Error,
    Warn,
    /// Lifecycle, ports and seeks
    Info,
    /// Buffering progress and window changes
    Debug,
    /// Every engine event and piece
    Trace,
}

const LEVELS: [(CliLogLevel, &str, Level); 5] = [
    (CliLogLevel::Error, "error", Level::ERROR),
    (CliLogLevel::Warn, "warn", Level::WARN),
    (CliLogLevel::Info, "info", Level::INFO),
    (CliLogLevel::Debug, "debug", Level::DEBUG),
    (CliLogLevel::Trace, "trace", Level::TRACE),
];

impl CliLogLevel {
    fn entry(self) -> (CliLogLevel, &'static str, Level) {
        LEVELS[self as usize]
    }

    /// Converts CLI log level to tracing Level enum.
    ///
    /// # Examples
    /// ```
    /// use piecestream_core::tracing_setup::CliLogLevel;
    ///
    /// assert_eq!(CliLogLevel::Debug.as_tracing_level(), tracing::Level::DEBUG);
    /// ```
    pub fn as_tracing_level(self) -> Level {
        self.entry().2
    }
}

impl std::str::FromStr for CliLogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LEVELS
            .iter()
            .find(|(_, name, _)| name.eq_ignore_ascii_case(s))
            .map(|(level, _, _)| *level)
            .ok_or_else(|| format!("Invalid log level: {s}"))
    }
}

impl std::fmt::Display for CliLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.entry().1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_round_trip_through_strings() {
        for (level, name, tracing_level) in LEVELS {
            assert_eq!(level.to_string(), name);
            assert_eq!(name.parse::<CliLogLevel>(), Ok(level));
            assert_eq!(level.as_tracing_level(), tracing_level);
        }
        assert_eq!("WARN".parse::<CliLogLevel>(), Ok(CliLogLevel::Warn));
        assert!("verbose".parse::<CliLogLevel>().is_err());
    }

    #[test]
    fn test_init_tracing_creates_log_file() {
        let logs = tempfile::tempdir().unwrap();
        // Another test may have installed the global subscriber already.
        let _ = init_tracing(Level::WARN, Some(logs.path()));
        assert!(logs.path().join(LOG_FILE_NAME).exists());
    }

    #[test]
    fn test_unwritable_logs_dir_is_reported() {
        let logs = tempfile::tempdir().unwrap();
        let blocker = logs.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();
        let result = init_tracing(Level::INFO, Some(&blocker));
        assert!(matches!(result, Err(TracingError::LogFile { .. })));
    }
}
