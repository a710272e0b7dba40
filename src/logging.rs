//! Diagnostic log routing.
//!
//! Events go to stdout by default or to a truncated log file when one is
//! named. `SYNC_SPACE_LOG` replaces the level filter entirely.

use std::fs::File;
use std::io::IsTerminal;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

/// Environment variable holding a full `tracing` filter directive.
pub const LOG_FILTER_ENV: &str = "SYNC_SPACE_LOG";

/// Where and how verbosely to log.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LogConfig {
    /// Emit debug lines (spawned argv, resolved address, per-event trace).
    pub verbose: bool,
    /// Destination file; `None` logs to stdout.
    pub file: Option<Utf8PathBuf>,
}

impl LogConfig {
    /// Returns the level used when no filter override is set.
    #[must_use]
    pub const fn level(&self) -> LevelFilter {
        if self.verbose {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        }
    }
}

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum LogInitError {
    /// Raised when the log file cannot be created.
    #[error("failed to open log file {path}: {source}")]
    Io {
        /// Requested log file.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Raised when a global subscriber is already installed.
    #[error("failed to configure logger: {0}")]
    Configure(String),
}

/// Installs the global subscriber described by `config`.
///
/// # Errors
///
/// Returns [`LogInitError`] when the file cannot be created or a subscriber
/// is already installed.
pub fn init(config: &LogConfig) -> Result<(), LogInitError> {
    let writer = match config.file.as_deref() {
        Some(path) => BoxMakeWriter::new(Mutex::new(create_log_file(path)?)),
        None => BoxMakeWriter::new(std::io::stdout),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(build_env_filter(config.level()))
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(config.file.is_none() && std::io::stdout().is_terminal())
        .with_writer(writer)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| LogInitError::Configure(err.to_string()))
}

fn create_log_file(path: &Utf8Path) -> Result<File, LogInitError> {
    File::create(path).map_err(|source| LogInitError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn build_env_filter(level: LevelFilter) -> EnvFilter {
    std::env::var(LOG_FILTER_ENV).map_or_else(
        |_| EnvFilter::default().add_directive(level.into()),
        EnvFilter::new,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    #[case(false, LevelFilter::INFO)]
    #[case(true, LevelFilter::DEBUG)]
    fn verbosity_selects_the_level(#[case] verbose: bool, #[case] expected: LevelFilter) {
        let config = LogConfig {
            verbose,
            file: None,
        };
        assert_eq!(config.level(), expected);
    }

    #[rstest]
    fn log_file_is_truncated() {
        let tmp = TempDir::new().expect("tempdir");
        let path = Utf8PathBuf::from_path_buf(tmp.path().join("session.log"))
            .expect("utf8 temp path");
        std::fs::write(&path, "stale contents").expect("seed log file");

        drop(create_log_file(&path).expect("log file should open"));

        assert_eq!(std::fs::read_to_string(&path).expect("read log"), "");
    }

    #[rstest]
    fn unwritable_log_file_is_reported() {
        let tmp = TempDir::new().expect("tempdir");
        let path = Utf8PathBuf::from_path_buf(tmp.path().join("missing").join("session.log"))
            .expect("utf8 temp path");

        let err = create_log_file(&path).expect_err("parent does not exist");
        assert!(matches!(err, LogInitError::Io { .. }), "got {err:?}");
    }
}
