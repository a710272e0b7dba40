//! Core process types and the captured command runner abstraction.

use std::ffi::OsString;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use super::util::render_argv;

/// Future returned by process operations.
pub type ProcessFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProcessError>> + Send + 'a>>;

/// Errors raised while locating, starting, or waiting on a child process.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProcessError {
    /// Raised when a bare executable name is not found on `PATH`.
    #[error("{program} not found on PATH")]
    Resolution {
        /// Executable name that failed to resolve.
        program: String,
    },
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when waiting on a running child fails.
    #[error("failed to wait for {program}: {message}")]
    Wait {
        /// Command that was being waited on.
        program: String,
        /// Operating system error string.
        message: String,
    },
}

/// Termination status of a child process.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProcessExit {
    /// Exit code reported by the process, if it exited normally.
    pub code: Option<i32>,
}

impl ProcessExit {
    /// Builds an exit report from a raw exit code.
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        Self { code: Some(code) }
    }

    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

impl From<ExitStatus> for ProcessExit {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit status {code}"),
            None => f.write_str("terminated by signal"),
        }
    }
}

/// Result of running an external command with captured output.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Returns the exit status as a [`ProcessExit`].
    #[must_use]
    pub const fn exit(&self) -> ProcessExit {
        ProcessExit { code: self.code }
    }

    /// Returns stdout followed by stderr, as a single diagnostic buffer.
    #[must_use]
    pub fn combined(&self) -> String {
        let mut buffer = String::with_capacity(self.stdout.len() + self.stderr.len());
        buffer.push_str(&self.stdout);
        buffer.push_str(&self.stderr);
        buffer
    }
}

/// Abstraction over captured command execution to support fakes in tests.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Spawn`] if the command cannot be started and
    /// [`ProcessError::Wait`] if its output cannot be collected.
    fn run<'a>(&'a self, program: &'a str, args: &'a [OsString])
    -> ProcessFuture<'a, CommandOutput>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run<'a>(
        &'a self,
        program: &'a str,
        args: &'a [OsString],
    ) -> ProcessFuture<'a, CommandOutput> {
        Box::pin(async move {
            debug!(argv = %render_argv(program, args), "running captured process");
            let child = Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .map_err(|err| ProcessError::Spawn {
                    program: program.to_owned(),
                    message: err.to_string(),
                })?;
            let output = child
                .wait_with_output()
                .await
                .map_err(|err| ProcessError::Wait {
                    program: program.to_owned(),
                    message: err.to_string(),
                })?;

            Ok(CommandOutput {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        })
    }
}
