//! One-way rsync mirroring of the local root onto the remote target.
//!
//! The same argument vector serves both the initial terminal-attached mirror
//! and every incremental run, so the two can never disagree on excludes or
//! delete semantics.

use std::borrow::Cow;
use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use shell_escape::unix::escape;
use thiserror::Error;
use tracing::debug;

use crate::config::SessionConfig;
use crate::control::ControlPath;
use crate::process::{CommandOutput, CommandRunner, Launcher, ProcessError, ProcessExit, render_argv};
use crate::target::SessionTarget;

/// Paths that are never transferred and never wake the syncer.
pub const EXCLUDE_SET: [&str; 3] = [".git/", "bin/", "pkg/"];

/// Returns the `--exclude=` flags for [`EXCLUDE_SET`].
pub fn exclude_args() -> impl Iterator<Item = OsString> {
    EXCLUDE_SET
        .iter()
        .map(|pattern| OsString::from(format!("--exclude={pattern}")))
}

/// Errors raised by mirror runs.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum MirrorError {
    /// Raised when the local root is absent or not a directory.
    #[error("sync source directory missing: {path}")]
    MissingSource {
        /// Path that was expected to be mirrored.
        path: Utf8PathBuf,
    },
    /// Raised when rsync cannot be started or waited on.
    #[error(transparent)]
    Process(#[from] ProcessError),
    /// Raised when rsync exits unsuccessfully.
    #[error("{program} exited with {status}")]
    Failed {
        /// Mirror program that failed.
        program: String,
        /// Exit status reported by the OS.
        status: ProcessExit,
    },
}

/// Checks that `path` names an existing directory.
///
/// # Errors
///
/// Returns [`MirrorError::MissingSource`] otherwise.
pub fn check_source(path: &Utf8Path) -> Result<(), MirrorError> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(MirrorError::MissingSource {
            path: path.to_path_buf(),
        })
    }
}

/// A fully built rsync invocation over the control channel.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MirrorCommand {
    program: String,
    args: Vec<OsString>,
}

impl MirrorCommand {
    /// Builds the mirror of `local_root` onto `target` through `control`.
    ///
    /// The source is passed exactly as given: `src` lands as
    /// `<remotePath>/src`, while `src/` mirrors its contents into
    /// `<remotePath>` and deletes whatever else is there.
    #[must_use]
    pub fn new(
        config: &SessionConfig,
        local_root: &Utf8Path,
        target: &SessionTarget,
        control: &ControlPath,
    ) -> Self {
        let mut args = vec![OsString::from("-rlptz"), OsString::from("--delete-during")];
        args.extend(exclude_args());
        args.push(OsString::from(format!(
            "--rsh={}",
            remote_shell(&config.ssh_bin, control)
        )));
        args.push(OsString::from(local_root.as_str()));
        args.push(OsString::from(target.mirror_destination()));
        Self {
            program: config.rsync_bin.clone(),
            args,
        }
    }

    /// Returns the rsync executable.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Returns the rsync argument vector.
    #[must_use]
    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Runs the mirror attached to the operator's terminal and waits.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Process`] when rsync cannot run and
    /// [`MirrorError::Failed`] when it exits unsuccessfully.
    pub async fn run_attached<L>(&self, launcher: &L) -> Result<(), MirrorError>
    where
        L: Launcher + ?Sized,
    {
        debug!(argv = %render_argv(&self.program, &self.args), "rsync command");
        let status = launcher.launch(&self.program, &self.args).await?;
        if status.is_success() {
            return Ok(());
        }
        Err(MirrorError::Failed {
            program: self.program.clone(),
            status,
        })
    }

    /// Runs the mirror with stdout and stderr captured.
    ///
    /// A non-zero exit is not an error here; callers inspect the returned
    /// output so they can report what rsync printed.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Process`] when rsync cannot run.
    pub async fn run_captured<R>(&self, runner: &R) -> Result<CommandOutput, MirrorError>
    where
        R: CommandRunner + ?Sized,
    {
        Ok(runner.run(&self.program, &self.args).await?)
    }
}

/// Returns rsync's `--rsh` value: plain ssh multiplexed over `control`.
#[must_use]
pub fn remote_shell(ssh_bin: &str, control: &ControlPath) -> String {
    let socket = escape(Cow::Borrowed(control.as_str()));
    format!(
        "{ssh_bin} -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null -o ControlPath={socket}"
    )
}

#[cfg(test)]
mod tests;
