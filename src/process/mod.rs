//! Child process plumbing.
//!
//! Two seams live here. The [`Launcher`] starts tools that need the
//! operator's terminal (the control master, the initial mirror, and the
//! interactive shell) with stdin, stdout, and stderr inherited directly from
//! this process. The [`CommandRunner`] starts non-interactive tools and
//! captures their output instead.

use std::env;
use std::ffi::OsString;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::debug;

mod types;
mod util;

pub use types::{
    CommandOutput, CommandRunner, ProcessCommandRunner, ProcessError, ProcessExit, ProcessFuture,
};
pub use util::{expand_tilde, render_argv};

/// Starts terminal-attached processes and waits for them to finish.
pub trait Launcher: Send + Sync {
    /// Spawns `program` attached to the parent's terminal and waits for it.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError`] when the program cannot be resolved, started,
    /// or waited on.
    fn launch<'a>(&'a self, program: &'a str, args: &'a [OsString])
    -> ProcessFuture<'a, ProcessExit>;
}

/// Launcher that hands the parent's stdio descriptors straight to the child.
#[derive(Clone, Copy, Debug, Default)]
pub struct TerminalLauncher;

impl TerminalLauncher {
    /// Spawns `program` with the parent's stdin, stdout, and stderr.
    ///
    /// Bare executable names are resolved through `PATH` before spawning so
    /// a missing tool is reported as [`ProcessError::Resolution`].
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Resolution`] or [`ProcessError::Spawn`].
    pub fn spawn(&self, program: &str, args: &[OsString]) -> Result<TerminalProcess, ProcessError> {
        let path = resolve_executable(program)?;
        debug!(argv = %render_argv(&path.to_string_lossy(), args), "spawning terminal process");
        let child = Command::new(&path)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| ProcessError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

        Ok(TerminalProcess {
            program: program.to_owned(),
            child,
        })
    }
}

impl Launcher for TerminalLauncher {
    fn launch<'a>(
        &'a self,
        program: &'a str,
        args: &'a [OsString],
    ) -> ProcessFuture<'a, ProcessExit> {
        Box::pin(async move { self.spawn(program, args)?.wait().await })
    }
}

/// Handle to a running terminal-attached child.
///
/// Waiting consumes the handle, so a child is reaped exactly once. A handle
/// dropped before it was waited on kills its child.
#[derive(Debug)]
pub struct TerminalProcess {
    program: String,
    child: Child,
}

impl TerminalProcess {
    /// Returns the OS process id while the child is still running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Blocks until the child terminates and returns its exit status.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Wait`] when the OS wait call fails.
    pub async fn wait(mut self) -> Result<ProcessExit, ProcessError> {
        let status = self.child.wait().await.map_err(|err| ProcessError::Wait {
            program: self.program.clone(),
            message: err.to_string(),
        })?;
        Ok(ProcessExit::from(status))
    }
}

/// Resolves `program` to an executable path.
///
/// Names containing a path separator are returned unchanged; bare names are
/// looked up in each `PATH` entry in order.
///
/// # Errors
///
/// Returns [`ProcessError::Resolution`] when no executable file matches.
pub fn resolve_executable(program: &str) -> Result<PathBuf, ProcessError> {
    if program.contains('/') {
        return Ok(PathBuf::from(program));
    }

    env::var_os("PATH")
        .iter()
        .flat_map(env::split_paths)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(|| ProcessError::Resolution {
            program: program.to_owned(),
        })
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}
