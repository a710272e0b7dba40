//! Lifecycle of the multiplexed SSH control channel.
//!
//! A [`ControlSocket`] is a prepared but unopened channel. Opening it
//! consumes the socket and yields a [`ControlChannel`], which cannot be
//! cloned and is consumed by closing. Later ssh invocations only receive a
//! [`ControlPath`], which only an open channel hands out.

use std::ffi::OsString;
use std::fmt;
use std::process::{Command, Stdio};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::process::{Launcher, ProcessError, ProcessExit};
use crate::provider::ProviderCli;
use crate::target::RemoteSpec;

/// Socket name template materialised by ssh: local user, remote user, remote
/// host, and remote port.
pub const SOCKET_TEMPLATE: &str = "%L-%r@%h:%p";

/// Observable state of a control channel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChannelState {
    /// Socket directory prepared; no master yet.
    Pending,
    /// Control master running and accepting multiplexed sessions.
    Open,
    /// Exit request sent to the master.
    Closed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Open => "open",
            Self::Closed => "closed",
        })
    }
}

/// Errors raised while bringing the control channel up.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ControlError {
    /// Raised when the socket directory cannot be created.
    #[error("failed to create control directory {path}: {message}")]
    Directory {
        /// Directory that could not be created.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the provider's SSH wrapper cannot be started.
    #[error("failed to start control master: {0}")]
    Process(#[from] ProcessError),
    /// Raised when the SSH wrapper exits unsuccessfully.
    #[error("control master for {user_host} failed with {status}")]
    Refused {
        /// Target the master was opened against.
        user_host: String,
        /// Exit status of the wrapper.
        status: ProcessExit,
    },
}

/// A control socket whose directory exists but whose master is not running.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ControlSocket {
    template: Utf8PathBuf,
}

impl ControlSocket {
    /// Creates `dir` if needed and returns the socket template inside it.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Directory`] when `dir` cannot be created.
    pub fn prepare(dir: &Utf8Path) -> Result<Self, ControlError> {
        Dir::create_ambient_dir_all(dir, ambient_authority()).map_err(|err| {
            ControlError::Directory {
                path: dir.to_path_buf(),
                message: err.to_string(),
            }
        })?;
        Ok(Self {
            template: dir.join(SOCKET_TEMPLATE),
        })
    }

    /// Returns the socket path template.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.template
    }

    /// Returns [`ChannelState::Pending`].
    #[must_use]
    pub const fn state(&self) -> ChannelState {
        ChannelState::Pending
    }

    /// Starts the control master and waits for the wrapper to background.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Process`] when the wrapper cannot run and
    /// [`ControlError::Refused`] when it exits unsuccessfully.
    pub async fn open<L>(
        self,
        launcher: &L,
        provider: &ProviderCli,
        remote: &RemoteSpec,
    ) -> Result<ControlChannel, ControlError>
    where
        L: Launcher + ?Sized,
    {
        let socket = self.template.as_str();
        let args = provider.open_master_args(remote, socket);
        let status = launcher.launch(provider.program(), &args).await?;
        if !status.is_success() {
            return Err(ControlError::Refused {
                user_host: remote.user_host(),
                status,
            });
        }

        debug!(socket, "control master is up");
        Ok(ControlChannel {
            close_program: provider.program().to_owned(),
            close_args: provider.close_master_args(remote, socket),
            template: self.template,
        })
    }
}

/// The `ControlPath` of an opened master, handed to the mirror and shell.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ControlPath(Utf8PathBuf);

impl ControlPath {
    /// Returns the socket path template.
    #[must_use]
    pub fn as_path(&self) -> &Utf8Path {
        &self.0
    }

    /// Returns the socket path template as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for ControlPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An open control channel. Owned by whoever will close it.
#[derive(Debug, Eq, PartialEq)]
pub struct ControlChannel {
    template: Utf8PathBuf,
    close_program: String,
    close_args: Vec<OsString>,
}

impl ControlChannel {
    /// Returns the socket path template passed as `ControlPath`.
    #[must_use]
    pub fn socket_path(&self) -> &Utf8Path {
        &self.template
    }

    /// Returns the path later ssh invocations multiplex over.
    #[must_use]
    pub fn control_path(&self) -> ControlPath {
        ControlPath(self.template.clone())
    }

    /// Returns [`ChannelState::Open`].
    #[must_use]
    pub const fn state(&self) -> ChannelState {
        ChannelState::Open
    }

    /// Asks the control master to exit. Failures are logged, not returned;
    /// a stale socket is harmless because its name embeds host and port.
    pub async fn close<L>(self, launcher: &L) -> ChannelState
    where
        L: Launcher + ?Sized,
    {
        info!("Stopping tunnel");
        match launcher.launch(&self.close_program, &self.close_args).await {
            Ok(status) if status.is_success() => debug!("control master stopped"),
            Ok(status) => warn!(%status, "control master exit request failed"),
            Err(err) => warn!(error = %err, "control master exit request failed"),
        }
        ChannelState::Closed
    }

    /// Synchronous variant of [`ControlChannel::close`] for unwinding paths
    /// that cannot await.
    #[must_use]
    pub fn close_blocking(self) -> ChannelState {
        info!("Stopping tunnel");
        let status = Command::new(&self.close_program)
            .args(&self.close_args)
            .stdin(Stdio::null())
            .status();
        match status {
            Ok(status) if status.success() => debug!("control master stopped"),
            Ok(status) => warn!(%status, "control master exit request failed"),
            Err(err) => warn!(error = %err, "control master exit request failed"),
        }
        ChannelState::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedLauncher, session_config};
    use rstest::rstest;
    use tempfile::TempDir;

    fn utf8(tmp: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf8 temp path")
    }

    fn remote() -> RemoteSpec {
        RemoteSpec::parse("alice@vm1:", "bob").expect("target should parse")
    }

    #[rstest]
    fn prepare_creates_missing_directory_idempotently() {
        let tmp = TempDir::new().expect("tempdir");
        let dir = utf8(&tmp).join(".ssh").join("ctl");

        let socket = ControlSocket::prepare(&dir).expect("directory should be created");
        assert!(dir.is_dir());
        assert_eq!(socket.path(), dir.join(SOCKET_TEMPLATE).as_path());
        assert_eq!(socket.state(), ChannelState::Pending);

        ControlSocket::prepare(&dir).expect("existing directory is fine");
    }

    #[rstest]
    fn prepare_reports_unusable_directory() {
        let tmp = TempDir::new().expect("tempdir");
        let file = utf8(&tmp).join("occupied");
        std::fs::write(&file, "not a directory").expect("write file");

        let err = ControlSocket::prepare(&file.join("ctl")).expect_err("parent is a file");
        assert!(matches!(err, ControlError::Directory { .. }), "got {err:?}");
    }

    #[rstest]
    #[tokio::test]
    async fn open_then_close_issues_master_commands() {
        let tmp = TempDir::new().expect("tempdir");
        let launcher = ScriptedLauncher::new();
        launcher.push_exit(0);
        launcher.push_exit(0);
        let provider = ProviderCli::new(&session_config());
        let socket = ControlSocket::prepare(&utf8(&tmp)).expect("prepare");

        let channel = socket
            .open(&launcher, &provider, &remote())
            .await
            .expect("master should open");
        assert_eq!(channel.state(), ChannelState::Open);
        let control = channel.control_path();
        assert_eq!(channel.close(&launcher).await, ChannelState::Closed);
        assert_eq!(control.as_path(), utf8(&tmp).join(SOCKET_TEMPLATE).as_path());

        let commands = launcher.command_strings();
        let [open_cmd, close_cmd] = commands.as_slice() else {
            panic!("expected open and close commands, got {commands:?}");
        };
        assert!(open_cmd.contains("--ssh-flag=-nNf"), "{open_cmd}");
        assert!(close_cmd.contains("--ssh-flag=-O exit"), "{close_cmd}");
        assert!(close_cmd.ends_with("alice@vm1"), "{close_cmd}");
    }

    #[rstest]
    #[tokio::test]
    async fn open_fails_when_wrapper_exits_non_zero() {
        let tmp = TempDir::new().expect("tempdir");
        let launcher = ScriptedLauncher::new();
        launcher.push_exit(255);
        let provider = ProviderCli::new(&session_config());
        let socket = ControlSocket::prepare(&utf8(&tmp)).expect("prepare");

        let err = socket
            .open(&launcher, &provider, &remote())
            .await
            .expect_err("master should fail");

        assert_eq!(
            err,
            ControlError::Refused {
                user_host: String::from("alice@vm1"),
                status: ProcessExit::from_code(255),
            }
        );
    }

    #[rstest]
    #[tokio::test]
    async fn close_swallows_launch_failures() {
        let tmp = TempDir::new().expect("tempdir");
        let launcher = ScriptedLauncher::new();
        launcher.push_exit(0);
        launcher.push_spawn_failure();
        let provider = ProviderCli::new(&session_config());
        let channel = ControlSocket::prepare(&utf8(&tmp))
            .expect("prepare")
            .open(&launcher, &provider, &remote())
            .await
            .expect("master should open");

        assert_eq!(channel.close(&launcher).await, ChannelState::Closed);
    }
}
