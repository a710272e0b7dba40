//! The session lifecycle: tunnel, lookup, initial mirror, watcher, syncer,
//! shell, and teardown.
//!
//! Every resource is registered with the [`Teardown`] registry as soon as it
//! exists, so a failure at any phase releases exactly what was acquired so
//! far, in reverse order.

use std::future::Future;

use camino::Utf8Path;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, SessionConfig};
use crate::control::{ControlError, ControlSocket};
use crate::identity::LocalUser;
use crate::mirror::{MirrorCommand, MirrorError, check_source};
use crate::process::{CommandRunner, Launcher, ProcessError, ProcessExit};
use crate::provider::{EndpointError, ProviderCli};
use crate::syncer::Syncer;
use crate::target::{RemoteSpec, SessionTarget, TargetError};
use crate::teardown::{Teardown, TeardownStep};
use crate::ticket::SyncTicket;
use crate::watch::{WatchCommand, WatcherError};

/// Errors that end a session before or while starting the shell.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SessionError {
    /// Raised when the settings are unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Raised when the remote target is malformed.
    #[error(transparent)]
    Target(#[from] TargetError),
    /// Raised when the control channel cannot be brought up.
    #[error(transparent)]
    Transport(#[from] ControlError),
    /// Raised when the host's address cannot be resolved.
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
    /// Raised when the local root is unusable or the initial mirror fails.
    #[error(transparent)]
    Mirror(#[from] MirrorError),
    /// Raised when the watcher cannot be started.
    #[error(transparent)]
    Watcher(#[from] WatcherError),
    /// Raised when the interactive shell cannot be started.
    #[error("remote shell failed: {0}")]
    Shell(ProcessError),
    /// Raised when a termination signal aborts startup before the shell.
    #[error("interrupted by {signal} before the shell started")]
    Aborted {
        /// Name of the signal that arrived.
        signal: &'static str,
    },
}

impl SessionError {
    /// Names the phase that failed, matching the phase log lines.
    #[must_use]
    pub const fn phase(&self) -> &'static str {
        match self {
            Self::Config(_)
            | Self::Target(_)
            | Self::Mirror(MirrorError::MissingSource { .. })
            | Self::Aborted { .. } => "startup",
            Self::Transport(_) => "tunnel",
            Self::Endpoint(_) => "host lookup",
            Self::Mirror(_) => "initial sync",
            Self::Watcher(_) => "listener",
            Self::Shell(_) => "shell",
        }
    }
}

/// How a session that did not fail came to an end.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionOutcome {
    /// The interactive shell exited, successfully or not.
    ShellExited(ProcessExit),
    /// A termination signal arrived while the shell was running.
    Interrupted(&'static str),
}

/// One remote workspace session.
#[derive(Debug)]
pub struct Session<L, R> {
    config: SessionConfig,
    user: LocalUser,
    launcher: L,
    runner: R,
}

impl<L, R> Session<L, R>
where
    L: Launcher,
    R: CommandRunner + Clone + 'static,
{
    /// Assembles a session from its settings, operator, and process seams.
    #[must_use]
    pub const fn new(config: SessionConfig, user: LocalUser, launcher: L, runner: R) -> Self {
        Self {
            config,
            user,
            launcher,
            runner,
        }
    }

    /// Mirrors `local_root` onto `target` and runs the shell until it exits
    /// or the process receives SIGINT, SIGTERM, or SIGHUP.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when a phase before the shell fails or a
    /// signal arrives before the shell starts. The registered teardown has
    /// run by the time this returns.
    pub async fn run(
        &self,
        local_root: &Utf8Path,
        target: &str,
    ) -> Result<SessionOutcome, SessionError> {
        self.run_until(local_root, target, termination_signal()).await
    }

    /// Like [`Session::run`], but ends early when `shutdown` completes
    /// instead of on a signal. The future resolves to the reason logged.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when a phase before the shell fails, and
    /// [`SessionError::Aborted`] when `shutdown` completes before the shell
    /// has started.
    pub async fn run_until<S>(
        &self,
        local_root: &Utf8Path,
        target: &str,
        shutdown: S,
    ) -> Result<SessionOutcome, SessionError>
    where
        S: Future<Output = &'static str>,
    {
        let mut teardown = Teardown::new();
        let mut shell_started = false;
        let result = tokio::select! {
            result = self.drive(local_root, target, &mut teardown, &mut shell_started) => {
                result.map(SessionOutcome::ShellExited)
            }
            reason = shutdown => {
                info!("Interrupted by {reason}");
                if shell_started {
                    Ok(SessionOutcome::Interrupted(reason))
                } else {
                    Err(SessionError::Aborted { signal: reason })
                }
            }
        };
        if let Err(err) = &result {
            error!("{} failed: {err}", err.phase());
        }
        teardown.unwind(&self.launcher).await;
        result
    }

    async fn drive(
        &self,
        local_root: &Utf8Path,
        target: &str,
        teardown: &mut Teardown,
        shell_started: &mut bool,
    ) -> Result<ProcessExit, SessionError> {
        info!("Syncing '{local_root}' to '{target}'");
        self.config.validate()?;
        let remote = RemoteSpec::parse(target, &self.user.login)?;
        check_source(local_root)?;
        let provider = ProviderCli::new(&self.config);

        info!("Starting tunnel");
        let socket = ControlSocket::prepare(&self.config.control_dir_for(&self.user))?;
        let channel = socket.open(&self.launcher, &provider, &remote).await?;
        let control = channel.control_path();
        teardown.register(TeardownStep::CloseControl(channel));

        let ip = provider.resolve_ip(&self.runner, &remote.host).await?;
        debug!("host IP: {ip}");
        let target = SessionTarget::new(remote, ip);
        let mirror = MirrorCommand::new(&self.config, local_root, &target, &control);

        info!("Starting initial sync");
        mirror.run_attached(&self.launcher).await?;
        info!("Initial sync complete");

        info!("Starting listener on {local_root}");
        let watcher = WatchCommand::new(&self.config, local_root).spawn()?;
        teardown.register(TeardownStep::StopWatcher(watcher.handle));
        teardown.track("watcher reader", watcher.reader);

        info!("Starting syncer");
        let ticket = SyncTicket::new();
        let syncer = Syncer::new(mirror, self.runner.clone(), ticket.clone());
        teardown.track("syncer", syncer.spawn(watcher.events));
        teardown.register(TeardownStep::QuiesceSyncer(ticket));

        info!("Starting shell");
        *shell_started = true;
        let shell_args = provider.shell_args(target.remote(), control.as_str());
        let status = self
            .launcher
            .launch(provider.program(), &shell_args)
            .await
            .map_err(SessionError::Shell)?;
        info!("Shell exited: {status}");
        Ok(status)
    }
}

/// Resolves when SIGINT, SIGTERM, or SIGHUP arrives, yielding its name.
/// Never resolves if the handlers cannot be installed.
pub async fn termination_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let (Ok(mut interrupt), Ok(mut terminate), Ok(mut hangup)) = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
        signal(SignalKind::hangup()),
    ) else {
        warn!("cannot install signal handlers; only the shell can end the session");
        return std::future::pending().await;
    };
    tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = hangup.recv() => "SIGHUP",
    }
}
