//! Serialized incremental mirroring driven by watcher events.

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::mirror::{MirrorCommand, MirrorError};
use crate::process::{CommandRunner, ProcessExit};
use crate::ticket::SyncTicket;
use crate::watch::EventStream;

/// Errors that end the syncer. They never end the session.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SyncerError {
    /// Raised when the mirror cannot be started.
    #[error(transparent)]
    Mirror(#[from] MirrorError),
    /// Raised when an incremental mirror exits unsuccessfully.
    #[error("incremental sync with {program} failed: {status}")]
    Failed {
        /// Mirror program that failed.
        program: String,
        /// Exit status reported by the OS.
        status: ProcessExit,
    },
}

/// Why the syncer stopped without an error.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncerExit {
    /// The watcher's output ended.
    EventsClosed,
    /// Teardown withdrew the ticket.
    Withdrawn,
}

/// Runs one mirror per watcher batch, never two at once.
#[derive(Debug)]
pub struct Syncer<R> {
    mirror: MirrorCommand,
    runner: R,
    ticket: SyncTicket,
}

impl<R> Syncer<R>
where
    R: CommandRunner,
{
    /// Creates a syncer that runs `mirror` through `runner` under `ticket`.
    #[must_use]
    pub const fn new(mirror: MirrorCommand, runner: R, ticket: SyncTicket) -> Self {
        Self {
            mirror,
            runner,
            ticket,
        }
    }

    /// Consumes `events` until the stream closes, the ticket is withdrawn, or
    /// a mirror fails. A failure withdraws the ticket before returning.
    ///
    /// # Errors
    ///
    /// Returns [`SyncerError`] for the first failed mirror.
    pub async fn run(self, mut events: EventStream) -> Result<SyncerExit, SyncerError> {
        loop {
            let Some(event) = events.next().await else {
                info!("events closed");
                return Ok(SyncerExit::EventsClosed);
            };
            debug!("syncing: '{}'", event.batch());

            let Some(guard) = self.ticket.acquire().await else {
                debug!("sync ticket withdrawn; syncer stopping");
                return Ok(SyncerExit::Withdrawn);
            };
            match self.sync_once().await {
                Ok(()) => {
                    drop(guard);
                    debug!("...sync ok");
                }
                Err(err) => {
                    error!(error = %err, "incremental sync failed");
                    info!("syncer terminating");
                    guard.withdraw();
                    return Err(err);
                }
            }
        }
    }

    async fn sync_once(&self) -> Result<(), SyncerError> {
        let output = self.mirror.run_captured(&self.runner).await?;
        if output.is_success() {
            return Ok(());
        }
        error!("rsync output:\n{}", output.combined());
        Err(SyncerError::Failed {
            program: self.mirror.program().to_owned(),
            status: output.exit(),
        })
    }
}

impl<R> Syncer<R>
where
    R: CommandRunner + 'static,
{
    /// Runs the syncer on its own task. Its outcome is logged by
    /// [`Syncer::run`]; the handle only reports completion.
    #[must_use]
    pub fn spawn(self, events: EventStream) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Ok(exit) = self.run(events).await {
                debug!(?exit, "syncer stopped");
            }
        })
    }
}
