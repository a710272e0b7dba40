//! Reverse-order release of everything a session acquired.
//!
//! Steps are registered as resources come up and run last-in, first-out:
//! the syncer is quiesced before the watcher stops, and the watcher stops
//! before the control channel closes. Background tasks are joined once every
//! step has run.

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::control::ControlChannel;
use crate::process::Launcher;
use crate::ticket::{Quiesce, SyncTicket};
use crate::watch::WatcherHandle;

/// A single release action.
#[derive(Debug)]
pub enum TeardownStep {
    /// Ask the control master to exit.
    CloseControl(ControlChannel),
    /// Interrupt the watcher and wait for it.
    StopWatcher(WatcherHandle),
    /// Wait out any in-flight mirror and withdraw the ticket.
    QuiesceSyncer(SyncTicket),
}

impl TeardownStep {
    /// Short name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CloseControl(_) => "close control channel",
            Self::StopWatcher(_) => "stop watcher",
            Self::QuiesceSyncer(_) => "quiesce syncer",
        }
    }

    async fn run<L>(self, launcher: &L)
    where
        L: Launcher + ?Sized,
    {
        match self {
            Self::CloseControl(channel) => {
                channel.close(launcher).await;
            }
            Self::StopWatcher(handle) => {
                info!("Stopping listener");
                match handle.stop().await {
                    Ok(status) => debug!(%status, "watcher stopped"),
                    Err(err) => warn!(error = %err, "failed to stop watcher"),
                }
            }
            Self::QuiesceSyncer(ticket) => {
                info!("Stopping syncer");
                if ticket.quiesce().await == Quiesce::AlreadyWithdrawn {
                    debug!("syncer had already stopped");
                }
            }
        }
    }

    fn run_blocking(self) {
        match self {
            Self::CloseControl(channel) => {
                let state = channel.close_blocking();
                debug!(%state, "control channel released");
            }
            Self::StopWatcher(handle) => {
                if let Err(err) = handle.interrupt() {
                    warn!(error = %err, "failed to interrupt watcher");
                }
            }
            Self::QuiesceSyncer(ticket) => ticket.withdraw_now(),
        }
    }
}

#[derive(Debug)]
struct TrackedTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

/// LIFO registry of teardown steps plus the background tasks to join.
///
/// Dropping a registry that still holds steps runs a synchronous
/// best-effort cleanup instead, so a panic or a cancelled session still
/// releases the control master.
#[derive(Debug, Default)]
pub struct Teardown {
    steps: Vec<TeardownStep>,
    tasks: Vec<TrackedTask>,
}

impl Teardown {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `step` to run before every step registered earlier.
    pub fn register(&mut self, step: TeardownStep) {
        debug!(step = step.name(), "registered teardown step");
        self.steps.push(step);
    }

    /// Tracks a background task to be joined after the steps have run.
    pub fn track(&mut self, name: &'static str, handle: JoinHandle<()>) {
        self.tasks.push(TrackedTask { name, handle });
    }

    /// Returns the names of pending steps in the order they will run.
    #[must_use]
    pub fn pending(&self) -> Vec<&'static str> {
        self.steps.iter().rev().map(TeardownStep::name).collect()
    }

    /// Returns `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty() && self.tasks.is_empty()
    }

    /// Runs every step in reverse registration order, then joins the tracked
    /// tasks. Step failures are logged and never stop the unwind.
    pub async fn unwind<L>(mut self, launcher: &L)
    where
        L: Launcher + ?Sized,
    {
        while let Some(step) = self.steps.pop() {
            step.run(launcher).await;
        }
        while let Some(task) = self.tasks.pop() {
            if let Err(err) = task.handle.await {
                warn!(task = task.name, error = %err, "background task ended abnormally");
            }
        }
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        if self.is_empty() {
            return;
        }
        warn!("session ended without an orderly teardown; cleaning up");
        while let Some(step) = self.steps.pop() {
            step.run_blocking();
        }
        for task in self.tasks.drain(..) {
            task.handle.abort();
        }
    }
}
