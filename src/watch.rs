//! Filesystem watcher process and the event stream it feeds.
//!
//! The watcher runs with `--one-per-batch`, so each stdout line is one
//! debounced batch. A reader task forwards lines into a bounded channel and
//! drops the sender when the watcher's output ends, which closes the stream.

use std::ffi::OsString;
use std::process::Stdio;

use camino::Utf8Path;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::config::SessionConfig;
use crate::mirror::exclude_args;
use crate::process::{ProcessError, ProcessExit, render_argv, resolve_executable};

const EVENT_CHANNEL_CAPACITY: usize = 1;

/// Errors raised while running the watcher.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum WatcherError {
    /// Raised when the watcher cannot be resolved, spawned, or waited on.
    #[error(transparent)]
    Process(#[from] ProcessError),
    /// Raised when the child's stdout pipe is unavailable.
    #[error("{program} started without a stdout pipe")]
    MissingStdout {
        /// Watcher program.
        program: String,
    },
    /// Raised when the interrupt cannot be delivered.
    #[error("failed to interrupt {program} (pid {pid}): {message}")]
    Signal {
        /// Watcher program.
        program: String,
        /// Process id the signal was addressed to.
        pid: u32,
        /// Operating system error string.
        message: String,
    },
}

/// One debounced batch reported by the watcher. The content is informational.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SyncEvent {
    batch: String,
}

impl SyncEvent {
    /// Wraps a raw watcher output line.
    #[must_use]
    pub fn new(batch: impl Into<String>) -> Self {
        Self {
            batch: batch.into(),
        }
    }

    /// Returns the batch descriptor as printed by the watcher.
    #[must_use]
    pub fn batch(&self) -> &str {
        &self.batch
    }
}

/// Receiving half of the event channel.
#[derive(Debug)]
pub struct EventStream {
    events: mpsc::Receiver<SyncEvent>,
}

impl EventStream {
    /// Waits for the next batch. `None` means the watcher's output ended.
    pub async fn next(&mut self) -> Option<SyncEvent> {
        self.events.recv().await
    }
}

/// Creates a bounded event channel: one producer, one consumer.
#[must_use]
pub fn event_channel() -> (mpsc::Sender<SyncEvent>, EventStream) {
    let (sender, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    (sender, EventStream { events })
}

/// The watcher invocation for one local root.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WatchCommand {
    program: String,
    args: Vec<OsString>,
}

impl WatchCommand {
    /// Builds the watcher argv for `local_root` from `config`.
    #[must_use]
    pub fn new(config: &SessionConfig, local_root: &Utf8Path) -> Self {
        let mut args = vec![
            OsString::from("--one-per-batch"),
            OsString::from("--recursive"),
            OsString::from(format!("--latency={}", config.watch_latency_secs)),
        ];
        args.extend(exclude_args());
        args.push(OsString::from(local_root.as_str()));
        Self {
            program: config.watcher_bin.clone(),
            args,
        }
    }

    /// Returns the watcher executable.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Returns the watcher argument vector.
    #[must_use]
    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Starts the watcher with stdout piped and returns its pieces.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::Process`] when the watcher cannot be started
    /// and [`WatcherError::MissingStdout`] when its pipe is unavailable.
    pub fn spawn(&self) -> Result<RunningWatcher, WatcherError> {
        let path = resolve_executable(&self.program)?;
        debug!(argv = %render_argv(&path.to_string_lossy(), &self.args), "spawning watcher");
        let mut child = Command::new(&path)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| ProcessError::Spawn {
                program: self.program.clone(),
                message: err.to_string(),
            })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WatcherError::MissingStdout {
                program: self.program.clone(),
            })?;

        let (sender, events) = event_channel();
        let reader = tokio::spawn(forward_batches(stdout, sender));
        Ok(RunningWatcher {
            handle: WatcherHandle {
                program: self.program.clone(),
                child,
            },
            events,
            reader,
        })
    }
}

/// A started watcher split into the parts that different owners need.
#[derive(Debug)]
pub struct RunningWatcher {
    /// Process handle used by teardown.
    pub handle: WatcherHandle,
    /// Event stream consumed by the syncer.
    pub events: EventStream,
    /// Task forwarding stdout lines into the stream.
    pub reader: JoinHandle<()>,
}

/// Handle to the running watcher process.
#[derive(Debug)]
pub struct WatcherHandle {
    program: String,
    child: Child,
}

impl WatcherHandle {
    /// Sends `SIGINT` to the watcher. A watcher that already exited is left
    /// alone.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::Signal`] when the signal cannot be delivered.
    pub fn interrupt(&self) -> Result<(), WatcherError> {
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        let signal_error = |message: String| WatcherError::Signal {
            program: self.program.clone(),
            pid,
            message,
        };
        let raw = i32::try_from(pid).map_err(|err| signal_error(err.to_string()))?;
        kill(Pid::from_raw(raw), Signal::SIGINT).map_err(|err| signal_error(err.to_string()))
    }

    /// Interrupts the watcher and waits for it to exit.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError`] when the signal or the wait fails. The child
    /// is killed when the handle is dropped on the error path.
    pub async fn stop(mut self) -> Result<ProcessExit, WatcherError> {
        self.interrupt()?;
        let status = self.child.wait().await.map_err(|err| ProcessError::Wait {
            program: self.program.clone(),
            message: err.to_string(),
        })?;
        Ok(ProcessExit::from(status))
    }
}

async fn forward_batches(stdout: ChildStdout, sender: mpsc::Sender<SyncEvent>) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if sender.send(SyncEvent::new(line)).await.is_err() {
                    debug!("event consumer gone; dropping watcher output");
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                error!(error = %err, "watcher output error");
                break;
            }
        }
    }
}
