//! Core library for the `sync-space` remote workspace tool.
//!
//! A session opens a multiplexed SSH control channel to a cloud VM, mirrors a
//! local directory onto it, keeps the mirror current from filesystem watcher
//! events while the operator works in an interactive remote shell, and tears
//! everything down in reverse order when the shell exits.

pub mod config;
pub mod control;
pub mod identity;
pub mod logging;
pub mod mirror;
pub mod process;
pub mod provider;
pub mod session;
pub mod syncer;
pub mod target;
pub mod teardown;
pub mod test_support;
pub mod ticket;
pub mod watch;

pub use config::{ConfigError, SessionConfig};
pub use control::{ChannelState, ControlChannel, ControlError, ControlPath, ControlSocket};
pub use identity::{IdentityError, LocalUser};
pub use mirror::{EXCLUDE_SET, MirrorCommand, MirrorError};
pub use process::{
    CommandOutput, CommandRunner, Launcher, ProcessCommandRunner, ProcessError, ProcessExit,
    TerminalLauncher,
};
pub use provider::{EndpointError, ProviderCli};
pub use session::{Session, SessionError, SessionOutcome};
pub use syncer::{Syncer, SyncerError};
pub use target::{DEFAULT_REMOTE_PATH, RemoteSpec, SessionTarget, TargetError};
pub use teardown::{Teardown, TeardownStep};
pub use ticket::SyncTicket;
pub use watch::{EventStream, SyncEvent, WatchCommand, WatcherError};
