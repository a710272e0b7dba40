//! Command-line interface definitions for the `sync-space` binary.
//!
//! This module centralises the clap parser so both the main binary and the
//! build script can reuse it when generating the manual page.

use camino::Utf8PathBuf;
use clap::Parser;

/// Top-level CLI for the `sync-space` binary.
#[derive(Debug, Parser)]
#[command(
    name = "sync-space",
    about = "Mirror a local directory onto a cloud VM and keep it in sync while you work in a remote shell",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Log diagnostics: spawned commands, the resolved address, and each
    /// sync.
    #[arg(short = 'v', long = "verbose")]
    pub(crate) verbose: bool,
    /// Write the log to this file (truncated) instead of stdout.
    #[arg(short = 'l', long = "log-file", value_name = "LOGFILE")]
    pub(crate) log_file: Option<Utf8PathBuf>,
    /// Local directory to mirror.
    #[arg(value_name = "LOCAL_DIR")]
    pub(crate) local_dir: Utf8PathBuf,
    /// Remote target as `[user@]host:path`; an empty path means the remote
    /// home directory.
    #[arg(value_name = "TARGET")]
    pub(crate) target: String,
}
