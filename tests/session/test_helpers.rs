//! Shared fixtures for session BDD scenarios.

use std::sync::Arc;

use camino::Utf8PathBuf;
use rstest::fixture;
use sync_space::test_support::{
    RemoteTree, ScriptedLauncher, ScriptedRunner, session_config, write_script,
};
use sync_space::{ProcessExit, SessionConfig};
use tempfile::TempDir;
use thiserror::Error;

/// Target used unless a scenario overrides it.
pub const DEFAULT_TARGET: &str = "alice@vm1:/home/alice/src";

#[derive(Clone, Debug)]
pub struct SessionContext {
    pub launcher: ScriptedLauncher,
    pub runner: ScriptedRunner,
    pub config: SessionConfig,
    pub base: Utf8PathBuf,
    pub root: Utf8PathBuf,
    pub remote: Option<RemoteTree>,
    pub target: String,
    pub outcome: Option<SessionResult>,
    pub _tmp: Arc<TempDir>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SessionResult {
    ShellExited(ProcessExit),
    Interrupted,
    Failure { phase: String, message: String },
}

#[derive(Debug, Error)]
pub enum SessionTestError {
    #[error("invalid session fixture: {0}")]
    Fixture(String),
}

pub type SessionContextResult = Result<SessionContext, SessionTestError>;

#[fixture]
pub fn session_context_result() -> SessionContextResult {
    build_session_context()
}

#[fixture]
pub fn session_context(
    session_context_result: SessionContextResult,
) -> SessionContext {
    session_context_result
        .unwrap_or_else(|err| panic!("session context fixture should initialise: {err}"))
}

fn build_session_context() -> SessionContextResult {
    let fixture_error = |err: &dyn std::fmt::Display| SessionTestError::Fixture(err.to_string());
    let tmp = TempDir::new().map_err(|err| fixture_error(&err))?;
    let base = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .map_err(|path| SessionTestError::Fixture(path.display().to_string()))?;
    let root = base.join("src");
    std::fs::create_dir(&root).map_err(|err| fixture_error(&err))?;
    std::fs::write(root.join("a.txt"), "hi").map_err(|err| fixture_error(&err))?;
    let watcher = write_script(&base, "watcher", "echo batch; exec sleep 30")
        .map_err(|err| fixture_error(&err))?;

    Ok(SessionContext {
        launcher: ScriptedLauncher::new(),
        runner: ScriptedRunner::new(),
        config: SessionConfig {
            watcher_bin: watcher.into_string(),
            control_dir: Some(base.join("ctl").into_string()),
            ..session_config()
        },
        base,
        root,
        remote: None,
        target: String::from(DEFAULT_TARGET),
        outcome: None,
        _tmp: Arc::new(tmp),
    })
}
