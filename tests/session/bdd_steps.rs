//! BDD step definitions for the session lifecycle.

use camino::{Utf8Path, Utf8PathBuf};
use rstest_bdd_macros::{given, then, when};
use sync_space::test_support::{RemoteTree, ScriptedRunner};
use sync_space::{LocalUser, ProcessExit, Session, SessionOutcome};
use tokio::runtime::Runtime;

use super::test_helpers::{SessionContext, SessionResult};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn expect(condition: bool, message: impl FnOnce() -> String) -> Result<(), StepError> {
    if condition {
        Ok(())
    } else {
        Err(StepError::Assertion(message()))
    }
}

fn write_file(path: &Utf8Path) -> Result<(), StepError> {
    let io_error = |err: std::io::Error| StepError::Assertion(format!("{path}: {err}"));
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }
    std::fs::write(path, path.as_str()).map_err(io_error)
}

fn remote_path(session_context: &SessionContext, path: &str) -> Result<Utf8PathBuf, StepError> {
    session_context
        .remote
        .as_ref()
        .map(|tree| tree.resolve(path))
        .ok_or_else(|| StepError::Assertion(String::from("the remote home is not simulated")))
}

fn close_requests(session_context: &SessionContext) -> usize {
    session_context
        .launcher
        .command_strings()
        .iter()
        .filter(|command| command.contains("--ssh-flag=-O exit"))
        .count()
}

#[given("a ready session")]
fn ready_session(session_context: SessionContext) -> SessionContext {
    session_context
}

#[given("the target is \"{target}\"")]
fn target_is(mut session_context: SessionContext, target: String) -> SessionContext {
    session_context.target = target;
    session_context
}

#[given("the remote home is simulated")]
fn remote_home_simulated(session_context: SessionContext) -> Result<SessionContext, StepError> {
    let tree = RemoteTree::create(session_context.base.join("remote"))
        .map_err(|err| StepError::Assertion(err.to_string()))?;
    Ok(SessionContext {
        launcher: session_context.launcher.clone().with_remote(tree.clone()),
        runner: session_context.runner.clone().with_remote(tree.clone()),
        remote: Some(tree),
        ..session_context
    })
}

#[given("the local tree contains \"{path}\"")]
fn local_tree_contains(
    session_context: SessionContext,
    path: String,
) -> Result<SessionContext, StepError> {
    write_file(&session_context.root.join(path))?;
    Ok(session_context)
}

#[given("the remote already holds \"{path}\"")]
fn remote_already_holds(
    session_context: SessionContext,
    path: String,
) -> Result<SessionContext, StepError> {
    write_file(&remote_path(&session_context, &path)?)?;
    Ok(session_context)
}

#[given("the tunnel opens")]
fn tunnel_opens(session_context: SessionContext) -> SessionContext {
    session_context.launcher.push_exit(0);
    session_context
}

#[given("the tunnel fails with exit code \"{code}\"")]
fn tunnel_fails(session_context: SessionContext, code: i32) -> SessionContext {
    session_context.launcher.push_exit(code);
    session_context
}

#[given("the host resolves to \"{ip}\"")]
fn host_resolves(session_context: SessionContext, ip: String) -> SessionContext {
    session_context
        .runner
        .push_output(Some(0), format!("{ip}\n"), "");
    session_context
}

#[given("the initial sync succeeds")]
fn initial_sync_succeeds(session_context: SessionContext) -> SessionContext {
    session_context.launcher.push_exit(0);
    session_context
}

#[given("the initial sync fails with exit code \"{code}\"")]
fn initial_sync_fails(session_context: SessionContext, code: i32) -> SessionContext {
    session_context.launcher.push_exit(code);
    session_context
}

#[given("incremental syncs succeed")]
fn incremental_syncs_succeed(session_context: SessionContext) -> SessionContext {
    session_context.runner.push_success();
    session_context
}

#[given("incremental syncs fail with exit code \"{code}\"")]
fn incremental_syncs_fail(session_context: SessionContext, code: i32) -> SessionContext {
    session_context.runner.push_failure(code);
    session_context
}

#[given("the shell exits with code \"{code}\" after one sync")]
fn shell_exits_after_sync(session_context: SessionContext, code: i32) -> SessionContext {
    let runner: ScriptedRunner = session_context.runner.clone();
    session_context.launcher.push_exit_after(code, async move {
        // One address lookup plus one incremental mirror.
        assert!(
            runner.wait_for_calls(2).await,
            "the watcher batch was never synced"
        );
    });
    session_context
}

#[when("I run the session")]
fn run_session(session_context: SessionContext) -> Result<SessionContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let session = Session::new(
        session_context.config.clone(),
        LocalUser::new("bob", "/home/bob"),
        session_context.launcher.clone(),
        session_context.runner.clone(),
    );

    let result = runtime.block_on(session.run_until(
        &session_context.root,
        &session_context.target,
        std::future::pending(),
    ));
    let outcome = match result {
        Ok(SessionOutcome::ShellExited(status)) => SessionResult::ShellExited(status),
        Ok(SessionOutcome::Interrupted(_)) => SessionResult::Interrupted,
        Err(err) => SessionResult::Failure {
            phase: err.phase().to_owned(),
            message: err.to_string(),
        },
    };

    Ok(SessionContext {
        outcome: Some(outcome),
        ..session_context
    })
}

#[then("the session ends with shell exit code \"{code}\"")]
fn ends_with_shell_exit(session_context: &SessionContext, code: i32) -> Result<(), StepError> {
    let expected = SessionResult::ShellExited(ProcessExit::from_code(code));
    expect(session_context.outcome.as_ref() == Some(&expected), || {
        format!(
            "expected {expected:?}, got {:?}",
            session_context.outcome
        )
    })
}

#[then("the session fails during \"{phase}\"")]
fn fails_during(session_context: &SessionContext, phase: String) -> Result<(), StepError> {
    match &session_context.outcome {
        Some(SessionResult::Failure {
            phase: actual,
            message,
        }) => expect(*actual == phase, || {
            format!("expected failure during {phase}, got {actual}: {message}")
        }),
        other => Err(StepError::Assertion(format!(
            "expected failure during {phase}, got {other:?}"
        ))),
    }
}

#[then("the launched programs are \"{programs}\"")]
fn launched_programs(session_context: &SessionContext, programs: String) -> Result<(), StepError> {
    let actual: Vec<String> = session_context
        .launcher
        .invocations()
        .into_iter()
        .map(|call| call.program)
        .collect();
    let expected: Vec<&str> = programs.split(',').collect();
    expect(actual == expected, || {
        format!("expected programs {expected:?}, got {actual:?}")
    })
}

#[then("no process is started")]
fn no_process_started(session_context: &SessionContext) -> Result<(), StepError> {
    let launched = session_context.launcher.invocations().len();
    let captured = session_context.runner.invocations().len();
    expect(launched == 0 && captured == 0, || {
        format!("expected no processes, got {launched} launched and {captured} captured")
    })
}

#[then("the tunnel is closed once")]
fn tunnel_closed_once(session_context: &SessionContext) -> Result<(), StepError> {
    let closes = close_requests(session_context);
    expect(closes == 1, || format!("expected one close request, got {closes}"))
}

#[then("the tunnel is never closed")]
fn tunnel_never_closed(session_context: &SessionContext) -> Result<(), StepError> {
    let closes = close_requests(session_context);
    expect(closes == 0, || format!("expected no close request, got {closes}"))
}

#[then("the remote holds \"{path}\"")]
fn remote_holds(session_context: &SessionContext, path: String) -> Result<(), StepError> {
    let remote = remote_path(session_context, &path)?;
    expect(remote.is_file(), || format!("expected {path} on the remote"))
}

#[then("the remote lacks \"{path}\"")]
fn remote_lacks(session_context: &SessionContext, path: String) -> Result<(), StepError> {
    let remote = remote_path(session_context, &path)?;
    expect(!remote.exists(), || format!("expected no {path} on the remote"))
}
