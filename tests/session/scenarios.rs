//! BDD scenarios for the session lifecycle.

use rstest_bdd_macros::scenario;

use super::test_helpers::{SessionContext, session_context};

#[scenario(
    path = "tests/features/session.feature",
    name = "Mirror, sync, and tear down when the shell exits"
)]
fn scenario_happy_path(session_context: SessionContext) {
    drop(session_context);
}

#[scenario(
    path = "tests/features/session.feature",
    name = "Reject a malformed target before starting anything"
)]
fn scenario_malformed_target(session_context: SessionContext) {
    drop(session_context);
}

#[scenario(
    path = "tests/features/session.feature",
    name = "Never close a tunnel that failed to open"
)]
fn scenario_tunnel_refused(session_context: SessionContext) {
    drop(session_context);
}

#[scenario(
    path = "tests/features/session.feature",
    name = "Close the tunnel when the initial sync fails"
)]
fn scenario_initial_sync_failure(
    session_context: SessionContext) {
    drop(session_context);
}

#[scenario(
    path = "tests/features/session.feature",
    name = "Keep the shell running when an incremental sync fails"
)]
fn scenario_incremental_sync_failure(
    session_context: SessionContext) {
    drop(session_context);
}

#[scenario(
    path = "tests/features/session.feature",
    name = "Excluded paths never reach the remote"
)]
fn scenario_excluded_paths(session_context: SessionContext) {
    drop(session_context);
}
