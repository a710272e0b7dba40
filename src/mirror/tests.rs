//! Unit tests for mirror argument construction and execution.

use std::net::{IpAddr, Ipv4Addr};

use super::*;
use crate::control::{ControlPath, ControlSocket};
use crate::provider::ProviderCli;
use crate::target::RemoteSpec;
use crate::test_support::{ScriptedLauncher, ScriptedRunner, session_config, strings};
use rstest::rstest;
use tempfile::TempDir;

struct Fixture {
    _tmp: TempDir,
    dir: Utf8PathBuf,
    control: ControlPath,
    target: SessionTarget,
}

async fn fixture(dir_name: &str) -> Fixture {
    let tmp = TempDir::new().expect("tempdir");
    let dir = Utf8PathBuf::from_path_buf(tmp.path().join(dir_name)).expect("utf8 temp path");
    let remote = RemoteSpec::parse("alice@vm1:/home/alice/src", "bob").expect("target should parse");
    let launcher = ScriptedLauncher::new();
    launcher.push_exit(0);
    let control = ControlSocket::prepare(&dir)
        .expect("prepare")
        .open(&launcher, &ProviderCli::new(&session_config()), &remote)
        .await
        .expect("open")
        .control_path();
    let target = SessionTarget::new(remote, IpAddr::V4(Ipv4Addr::new(34, 77, 1, 9)));
    Fixture {
        _tmp: tmp,
        dir,
        control,
        target,
    }
}

#[rstest]
#[tokio::test]
async fn mirror_args_match_the_wire_contract() {
    let fx = fixture("ctl").await;
    let command = MirrorCommand::new(&session_config(), Utf8Path::new("./src"), &fx.target, &fx.control);

    assert_eq!(command.program(), "rsync");
    assert_eq!(
        strings(command.args()),
        [
            String::from("-rlptz"),
            String::from("--delete-during"),
            String::from("--exclude=.git/"),
            String::from("--exclude=bin/"),
            String::from("--exclude=pkg/"),
            format!(
                "--rsh=ssh -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null -o ControlPath='{}/%L-%r@%h:%p'",
                fx.dir
            ),
            String::from("./src"),
            String::from("alice@34.77.1.9:/home/alice/src"),
        ]
    );
}

#[rstest]
#[tokio::test]
async fn remote_shell_quotes_socket_paths_with_spaces() {
    let fx = fixture("ctl dir").await;

    let shell = remote_shell("/usr/bin/ssh", &fx.control);

    assert!(shell.starts_with("/usr/bin/ssh -o StrictHostKeyChecking=no"), "{shell}");
    assert!(
        shell.ends_with(&format!("-o ControlPath='{}/%L-%r@%h:%p'", fx.dir)),
        "{shell}"
    );
}

#[rstest]
#[case("/work")]
#[case("/work/")]
#[case("./src")]
#[tokio::test]
async fn source_is_passed_through_unchanged(#[case] root: &str) {
    let fx = fixture("ctl").await;
    let command = MirrorCommand::new(&session_config(), Utf8Path::new(root), &fx.target, &fx.control);

    let tail: Vec<String> = strings(command.args()).into_iter().rev().take(2).collect();
    assert_eq!(tail, [String::from("alice@34.77.1.9:/home/alice/src"), String::from(root)]);
}

#[rstest]
#[tokio::test]
async fn default_remote_path_keeps_the_directory_name() {
    let fx = fixture("ctl").await;
    let remote = RemoteSpec::parse("vm1:", "bob").expect("target should parse");
    let target = SessionTarget::new(remote, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)));

    let command = MirrorCommand::new(&session_config(), Utf8Path::new("./src"), &target, &fx.control);

    let tail: Vec<String> = strings(command.args()).into_iter().rev().take(2).collect();
    assert_eq!(tail, [String::from("bob@10.0.0.7:."), String::from("./src")]);
}

#[rstest]
#[tokio::test]
async fn attached_mirror_reports_non_zero_exit() {
    let fx = fixture("ctl").await;
    let command = MirrorCommand::new(&session_config(), Utf8Path::new("/work"), &fx.target, &fx.control);
    let launcher = ScriptedLauncher::new();
    launcher.push_exit(0);
    launcher.push_exit(12);

    command.run_attached(&launcher).await.expect("first run succeeds");
    let err = command
        .run_attached(&launcher)
        .await
        .expect_err("second run fails");

    assert_eq!(
        err,
        MirrorError::Failed {
            program: String::from("rsync"),
            status: ProcessExit::from_code(12),
        }
    );
    let calls = launcher.invocations();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|call| call.args == command.args()));
}

#[rstest]
#[tokio::test]
async fn captured_mirror_returns_output_even_on_failure() {
    let fx = fixture("ctl").await;
    let command = MirrorCommand::new(&session_config(), Utf8Path::new("/work"), &fx.target, &fx.control);
    let runner = ScriptedRunner::new();
    runner.push_output(Some(23), "partial\n", "rsync error\n");

    let output = command.run_captured(&runner).await.expect("rsync ran");

    assert_eq!(output.exit(), ProcessExit::from_code(23));
    assert_eq!(output.combined(), "partial\nrsync error\n");
}

#[rstest]
fn check_source_requires_a_directory() {
    let tmp = TempDir::new().expect("tempdir");
    let dir = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf8 temp path");
    let file = dir.join("file.txt");
    std::fs::write(&file, "x").expect("write file");

    assert!(check_source(&dir).is_ok());
    for missing in [file, dir.join("absent")] {
        assert_eq!(
            check_source(&missing),
            Err(MirrorError::MissingSource { path: missing.clone() })
        );
    }
}
