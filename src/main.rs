//! Binary entry point for the sync-space CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing::debug;

use sync_space::logging::{self, LogConfig, LogInitError};
use sync_space::{
    ConfigError, IdentityError, LocalUser, ProcessCommandRunner, Session, SessionConfig,
    SessionError, SessionOutcome, TerminalLauncher,
};

mod cli;

use cli::Cli;

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Logging(#[from] LogInitError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn run(cli: Cli) -> Result<(), CliError> {
    logging::init(&LogConfig {
        verbose: cli.verbose,
        file: cli.log_file,
    })?;
    let config = SessionConfig::load_without_cli_args()?;
    let user = LocalUser::current()?;

    let session = Session::new(config, user, TerminalLauncher, ProcessCommandRunner);
    match session.run(&cli.local_dir, &cli.target).await? {
        SessionOutcome::ShellExited(status) => debug!(%status, "session finished"),
        SessionOutcome::Interrupted(signal) => debug!(signal, "session interrupted"),
    }
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "sync-space: {err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_space::TargetError;

    #[test]
    fn cli_parses_flags_and_positionals() {
        let cli = Cli::try_parse_from([
            "sync-space",
            "-v",
            "-l",
            "/tmp/sync.log",
            "./src",
            "alice@vm1:/home/alice/src",
        ])
        .expect("arguments should parse");

        assert!(cli.verbose);
        assert_eq!(cli.log_file.as_deref().map(camino::Utf8Path::as_str), Some("/tmp/sync.log"));
        assert_eq!(cli.local_dir.as_str(), "./src");
        assert_eq!(cli.target, "alice@vm1:/home/alice/src");
    }

    #[test]
    fn cli_requires_both_positionals() {
        assert!(Cli::try_parse_from(["sync-space", "./src"]).is_err());
    }

    #[test]
    fn write_error_prefixes_the_program_name() {
        let mut buf = Vec::new();
        let err = CliError::Session(SessionError::Target(TargetError::UserHost {
            user_host: String::from("a@b@c"),
        }));
        write_error(&mut buf, &err);
        let rendered = String::from_utf8(buf).expect("utf8");

        assert_eq!(rendered, "sync-space: bad user@host string 'a@b@c'\n");
    }
}
