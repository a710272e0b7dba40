//! Invocations of the cloud provider CLI.
//!
//! The provider's `compute ssh` wrapper owns authentication, so the control
//! master, its shutdown, and the interactive shell all go through it. Its
//! argv cannot be embedded as rsync's remote shell, which is why the host's
//! address is looked up separately and the mirror dials plain `ssh`.

use std::ffi::OsString;
use std::net::IpAddr;

use thiserror::Error;

use crate::config::SessionConfig;
use crate::process::{CommandRunner, ProcessError};
use crate::target::RemoteSpec;

/// Metadata projection that yields the instance's external IPv4 address.
pub const NAT_IP_FORMAT: &str = "--format=value(networkInterfaces.accessConfigs[0].natIP)";

/// Errors raised while resolving the remote host's address.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum EndpointError {
    /// Raised when the provider CLI cannot be started.
    #[error(transparent)]
    Process(#[from] ProcessError),
    /// Raised when the metadata query exits unsuccessfully.
    #[error("{program} could not describe {host} ({status_text}): {stderr}")]
    Lookup {
        /// Provider CLI that was invoked.
        program: String,
        /// Instance name that was queried.
        host: String,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the CLI.
        stderr: String,
    },
    /// Raised when the query succeeds but reports no address.
    #[error("{program} reported no external address for {host}")]
    Empty {
        /// Provider CLI that was invoked.
        program: String,
        /// Instance name that was queried.
        host: String,
    },
    /// Raised when the reported address does not parse.
    #[error("{program} reported an invalid address for {host}: '{value}'")]
    Invalid {
        /// Provider CLI that was invoked.
        program: String,
        /// Instance name that was queried.
        host: String,
        /// Trimmed output that failed to parse.
        value: String,
    },
}

/// Builds provider CLI argument vectors.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProviderCli {
    program: String,
    scope: Vec<OsString>,
}

impl ProviderCli {
    /// Creates a provider invocation builder from the session configuration.
    #[must_use]
    pub fn new(config: &SessionConfig) -> Self {
        let mut scope = Vec::new();
        if let Some(zone) = config.provider_zone.as_deref() {
            scope.push(OsString::from(format!("--zone={}", zone.trim())));
        }
        if let Some(project) = config.provider_project.as_deref() {
            scope.push(OsString::from(format!("--project={}", project.trim())));
        }
        Self {
            program: config.provider_bin.clone(),
            scope,
        }
    }

    /// Returns the provider executable.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments that open a backgrounded control master on `socket`.
    #[must_use]
    pub fn open_master_args(&self, remote: &RemoteSpec, socket: &str) -> Vec<OsString> {
        self.ssh_args(
            &[
                String::from("-nNf"),
                String::from("-o ControlMaster=yes"),
                format!("-o ControlPath={socket}"),
                String::from("-o StrictHostKeyChecking=no"),
                String::from("-o UserKnownHostsFile=/dev/null"),
            ],
            remote,
        )
    }

    /// Arguments that ask the control master on `socket` to exit.
    #[must_use]
    pub fn close_master_args(&self, remote: &RemoteSpec, socket: &str) -> Vec<OsString> {
        self.ssh_args(
            &[String::from("-O exit"), format!("-o ControlPath={socket}")],
            remote,
        )
    }

    /// Arguments for an interactive shell multiplexed over `socket`.
    #[must_use]
    pub fn shell_args(&self, remote: &RemoteSpec, socket: &str) -> Vec<OsString> {
        self.ssh_args(&[format!("-o ControlPath={socket}")], remote)
    }

    /// Arguments that print the external address of instance `host`.
    #[must_use]
    pub fn describe_ip_args(&self, host: &str) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("compute"),
            OsString::from("instances"),
            OsString::from("describe"),
            OsString::from(host),
            OsString::from(NAT_IP_FORMAT),
        ];
        args.extend(self.scope.iter().cloned());
        args
    }

    /// Queries the provider for the reachable address of `host`.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError`] when the CLI fails, prints nothing, or
    /// prints something other than an IP address.
    pub async fn resolve_ip<R>(&self, runner: &R, host: &str) -> Result<IpAddr, EndpointError>
    where
        R: CommandRunner + ?Sized,
    {
        let args = self.describe_ip_args(host);
        let output = runner.run(&self.program, &args).await?;
        if !output.is_success() {
            return Err(EndpointError::Lookup {
                program: self.program.clone(),
                host: host.to_owned(),
                status_text: output.exit().to_string(),
                stderr: output.stderr.trim().to_owned(),
            });
        }

        let value = output.stdout.trim();
        if value.is_empty() {
            return Err(EndpointError::Empty {
                program: self.program.clone(),
                host: host.to_owned(),
            });
        }
        value.parse().map_err(|_| EndpointError::Invalid {
            program: self.program.clone(),
            host: host.to_owned(),
            value: value.to_owned(),
        })
    }

    fn ssh_args(&self, ssh_flags: &[String], remote: &RemoteSpec) -> Vec<OsString> {
        let mut args = vec![OsString::from("compute"), OsString::from("ssh")];
        args.extend(
            ssh_flags
                .iter()
                .map(|flag| OsString::from(format!("--ssh-flag={flag}"))),
        );
        args.extend(self.scope.iter().cloned());
        args.push(OsString::from(remote.user_host()));
        args
    }
}
