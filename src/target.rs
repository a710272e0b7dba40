//! Parsing of `[user@]host:path` session targets.

use std::fmt;
use std::net::IpAddr;

use thiserror::Error;

/// Remote path used when the target leaves the path half empty.
pub const DEFAULT_REMOTE_PATH: &str = ".";

/// Errors raised when a target string is malformed.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TargetError {
    /// Raised when the target does not contain exactly one `:`.
    #[error("remote target '{target}' must be [user@]host:path with exactly one ':' (found {found})")]
    Separator {
        /// Target string as supplied.
        target: String,
        /// Number of `:` characters found.
        found: usize,
    },
    /// Raised when the part before `:` is empty.
    #[error("remote target '{target}' is missing the host before ':'")]
    MissingHost {
        /// Target string as supplied.
        target: String,
    },
    /// Raised when the `user@host` half is malformed.
    #[error("bad user@host string '{user_host}'")]
    UserHost {
        /// Offending `user@host` half.
        user_host: String,
    },
}

/// The parsed, not yet resolved, half of a session target.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteSpec {
    /// Remote login name.
    pub user: String,
    /// Provider-side host name (the VM instance name).
    pub host: String,
    /// Destination directory on the remote host.
    pub remote_path: String,
}

impl RemoteSpec {
    /// Parses `[user@]host:path`, substituting `local_user` when no user is
    /// given and `.` when the path is empty.
    ///
    /// # Errors
    ///
    /// Returns [`TargetError`] when the separators are wrong or a component
    /// is empty.
    pub fn parse(target: &str, local_user: &str) -> Result<Self, TargetError> {
        let found = target.matches(':').count();
        let Some((user_host, path)) = target.split_once(':').filter(|_| found == 1) else {
            return Err(TargetError::Separator {
                target: target.to_owned(),
                found,
            });
        };
        if user_host.is_empty() {
            return Err(TargetError::MissingHost {
                target: target.to_owned(),
            });
        }

        let (user, host) = match user_host.split_once('@') {
            None => (local_user, user_host),
            Some((user, host)) if !user.is_empty() && !host.is_empty() && !host.contains('@') => {
                (user, host)
            }
            Some(_) => {
                return Err(TargetError::UserHost {
                    user_host: user_host.to_owned(),
                });
            }
        };
        if user.is_empty() {
            return Err(TargetError::UserHost {
                user_host: user_host.to_owned(),
            });
        }

        let remote_path = if path.is_empty() {
            DEFAULT_REMOTE_PATH
        } else {
            path
        };

        Ok(Self {
            user: user.to_owned(),
            host: host.to_owned(),
            remote_path: remote_path.to_owned(),
        })
    }

    /// Returns `user@host`, the form the provider's SSH wrapper expects.
    #[must_use]
    pub fn user_host(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

impl fmt::Display for RemoteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.remote_path)
    }
}

/// A fully resolved session target; immutable once built.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionTarget {
    remote: RemoteSpec,
    host_ip: IpAddr,
}

impl SessionTarget {
    /// Pairs a parsed target with the address the provider reported.
    #[must_use]
    pub const fn new(remote: RemoteSpec, host_ip: IpAddr) -> Self {
        Self { remote, host_ip }
    }

    /// Returns the parsed half of the target.
    #[must_use]
    pub const fn remote(&self) -> &RemoteSpec {
        &self.remote
    }

    /// Returns the remote login name.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.remote.user
    }

    /// Returns the provider-side host name.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.remote.host
    }

    /// Returns `user@host`.
    #[must_use]
    pub fn user_host(&self) -> String {
        self.remote.user_host()
    }

    /// Returns the remote destination directory.
    #[must_use]
    pub fn remote_path(&self) -> &str {
        &self.remote.remote_path
    }

    /// Returns the reachable address of the host.
    #[must_use]
    pub const fn host_ip(&self) -> IpAddr {
        self.host_ip
    }

    /// Returns the rsync destination `user@ip:path`, bracketing IPv6
    /// addresses.
    #[must_use]
    pub fn mirror_destination(&self) -> String {
        match self.host_ip {
            IpAddr::V4(ip) => format!("{}@{ip}:{}", self.remote.user, self.remote.remote_path),
            IpAddr::V6(ip) => format!("{}@[{ip}]:{}", self.remote.user, self.remote.remote_path),
        }
    }
}
