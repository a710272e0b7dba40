//! Local user identity lookup.
//!
//! The login name comes from the account database entry for the real uid,
//! so sessions started without a login environment (`env -i`, cron,
//! `docker exec`) still resolve. `USER` and `LOGNAME` are consulted only
//! when that entry is missing.

use std::env;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use nix::unistd::{User, getuid};
use thiserror::Error;

/// Directory, relative to the home directory, holding control sockets.
pub const CONTROL_DIR_SUFFIX: &str = ".ssh/ctl";

/// Errors raised when the local user cannot be determined.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum IdentityError {
    /// Raised when the uid has no account entry and neither `USER` nor
    /// `LOGNAME` is set.
    #[error("cannot determine the local login name: no account entry and USER/LOGNAME unset")]
    MissingLogin,
    /// Raised when no home directory is known or it is not valid UTF-8.
    #[error("cannot determine the local home directory: set HOME")]
    MissingHome,
}

/// The operator running the session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LocalUser {
    /// Login name, used as the remote user when the target omits one.
    pub login: String,
    /// Home directory, parent of the default control socket directory.
    pub home: Utf8PathBuf,
}

impl LocalUser {
    /// Builds a user from explicit values.
    #[must_use]
    pub fn new(login: impl Into<String>, home: impl Into<Utf8PathBuf>) -> Self {
        Self {
            login: login.into(),
            home: home.into(),
        }
    }

    /// Looks up the user running this process.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] when the login name or home directory is
    /// unavailable.
    pub fn current() -> Result<Self, IdentityError> {
        let account = User::from_uid(getuid())
            .ok()
            .flatten()
            .map(|entry| entry.name);
        Self::resolve(account, dirs::home_dir())
    }

    fn resolve(account: Option<String>, home_dir: Option<PathBuf>) -> Result<Self, IdentityError> {
        let login = account
            .into_iter()
            .chain(
                ["USER", "LOGNAME"]
                    .into_iter()
                    .filter_map(|key| env::var(key).ok()),
            )
            .find(|value| !value.trim().is_empty())
            .ok_or(IdentityError::MissingLogin)?;
        let home = home_dir
            .and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
            .filter(|path| !path.as_str().is_empty())
            .ok_or(IdentityError::MissingHome)?;
        Ok(Self::new(login, home))
    }

    /// Returns the default control socket directory, `~/.ssh/ctl`.
    #[must_use]
    pub fn default_control_dir(&self) -> Utf8PathBuf {
        self.home.join(CONTROL_DIR_SUFFIX)
    }
}
