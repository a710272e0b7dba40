//! Session configuration loaded via `ortho-config`.
//!
//! [`SessionConfig`] names the external tools a session drives and the knobs
//! they take. Values merge defaults, configuration files, and environment
//! variables (`SYNC_SPACE_*`).

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::identity::LocalUser;
use crate::process::expand_tilde;

/// Debounce window handed to the watcher when none is configured.
pub const DEFAULT_WATCH_LATENCY_SECS: u64 = 3;

/// External tools and settings used by a session.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SYNC_SPACE",
    discovery(
        app_name = "sync-space",
        env_var = "SYNC_SPACE_CONFIG_PATH",
        config_file_name = "sync-space.toml",
        dotfile_name = ".sync-space.toml",
        project_file_name = "sync-space.toml"
    )
)]
pub struct SessionConfig {
    /// Cloud provider CLI used for the SSH wrapper and metadata queries.
    #[ortho_config(default = "gcloud".to_owned())]
    pub provider_bin: String,
    /// Plain `ssh` binary used as rsync's remote shell.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `rsync` executable.
    #[ortho_config(default = "rsync".to_owned())]
    pub rsync_bin: String,
    /// Path to the `fswatch` executable.
    #[ortho_config(default = "fswatch".to_owned())]
    pub watcher_bin: String,
    /// Quiet period, in seconds, the watcher waits before emitting a batch.
    #[ortho_config(default = DEFAULT_WATCH_LATENCY_SECS)]
    pub watch_latency_secs: u64,
    /// Directory holding control sockets. Supports tilde expansion and
    /// defaults to `~/.ssh/ctl`.
    pub control_dir: Option<String>,
    /// Zone passed to every provider invocation, when set.
    pub provider_zone: Option<String>,
    /// Project passed to every provider invocation, when set.
    pub provider_project: Option<String>,
}

/// Errors raised while loading or validating the configuration.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Raised when a required value is empty. The message says where to set
    /// it.
    #[error("missing {field}: set SYNC_SPACE_{env_suffix} or add {field} to sync-space.toml", env_suffix = field.to_uppercase())]
    InvalidField {
        /// Configuration field that failed validation.
        field: String,
    },
    /// Raised when the watcher latency is zero.
    #[error("watch_latency_secs must be at least 1 second")]
    InvalidLatency,
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

impl SessionConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("sync-space")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Ensures configuration values are usable after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] when a required field or a set
    /// optional field is blank, and [`ConfigError::InvalidLatency`] when the
    /// watcher latency is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_value(&self.provider_bin, "provider_bin")?;
        Self::require_value(&self.ssh_bin, "ssh_bin")?;
        Self::require_value(&self.rsync_bin, "rsync_bin")?;
        Self::require_value(&self.watcher_bin, "watcher_bin")?;
        Self::require_optional_value(self.control_dir.as_deref(), "control_dir")?;
        Self::require_optional_value(self.provider_zone.as_deref(), "provider_zone")?;
        Self::require_optional_value(self.provider_project.as_deref(), "provider_project")?;
        if self.watch_latency_secs == 0 {
            return Err(ConfigError::InvalidLatency);
        }
        Ok(())
    }

    /// Returns the control socket directory for `user`.
    #[must_use]
    pub fn control_dir_for(&self, user: &LocalUser) -> Utf8PathBuf {
        self.control_dir.as_deref().map_or_else(
            || user.default_control_dir(),
            |dir| Utf8PathBuf::from(expand_tilde(dir.trim())),
        )
    }

    fn require_optional_value(value: Option<&str>, field: &str) -> Result<(), ConfigError> {
        match value {
            None => Ok(()),
            Some(v) if !v.trim().is_empty() => Ok(()),
            Some(_) => Err(ConfigError::InvalidField {
                field: field.to_owned(),
            }),
        }
    }

    fn require_value(value: &str, field: &str) -> Result<(), ConfigError> {
        Self::require_optional_value(Some(value), field)
    }
}
