//! Runtime configuration for the patchgate binary.
//!
//! Values are layered by `ortho_config`: command-line flags override
//! `PATCHGATE_*` environment variables, which override a TOML configuration
//! file (located with `--config-path` or `PATCHGATE_CONFIG_PATH`), which
//! overrides the built-in defaults in [`defaults`].
//!
//! The configuration only covers how the tool runs: logging, backup placement
//! and the rollback policy. What gets patched lives in the operation manifest
//! loaded by the `patchgate` crate.

mod defaults;
mod logging;
mod policy;

use std::ffi::OsString;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::{OrthoConfig, OrthoError};
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_BACKUP_SUFFIX, DEFAULT_LOG_FILTER, default_backup_suffix, default_log_filter,
    default_log_filter_string, default_log_format, default_rollback_policy,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use policy::{RollbackPolicy, RollbackPolicyParseError};

/// Resolved runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "PATCHGATE")]
pub struct Config {
    /// `tracing` filter expression applied to the subscriber.
    #[serde(default = "default_log_filter_string")]
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Output format for log events.
    #[serde(default = "default_log_format")]
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Decision applied when the external check fails after commit.
    #[serde(default = "default_rollback_policy")]
    #[ortho_config(default = default_rollback_policy())]
    pub rollback_policy: RollbackPolicy,
    /// Suffix used in backup names (`<artifact>.<suffix>_<timestamp>`).
    #[serde(default = "default_backup_suffix")]
    #[ortho_config(default = default_backup_suffix())]
    pub backup_suffix: String,
    /// Directory receiving backups; defaults to the artifact's directory.
    #[serde(default)]
    pub backup_dir: Option<Utf8PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            rollback_policy: default_rollback_policy(),
            backup_suffix: default_backup_suffix(),
            backup_dir: None,
        }
    }
}

impl Config {
    /// Loads configuration from the supplied argument list, the environment
    /// and any discovered configuration file.
    ///
    /// # Errors
    ///
    /// Returns the (possibly aggregated) `ortho_config` error when any layer
    /// fails to parse.
    pub fn load_from_iter<I>(args: I) -> Result<Self, Arc<OrthoError>>
    where
        I: IntoIterator<Item = OsString>,
    {
        <Self as OrthoConfig>::load_from_iter(args)
    }

    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Rollback policy for validation-only failures.
    #[must_use]
    pub const fn rollback_policy(&self) -> RollbackPolicy {
        self.rollback_policy
    }

    /// Backup name suffix.
    #[must_use]
    pub fn backup_suffix(&self) -> &str {
        &self.backup_suffix
    }

    /// Optional directory receiving backups.
    #[must_use]
    pub fn backup_dir(&self) -> Option<&Utf8Path> {
        self.backup_dir.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.log_filter(), "info");
        assert_eq!(config.log_format(), LogFormat::Compact);
        assert_eq!(config.rollback_policy(), RollbackPolicy::Prompt);
        assert_eq!(config.backup_suffix(), "bak");
        assert!(config.backup_dir().is_none());
    }

    #[test]
    fn log_format_round_trips_through_text() {
        let parsed: LogFormat = "JSON".parse().expect("format should parse");
        assert_eq!(parsed, LogFormat::Json);
        assert_eq!(parsed.to_string(), "json");
    }
}
