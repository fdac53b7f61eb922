use crate::logging::LogFormat;
use crate::policy::RollbackPolicy;

/// Default log filter expression used by the binary.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default suffix inserted into backup snapshot names.
pub const DEFAULT_BACKUP_SUFFIX: &str = "bak";

/// Default log filter expression used by the binary.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binary.
#[must_use]
pub fn default_log_format() -> LogFormat {
    LogFormat::Compact
}

/// Default policy applied when the validation gate fails after commit.
#[must_use]
pub fn default_rollback_policy() -> RollbackPolicy {
    RollbackPolicy::Prompt
}

/// Owned backup suffix used where allocation is required (e.g. serde).
#[must_use]
pub fn default_backup_suffix() -> String {
    DEFAULT_BACKUP_SUFFIX.to_owned()
}
