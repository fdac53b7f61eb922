//! Terminal record of one pipeline run.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};

use crate::backup::{Backup, RestoreError};
use crate::error::PipelineFailure;
use crate::spec::StrategyKind;
use crate::validation::ValidationOutcome;

/// Final state of the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    /// The patch is on disk and every gate passed.
    Committed,
    /// The artifact holds its pre-operation content.
    RolledBack,
    /// The patch is on disk but validation failed and restoration was
    /// declined.
    Unverified,
    /// Restoration was needed and failed; the artifact state is unknown.
    RestoreFailed,
}

impl OperationStatus {
    /// Whether the run counts as a success.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Committed)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Committed => "COMMITTED",
            Self::RolledBack => "ROLLED BACK",
            Self::Unverified => "UNVERIFIED",
            Self::RestoreFailed => "RESTORE FAILED",
        })
    }
}

/// What happened to the artifact after a failure.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Restoration {
    /// No restoration was needed or possible (success, or no backup taken).
    #[default]
    NotAttempted,
    /// The artifact already matched the backup.
    Unchanged,
    /// The backup was written back.
    Restored,
    /// The operator declined restoration.
    Declined,
    /// Restoration failed.
    Failed(RestoreError),
}

/// Where the snapshot lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRef {
    /// Backup path.
    pub path: Utf8PathBuf,
    /// Timestamp component of the name.
    pub timestamp_id: String,
}

impl From<&Backup> for BackupRef {
    fn from(backup: &Backup) -> Self {
        Self {
            path: backup.path().to_owned(),
            timestamp_id: backup.timestamp_id().to_owned(),
        }
    }
}

/// Supporting detail for the report.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Diagnostics {
    /// Strategy that located the target.
    pub strategy: Option<StrategyKind>,
    /// Whether the match was approximate and deserves review.
    pub approximate: bool,
    /// Free-form notes collected along the way.
    pub notes: Vec<String>,
    /// Recommended actions.
    pub hints: Vec<String>,
    /// Head of the unified diff between backup and committed content.
    pub change_summary: Option<String>,
    /// Operator-supplied lines shown on success.
    pub summary: Vec<String>,
    /// Validation outcome, when the gate ran.
    pub validation: Option<ValidationOutcome>,
}

/// The result of one pipeline run.
#[derive(Debug, Clone)]
pub struct OperationOutcome {
    /// Artifact the operation targeted.
    pub artifact: Utf8PathBuf,
    /// Final state.
    pub status: OperationStatus,
    /// Failure that ended the run, if any.
    pub failure: Option<PipelineFailure>,
    /// Snapshot taken for this run.
    pub backup: Option<BackupRef>,
    /// Where the snapshot would have been written when none was taken.
    pub planned_backup: Option<Utf8PathBuf>,
    /// Restoration result.
    pub restoration: Restoration,
    /// Report detail.
    pub diagnostics: Diagnostics,
}

impl OperationOutcome {
    /// Successful, committed outcome.
    #[must_use]
    pub fn committed(artifact: &Utf8Path, backup: &Backup) -> Self {
        Self {
            artifact: artifact.to_owned(),
            status: OperationStatus::Committed,
            failure: None,
            backup: Some(backup.into()),
            planned_backup: None,
            restoration: Restoration::NotAttempted,
            diagnostics: Diagnostics::default(),
        }
    }

    /// Whether the run counts as a success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Whether the outcome needs a human to recover the artifact.
    #[must_use]
    pub const fn is_critical(&self) -> bool {
        matches!(self.status, OperationStatus::RestoreFailed)
            || matches!(self.failure, Some(PipelineFailure::Backup(_)))
    }
}
