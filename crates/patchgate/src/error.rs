//! Failure taxonomy for one pipeline run.
//!
//! Every stage error converts into [`PipelineFailure`]. Each failure knows
//! the stage that raised it and whether the artifact may already have been
//! written, which drives the rollback decision.

use std::fmt;

use thiserror::Error;

use crate::apply::ApplyError;
use crate::backup::BackupError;
use crate::commit::WriteError;
use crate::environment::EnvironmentError;
use crate::locate::LocateError;
use crate::validation::{ValidationError, ValidationOutcome};
use crate::verify::IntegrityError;

/// Pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    /// Environment and readiness checks.
    Preflight,
    /// Target location.
    Locate,
    /// Snapshot of the artifact.
    Backup,
    /// Substitution and integrity verification.
    Apply,
    /// Staging and atomic rename.
    Commit,
    /// External validation gate.
    Validate,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Preflight => "preflight",
            Self::Locate => "locate",
            Self::Backup => "backup",
            Self::Apply => "apply",
            Self::Commit => "commit",
            Self::Validate => "validate",
        })
    }
}

/// Stable name of a failure class, as shown in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Preflight failed.
    Environment,
    /// No strategy matched, or the patch is already applied.
    TargetNotFound,
    /// A strategy matched more than once.
    AmbiguousMatch,
    /// The candidate failed verification.
    Integrity,
    /// Staging or rename failed.
    Write,
    /// The validation command was killed at its timeout.
    ValidationTimeout,
    /// The validation command ran and did not pass, or could not run.
    ValidationFailure,
    /// The snapshot could not be taken.
    Backup,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Environment => "EnvironmentError",
            Self::TargetNotFound => "TargetNotFoundError",
            Self::AmbiguousMatch => "AmbiguousMatchError",
            Self::Integrity => "IntegrityError",
            Self::Write => "WriteError",
            Self::ValidationTimeout => "ValidationTimeout",
            Self::ValidationFailure => "ValidationFailure",
            Self::Backup => "BackupError",
        })
    }
}

/// Why a run did not commit cleanly.
#[derive(Debug, Clone, Error)]
pub enum PipelineFailure {
    /// Preflight failed.
    #[error(transparent)]
    Environment(#[from] EnvironmentError),
    /// Location failed.
    #[error(transparent)]
    Locate(#[from] LocateError),
    /// The snapshot could not be taken.
    #[error(transparent)]
    Backup(#[from] BackupError),
    /// Re-validation of the match failed.
    #[error(transparent)]
    Apply(#[from] ApplyError),
    /// The candidate or committed artifact failed verification.
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
    /// Staging or rename failed.
    #[error(transparent)]
    Write(#[from] WriteError),
    /// The validation command could not be run.
    #[error("validation could not run: {0}")]
    ValidationUnavailable(#[from] ValidationError),
    /// The validation command was killed at its timeout.
    #[error("validation timed out after {}s", .0.timeout.as_secs())]
    ValidationTimeout(Box<ValidationOutcome>),
    /// The validation command ran and did not pass.
    #[error("validation failed: {:?}", .0.verdict)]
    ValidationFailed(Box<ValidationOutcome>),
}

impl PipelineFailure {
    /// Failure class.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Environment(_) => FailureKind::Environment,
            Self::Locate(LocateError::AmbiguousMatch { .. })
            | Self::Apply(ApplyError::MatchCount { found: 2.., .. }) => FailureKind::AmbiguousMatch,
            Self::Locate(_) | Self::Apply(ApplyError::MatchCount { .. } | ApplyError::Locate(_)) => {
                FailureKind::TargetNotFound
            }
            Self::Apply(ApplyError::SpanMismatch { .. }) | Self::Integrity(_) => {
                FailureKind::Integrity
            }
            Self::Backup(_) => FailureKind::Backup,
            Self::Write(_) => FailureKind::Write,
            Self::ValidationTimeout(_) => FailureKind::ValidationTimeout,
            Self::ValidationUnavailable(_) | Self::ValidationFailed(_) => {
                FailureKind::ValidationFailure
            }
        }
    }

    /// Stage that raised the failure.
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::Environment(_) => Stage::Preflight,
            Self::Locate(_) => Stage::Locate,
            Self::Backup(_) => Stage::Backup,
            Self::Apply(_) => Stage::Apply,
            Self::Integrity(IntegrityError::CommittedMismatch) | Self::Write(_) => Stage::Commit,
            Self::Integrity(_) => Stage::Apply,
            Self::ValidationUnavailable(_)
            | Self::ValidationTimeout(_)
            | Self::ValidationFailed(_) => Stage::Validate,
        }
    }

    /// Whether the live artifact may have been replaced when this failure
    /// was raised.
    #[must_use]
    pub fn artifact_may_have_changed(&self) -> bool {
        self.stage() >= Stage::Commit
    }

    /// Whether the failure is a completed validation run that did not pass.
    /// Only these defer to the rollback policy; every other post-write
    /// failure restores automatically.
    #[must_use]
    pub const fn is_policy_governed(&self) -> bool {
        matches!(self, Self::ValidationFailed(_))
    }

    /// Validation outcome attached to the failure, if any.
    #[must_use]
    pub fn validation(&self) -> Option<&ValidationOutcome> {
        match self {
            Self::ValidationTimeout(outcome) | Self::ValidationFailed(outcome) => Some(outcome.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;
    use rstest::rstest;

    use super::*;
    use crate::locate::NotFoundDiagnostic;
    use crate::spec::StrategyKind;

    fn not_found() -> PipelineFailure {
        PipelineFailure::Locate(LocateError::TargetNotFound {
            diagnostic: Box::new(NotFoundDiagnostic::default()),
        })
    }

    #[rstest]
    #[case::not_found(not_found(), FailureKind::TargetNotFound, Stage::Locate)]
    #[case::ambiguous(
        PipelineFailure::Locate(LocateError::AmbiguousMatch {
            strategy: StrategyKind::Exact,
            count: 2,
            offsets: vec![0, 9],
        }),
        FailureKind::AmbiguousMatch,
        Stage::Locate
    )]
    #[case::drift_ambiguous(
        PipelineFailure::Apply(ApplyError::MatchCount { strategy: StrategyKind::Exact, found: 3 }),
        FailureKind::AmbiguousMatch,
        Stage::Apply
    )]
    #[case::drift_vanished(
        PipelineFailure::Apply(ApplyError::MatchCount { strategy: StrategyKind::Exact, found: 0 }),
        FailureKind::TargetNotFound,
        Stage::Apply
    )]
    #[case::missing_markers(
        PipelineFailure::Integrity(IntegrityError::MissingMarkers { markers: vec!["x".into()] }),
        FailureKind::Integrity,
        Stage::Apply
    )]
    #[case::committed_mismatch(
        PipelineFailure::Integrity(IntegrityError::CommittedMismatch),
        FailureKind::Integrity,
        Stage::Commit
    )]
    #[case::write(
        PipelineFailure::Write(WriteError::Empty { path: Utf8PathBuf::from("a") }),
        FailureKind::Write,
        Stage::Commit
    )]
    fn failures_know_their_kind_and_stage(
        #[case] failure: PipelineFailure,
        #[case] kind: FailureKind,
        #[case] stage: Stage,
    ) {
        assert_eq!(failure.kind(), kind);
        assert_eq!(failure.stage(), stage);
    }

    #[test]
    fn only_post_commit_failures_may_have_changed_the_artifact() {
        assert!(!not_found().artifact_may_have_changed());
        assert!(
            PipelineFailure::Write(WriteError::Empty {
                path: Utf8PathBuf::from("a")
            })
            .artifact_may_have_changed()
        );
    }

    #[test]
    fn kind_names_match_report_vocabulary() {
        assert_eq!(FailureKind::AmbiguousMatch.to_string(), "AmbiguousMatchError");
        assert_eq!(FailureKind::ValidationTimeout.to_string(), "ValidationTimeout");
    }
}
