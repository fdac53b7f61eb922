//! Failure handling: restore, or ask whether to.
//!
//! Failures raised before a completed validation run restore the artifact
//! unconditionally; the restore is idempotent, so an untouched artifact is
//! simply left alone. A validation run that completed and did not pass is
//! different: the patch may be right and the check wrong, so the decision is
//! delegated to a [`RollbackDecider`].

use camino::Utf8Path;
use tracing::{error, info, warn};

use crate::backup::{Backup, BackupStore, RestoreAction};
use crate::error::PipelineFailure;
use crate::outcome::{Diagnostics, OperationOutcome, OperationStatus, Restoration};

const ROLLBACK_TARGET: &str = "patchgate::rollback";

/// Context handed to a [`RollbackDecider`].
#[derive(Debug, Clone, Copy)]
pub struct RollbackPrompt<'a> {
    /// Failure that triggered the question.
    pub failure: &'a PipelineFailure,
    /// Patched artifact.
    pub artifact: &'a Utf8Path,
    /// Snapshot that would be restored.
    pub backup: &'a Backup,
}

/// Decides whether a failed validation rolls the patch back.
pub trait RollbackDecider {
    /// Returns `true` to restore the backup.
    fn should_roll_back(&mut self, prompt: &RollbackPrompt<'_>) -> bool;
}

/// Always restores.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoRollback;

impl RollbackDecider for AutoRollback {
    fn should_roll_back(&mut self, _prompt: &RollbackPrompt<'_>) -> bool {
        true
    }
}

/// Never restores; the patch is kept and reported as unverified.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRollback;

impl RollbackDecider for NeverRollback {
    fn should_roll_back(&mut self, _prompt: &RollbackPrompt<'_>) -> bool {
        false
    }
}

/// Delegates to a callback, typically an interactive prompt.
pub struct AskRollback<F>(pub F);

impl<F> AskRollback<F>
where
    F: FnMut(&RollbackPrompt<'_>) -> bool,
{
    /// Wraps `ask`.
    pub const fn new(ask: F) -> Self {
        Self(ask)
    }
}

impl<F> RollbackDecider for AskRollback<F>
where
    F: FnMut(&RollbackPrompt<'_>) -> bool,
{
    fn should_roll_back(&mut self, prompt: &RollbackPrompt<'_>) -> bool {
        (self.0)(prompt)
    }
}

/// Turns a failure into an [`OperationOutcome`], restoring as required.
#[derive(Debug, Clone, Copy)]
pub struct RollbackCoordinator<'a> {
    store: &'a BackupStore,
}

impl<'a> RollbackCoordinator<'a> {
    /// Coordinator restoring through `store`.
    #[must_use]
    pub const fn new(store: &'a BackupStore) -> Self {
        Self { store }
    }

    /// Handles `failure` for `artifact`.
    pub fn handle(
        &self,
        failure: PipelineFailure,
        artifact: &Utf8Path,
        backup: Option<&Backup>,
        decider: &mut dyn RollbackDecider,
    ) -> OperationOutcome {
        let Some(backup) = backup else {
            warn!(
                target: ROLLBACK_TARGET,
                kind = %failure.kind(),
                stage = %failure.stage(),
                "failure before backup; artifact untouched"
            );
            return outcome(artifact, failure, None, OperationStatus::RolledBack, Restoration::NotAttempted);
        };

        if failure.is_policy_governed() {
            let prompt = RollbackPrompt {
                failure: &failure,
                artifact,
                backup,
            };
            if !decider.should_roll_back(&prompt) {
                warn!(
                    target: ROLLBACK_TARGET,
                    artifact = %artifact,
                    "rollback declined; patch left in place unverified"
                );
                return outcome(
                    artifact,
                    failure,
                    Some(backup),
                    OperationStatus::Unverified,
                    Restoration::Declined,
                );
            }
        }

        match self.store.restore(backup) {
            Ok(action) => {
                info!(
                    target: ROLLBACK_TARGET,
                    artifact = %artifact,
                    kind = %failure.kind(),
                    ?action,
                    "rolled back"
                );
                let restoration = match action {
                    RestoreAction::Unchanged => Restoration::Unchanged,
                    RestoreAction::Restored => Restoration::Restored,
                };
                outcome(artifact, failure, Some(backup), OperationStatus::RolledBack, restoration)
            }
            Err(restore_error) => {
                error!(
                    target: ROLLBACK_TARGET,
                    artifact = %artifact,
                    backup = %backup.path(),
                    error = %restore_error,
                    "RESTORE FAILED; manual recovery required"
                );
                outcome(
                    artifact,
                    failure,
                    Some(backup),
                    OperationStatus::RestoreFailed,
                    Restoration::Failed(restore_error),
                )
            }
        }
    }
}

fn outcome(
    artifact: &Utf8Path,
    failure: PipelineFailure,
    backup: Option<&Backup>,
    status: OperationStatus,
    restoration: Restoration,
) -> OperationOutcome {
    OperationOutcome {
        artifact: artifact.to_owned(),
        status,
        failure: Some(failure),
        backup: backup.map(Into::into),
        planned_backup: None,
        restoration,
        diagnostics: Diagnostics::default(),
    }
}
