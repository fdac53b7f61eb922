//! The transactional pipeline.
//!
//! Stages run strictly in sequence: preflight, locate, backup, apply and
//! verify, commit, validate. The snapshot is taken once the target has been
//! searched for, whatever the search found, so every run past preflight
//! leaves an auditable backup. The first failure hands control to the
//! [`RollbackCoordinator`]; the pipeline itself never exits the process.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::apply::PatchApplier;
use crate::backup::{Backup, BackupStore, timestamp_id};
use crate::commit::AtomicWriter;
use crate::environment::{check_artifact, check_readiness, read_artifact};
use crate::error::PipelineFailure;
use crate::locate::{LocateError, MatchResult, TargetLocator};
use crate::operation::Operation;
use crate::outcome::{Diagnostics, OperationOutcome};
use crate::rollback::{RollbackCoordinator, RollbackDecider};
use crate::validation::{CommandRunner, ValidationRunner};
use crate::verify::{CheckPhase, IntegrityError, IntegrityVerifier};

const PIPELINE_TARGET: &str = "patchgate::pipeline";
const CHANGE_SUMMARY_LINES: usize = 15;

/// Runs one [`Operation`] end to end.
#[derive(Debug)]
pub struct Pipeline<R> {
    operation: Operation,
    store: BackupStore,
    runner: R,
}

impl<R: CommandRunner> Pipeline<R> {
    /// Builds a pipeline; `runner` executes the readiness probe and the
    /// validation gate.
    pub const fn new(operation: Operation, store: BackupStore, runner: R) -> Self {
        Self {
            operation,
            store,
            runner,
        }
    }

    /// Operation being run.
    pub const fn operation(&self) -> &Operation {
        &self.operation
    }

    /// Runner used for the readiness probe and validation gate.
    pub const fn runner(&self) -> &R {
        &self.runner
    }

    /// Runs the operation, consulting `decider` only when a completed
    /// validation run fails.
    pub fn run(&self, decider: &mut dyn RollbackDecider) -> OperationOutcome {
        let artifact = self.operation.artifact();
        info!(
            target: PIPELINE_TARGET,
            artifact = %artifact,
            operation = self.operation.name().unwrap_or("unnamed"),
            "operation started"
        );
        let coordinator = RollbackCoordinator::new(&self.store);
        let stamp = timestamp_id(OffsetDateTime::now_utc());
        let planned = stamp
            .as_ref()
            .ok()
            .and_then(|id| self.store.next_backup_path(artifact, id).ok());
        let original = match self.preflight(artifact) {
            Ok(original) => original,
            Err(failure) => return self.abort(&coordinator, failure, planned, decider),
        };

        let located = TargetLocator::new().locate(&original, self.operation.patch());
        let backup = match stamp
            .and_then(|id| self.store.snapshot_at(artifact, &id))
        {
            Ok(backup) => backup,
            Err(error) => return self.abort(&coordinator, error.into(), planned, decider),
        };

        let mut diagnostics = Diagnostics::default();
        match self.transact(artifact, &original, located, &backup, &mut diagnostics) {
            Ok(()) => {
                info!(target: PIPELINE_TARGET, artifact = %artifact, "operation committed");
                diagnostics.summary = self.operation.summary().to_vec();
                let mut outcome = OperationOutcome::committed(artifact, &backup);
                outcome.diagnostics = diagnostics;
                outcome
            }
            Err(failure) => {
                warn!(
                    target: PIPELINE_TARGET,
                    kind = %failure.kind(),
                    stage = %failure.stage(),
                    error = %failure,
                    "operation failed"
                );
                if let Some(validation) = failure.validation() {
                    diagnostics.hints = self.operation.hints_for(&validation.searchable_text());
                    diagnostics.validation = Some(validation.clone());
                }
                let mut outcome = coordinator.handle(failure, artifact, Some(&backup), decider);
                outcome.diagnostics = diagnostics;
                outcome
            }
        }
    }

    fn abort(
        &self,
        coordinator: &RollbackCoordinator<'_>,
        failure: PipelineFailure,
        planned_backup: Option<Utf8PathBuf>,
        decider: &mut dyn RollbackDecider,
    ) -> OperationOutcome {
        let mut diagnostics = Diagnostics::default();
        if let PipelineFailure::Environment(error) = &failure {
            diagnostics.hints.extend(error.hint().map(str::to_owned));
        }
        let mut outcome =
            coordinator.handle(failure, self.operation.artifact(), None, decider);
        outcome.planned_backup = planned_backup;
        outcome.diagnostics = diagnostics;
        outcome
    }

    fn preflight(&self, artifact: &Utf8Path) -> Result<String, PipelineFailure> {
        check_artifact(artifact)?;
        if let Some(probe) = self.operation.readiness() {
            check_readiness(&self.runner, probe)?;
        }
        Ok(read_artifact(artifact)?)
    }

    fn transact(
        &self,
        artifact: &Utf8Path,
        original: &str,
        located: Result<MatchResult, LocateError>,
        backup: &Backup,
        diagnostics: &mut Diagnostics,
    ) -> Result<(), PipelineFailure> {
        let patch = self.operation.patch();
        let matched = located?;
        diagnostics.strategy = Some(matched.strategy().kind());
        diagnostics.approximate = matched.is_approximate();
        if matched.is_approximate() {
            warn!(
                target: PIPELINE_TARGET,
                strategy = %matched.strategy().kind(),
                span = %matched.span(),
                "approximate match; review the change"
            );
            diagnostics.notes.push(format!(
                "target located by the {} strategy; review the change before relying on it",
                matched.strategy().kind()
            ));
        }

        let verifier = IntegrityVerifier::new(
            patch.required_markers().to_vec(),
            self.operation.invariants().to_vec(),
        );
        verifier.check_invariants(original, CheckPhase::Precondition)?;
        let applied = PatchApplier::new().apply(original, &matched, patch)?;
        verifier.verify(original, &applied)?;

        AtomicWriter::with_marker(patch.staging_marker()).commit(artifact, applied.candidate())?;
        match fs::read(artifact) {
            Ok(committed) if committed == applied.candidate().as_bytes() => {}
            _ => return Err(IntegrityError::CommittedMismatch.into()),
        }
        info!(
            target: PIPELINE_TARGET,
            artifact = %artifact,
            backup = %backup.path(),
            "patch committed"
        );
        diagnostics.change_summary = Some(change_summary(original, applied.candidate()));

        let Some(gate) = self.operation.validation() else {
            diagnostics
                .notes
                .push("no validation gate configured; the patch was not externally checked".to_owned());
            return Ok(());
        };
        let outcome = ValidationRunner::new(&self.runner).run(gate)?;
        if outcome.timed_out {
            return Err(PipelineFailure::ValidationTimeout(Box::new(outcome)));
        }
        if !outcome.passed {
            return Err(PipelineFailure::ValidationFailed(Box::new(outcome)));
        }
        diagnostics.validation = Some(outcome);
        Ok(())
    }
}

/// First lines of the unified diff between `before` and `after`.
#[must_use]
pub fn change_summary(before: &str, after: &str) -> String {
    let patch = diffy::create_patch(before, after).to_string();
    let lines: Vec<&str> = patch.lines().collect();
    let mut summary = lines
        .iter()
        .take(CHANGE_SUMMARY_LINES)
        .copied()
        .collect::<Vec<_>>()
        .join("\n");
    if lines.len() > CHANGE_SUMMARY_LINES {
        summary.push_str(&format!(
            "\n... ({} more lines)",
            lines.len() - CHANGE_SUMMARY_LINES
        ));
    }
    summary
}
