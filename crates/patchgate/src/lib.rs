//! Transactional patch application.
//!
//! `patchgate` applies one textual patch to one artifact as a transaction.
//! The target is located with an ordered list of strategies and must match
//! exactly once; the artifact is snapshotted before anything is written; the
//! candidate is verified before an atomic rename replaces the live file; and
//! an optional external check decides whether the change stands. Any failure
//! restores the snapshot, except a failed check whose rollback the caller
//! may decline.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use patchgate::{
//!     AutoRollback, BackupStore, CommandSpec, Operation, OutcomeMarkers, PatchSpec, Pipeline,
//!     ProcessRunner, Reporter, ValidationGate,
//! };
//!
//! let patch = PatchSpec::new("status: pending", "status: confirmed")
//!     .with_required_markers(["confirmed"]);
//! let gate = ValidationGate::new(
//!     CommandSpec::new("make", Duration::from_secs(120)).with_args(["test"]),
//!     OutcomeMarkers::new(r"\d+ passed", ["FAILED"]).expect("valid markers"),
//! );
//! let operation = Operation::new("state.yaml", patch).with_validation(gate);
//! let pipeline = Pipeline::new(operation, BackupStore::default(), ProcessRunner);
//! let outcome = pipeline.run(&mut AutoRollback);
//! print!("{}", Reporter::new().render(&outcome));
//! ```

pub mod apply;
pub mod backup;
pub mod commit;
pub mod environment;
pub mod error;
pub mod locate;
pub mod operation;
pub mod outcome;
pub mod pipeline;
pub mod report;
pub mod rollback;
pub mod spec;
pub mod validation;
pub mod verify;

#[cfg(test)]
mod tests;

pub use self::apply::{AppliedPatch, ApplyError, PatchApplier};
pub use self::backup::{Backup, BackupError, BackupStore, RestoreAction, RestoreError};
pub use self::commit::{AtomicWriter, StagedWrite, WriteError};
pub use self::environment::{EnvironmentError, ReadinessProbe};
pub use self::error::{FailureKind, PipelineFailure, Stage};
pub use self::locate::{LocateError, MatchResult, NotFoundDiagnostic, Span, TargetLocator};
pub use self::operation::{Hint, ManifestError, Operation};
pub use self::outcome::{BackupRef, Diagnostics, OperationOutcome, OperationStatus, Restoration};
pub use self::pipeline::Pipeline;
pub use self::report::{Reporter, manual_recovery_command};
pub use self::rollback::{
    AskRollback, AutoRollback, NeverRollback, RollbackCoordinator, RollbackDecider, RollbackPrompt,
};
pub use self::spec::{HeuristicRule, LocateStrategy, PatchSpec, StrategyKind, StructuralPattern};
pub use self::validation::{
    CommandOutput, CommandRunner, CommandSpec, OutcomeMarkers, ProcessRunner, ValidationError,
    ValidationGate, ValidationOutcome, ValidationRunner,
};
pub use self::verify::{CheckPhase, IntegrityError, IntegrityVerifier, Invariant};
