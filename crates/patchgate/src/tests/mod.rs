//! Crate-level integration and BDD tests.

use std::fs;
use std::time::Duration;

use camino::Utf8PathBuf;
use tempfile::TempDir;

use crate::backup::BackupStore;
use crate::operation::Operation;
use crate::outcome::OperationStatus;
use crate::pipeline::Pipeline;
use crate::report::Reporter;
use crate::rollback::AutoRollback;
use crate::spec::{LocateStrategy, PatchSpec, StructuralPattern};
use crate::validation::test_doubles::{ScriptedRunner, exited};
use crate::validation::{CommandSpec, OutcomeMarkers, ValidationGate};


#[test]
fn structural_section_is_replaced_end_to_end() {
    let dir = TempDir::new().expect("temp dir");
    let artifact = Utf8PathBuf::from_path_buf(dir.path().join("app.ini")).expect("utf-8 path");
    fs::write(&artifact, "[core]\nmode = a\n\n[cache]\nttl = 5\n").expect("seed");

    let patch = PatchSpec::new("", "[core]\nmode = b\n\n")
        .with_strategies(vec![LocateStrategy::StructuralPattern(
            StructuralPattern::new(r"(?m)^\[core\]").with_terminator(r"(?m)^\[", false),
        )])
        .with_required_markers(["mode = b"]);
    let gate = ValidationGate::new(
        CommandSpec::new("check", Duration::from_secs(5)),
        OutcomeMarkers::new("ok", Vec::<String>::new()).expect("markers"),
    );
    let operation = Operation::new(artifact.clone(), patch).with_validation(gate);
    let runner = ScriptedRunner::new().then_output(exited(0, "ok"));
    let outcome = Pipeline::new(operation, BackupStore::default(), runner).run(&mut AutoRollback);

    assert_eq!(outcome.status, OperationStatus::Committed);
    assert_eq!(
        fs::read_to_string(&artifact).expect("read"),
        "[core]\nmode = b\n\n[cache]\nttl = 5\n"
    );
    let report = Reporter::new().render(&outcome);
    assert!(report.contains("Strategy: structural_pattern (approximate match"));
}
