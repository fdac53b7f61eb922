//! Human-readable operation report.
//!
//! Every failure path names the backup (or states that none was created and
//! where it would have gone) and prints the exact command that restores the
//! artifact by hand.

use std::fmt::{self, Write};

use camino::Utf8Path;

use crate::outcome::{OperationOutcome, OperationStatus, Restoration};
use crate::validation::ValidationOutcome;

const RULE: &str =
    "================================================================================";
const OUTPUT_PREVIEW_LINES: usize = 20;

/// Shell command restoring `artifact` from `backup`.
#[must_use]
pub fn manual_recovery_command(backup: &Utf8Path, artifact: &Utf8Path) -> String {
    format!("cp {} {}", shell_quote(backup.as_str()), shell_quote(artifact.as_str()))
}

fn shell_quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || "/._-+:=@,".contains(ch));
    if plain {
        value.to_owned()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

/// Renders [`OperationOutcome`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reporter;

impl Reporter {
    /// Creates a reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Renders the full report.
    #[must_use]
    pub fn render(&self, outcome: &OperationOutcome) -> String {
        Report(outcome).to_string()
    }
}

struct Report<'a>(&'a OperationOutcome);

impl fmt::Display for Report<'_> {
    fn fmt(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = self.0;
        writeln!(out, "{RULE}")?;
        writeln!(out, "PATCHGATE OPERATION REPORT")?;
        writeln!(out, "{RULE}")?;
        writeln!(out, "Artifact: {}", outcome.artifact)?;
        writeln!(out, "Status:   {}", outcome.status)?;
        writeln!(out, "Backup:   {}", backup_line(outcome))?;
        if let Some(strategy) = outcome.diagnostics.strategy {
            let caution = if outcome.diagnostics.approximate {
                " (approximate match: review the change)"
            } else {
                ""
            };
            writeln!(out, "Strategy: {strategy}{caution}")?;
        }
        writeln!(out)?;

        match outcome.failure.as_ref() {
            None => {
                writeln!(out, "PASSED: patch committed and all checks passed.")?;
                for line in &outcome.diagnostics.summary {
                    writeln!(out, "  {line}")?;
                }
            }
            Some(failure) => {
                let severity = if outcome.is_critical() { "CRITICAL" } else { "FAILED" };
                writeln!(
                    out,
                    "{severity}: {} during {}: {failure}",
                    failure.kind(),
                    failure.stage()
                )?;
                writeln!(out, "Restoration: {}", restoration_line(&outcome.restoration))?;
            }
        }

        if !outcome.diagnostics.notes.is_empty() {
            writeln!(out)?;
            writeln!(out, "Notes:")?;
            for note in &outcome.diagnostics.notes {
                writeln!(out, "  - {note}")?;
            }
        }

        if let Some(validation) = outcome.diagnostics.validation.as_ref() {
            render_validation(out, validation)?;
        }

        if !outcome.diagnostics.hints.is_empty() {
            writeln!(out)?;
            writeln!(out, "Recommended actions:")?;
            for hint in &outcome.diagnostics.hints {
                writeln!(out, "  - {hint}")?;
            }
        }

        if let Some(diff) = outcome.diagnostics.change_summary.as_deref() {
            writeln!(out)?;
            writeln!(out, "Changes:")?;
            for line in diff.lines() {
                writeln!(out, "  {line}")?;
            }
        }

        if !outcome.is_success() {
            render_recovery(out, outcome)?;
        }
        writeln!(out, "{RULE}")
    }
}

fn backup_line(outcome: &OperationOutcome) -> String {
    match (&outcome.backup, &outcome.planned_backup) {
        (Some(backup), _) => format!("{} (taken {} UTC)", backup.path, backup.timestamp_id),
        (None, Some(planned)) => format!("none created (planned: {planned})"),
        (None, None) => "none created".to_owned(),
    }
}

fn restoration_line(restoration: &Restoration) -> String {
    match restoration {
        Restoration::NotAttempted => "not needed; the artifact was never modified".to_owned(),
        Restoration::Unchanged => "artifact verified identical to the backup".to_owned(),
        Restoration::Restored => "artifact restored from the backup and verified".to_owned(),
        Restoration::Declined => {
            "declined; the patch remains on disk UNVERIFIED".to_owned()
        }
        Restoration::Failed(error) => format!("FAILED: {error}"),
    }
}

fn render_validation(out: &mut impl Write, validation: &ValidationOutcome) -> fmt::Result {
    writeln!(out)?;
    writeln!(out, "Validation: {}", validation.command_line)?;
    let exit = validation
        .exit_code
        .map_or_else(|| "none".to_owned(), |code| code.to_string());
    writeln!(
        out,
        "  passed: {}  exit code: {exit}  timed out: {}",
        yes_no(validation.passed),
        yes_no(validation.timed_out)
    )?;
    if !validation.failure_markers_found.is_empty() {
        writeln!(
            out,
            "  failure markers: {}",
            validation.failure_markers_found.join(", ")
        )?;
    }
    if validation.passed {
        return Ok(());
    }
    render_stream(out, "stdout", &validation.stdout)?;
    render_stream(out, "stderr", &validation.stderr)?;
    if let Some(diagnostics) = validation.diagnostics.as_deref() {
        writeln!(out, "  failure excerpt:")?;
        for line in diagnostics.lines() {
            writeln!(out, "    {line}")?;
        }
    }
    Ok(())
}

fn render_stream(out: &mut impl Write, label: &str, text: &str) -> fmt::Result {
    let total = text.lines().count();
    if total == 0 {
        return Ok(());
    }
    let skipped = total.saturating_sub(OUTPUT_PREVIEW_LINES);
    writeln!(out, "  {label} (last {} lines):", total - skipped)?;
    for line in text.lines().skip(skipped) {
        writeln!(out, "    {line}")?;
    }
    Ok(())
}

fn render_recovery(out: &mut impl Write, outcome: &OperationOutcome) -> fmt::Result {
    writeln!(out)?;
    writeln!(out, "Manual recovery:")?;
    match outcome.backup.as_ref() {
        Some(backup) => {
            writeln!(
                out,
                "  {}",
                manual_recovery_command(&backup.path, &outcome.artifact)
            )?;
        }
        None => {
            writeln!(
                out,
                "  no backup was created; {} was not modified by this run",
                outcome.artifact
            )?;
        }
    }
    if matches!(outcome.status, OperationStatus::RestoreFailed) {
        writeln!(
            out,
            "  Automatic restore failed. Run the command above before retrying."
        )?;
    }
    Ok(())
}

const fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;
    use insta::assert_snapshot;
    use rstest::rstest;

    use super::*;
    use crate::backup::BackupError;
    use crate::error::PipelineFailure;
    use crate::locate::LocateError;
    use crate::outcome::{BackupRef, Diagnostics};
    use crate::spec::StrategyKind;

    fn outcome(status: OperationStatus, failure: Option<PipelineFailure>) -> OperationOutcome {
        OperationOutcome {
            artifact: Utf8PathBuf::from("/srv/app/routes.txt"),
            status,
            failure,
            backup: Some(BackupRef {
                path: Utf8PathBuf::from("/srv/app/routes.txt.bak_20260101_120000"),
                timestamp_id: "20260101_120000".into(),
            }),
            planned_backup: None,
            restoration: Restoration::NotAttempted,
            diagnostics: Diagnostics::default(),
        }
    }

    fn ambiguous() -> PipelineFailure {
        PipelineFailure::Locate(LocateError::AmbiguousMatch {
            strategy: StrategyKind::Exact,
            count: 2,
            offsets: vec![0, 40],
        })
    }

    #[rstest]
    #[case::plain("/srv/a.txt", "/srv/a.txt")]
    #[case::spaces("/srv/my file.txt", "'/srv/my file.txt'")]
    #[case::quote("/srv/it's.txt", r"'/srv/it'\''s.txt'")]
    fn quotes_paths_for_the_shell(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(shell_quote(raw), expected);
    }

    #[test]
    fn recovery_command_is_copy_from_backup() {
        assert_snapshot!(
            manual_recovery_command(
                Utf8Path::new("/srv/app/routes.txt.bak_20260101_120000"),
                Utf8Path::new("/srv/app/routes.txt"),
            ),
            @"cp /srv/app/routes.txt.bak_20260101_120000 /srv/app/routes.txt"
        );
    }

    #[test]
    fn failure_report_names_backup_and_recovery() {
        let mut failed = outcome(OperationStatus::RolledBack, Some(ambiguous()));
        failed.restoration = Restoration::Unchanged;
        let report = Reporter::new().render(&failed);

        assert!(report.contains("Status:   ROLLED BACK"));
        assert!(report.contains("Backup:   /srv/app/routes.txt.bak_20260101_120000"));
        assert!(report.contains("FAILED: AmbiguousMatchError during locate"));
        assert!(report.contains(
            "cp /srv/app/routes.txt.bak_20260101_120000 /srv/app/routes.txt"
        ));
    }

    #[test]
    fn success_report_shows_summary_and_changes() {
        let mut committed = outcome(OperationStatus::Committed, None);
        committed.diagnostics.summary = vec!["Health route added".into()];
        committed.diagnostics.change_summary = Some("-GET /a\n+GET /b".into());
        committed.diagnostics.strategy = Some(StrategyKind::Normalized);
        committed.diagnostics.approximate = true;
        let report = Reporter::new().render(&committed);

        assert!(report.contains("PASSED"));
        assert!(report.contains("  Health route added"));
        assert!(report.contains("  +GET /b"));
        assert!(report.contains("approximate match"));
        assert!(!report.contains("Manual recovery"));
    }

    #[test]
    fn missing_backup_is_stated_with_planned_path() {
        let mut failed = outcome(
            OperationStatus::RolledBack,
            Some(PipelineFailure::Backup(BackupError::Empty {
                path: Utf8PathBuf::from("/srv/app/routes.txt.bak_x"),
            })),
        );
        failed.backup = None;
        failed.planned_backup = Some(Utf8PathBuf::from("/srv/app/routes.txt.bak_x"));
        let report = Reporter::new().render(&failed);

        assert!(report.contains("Backup:   none created (planned: /srv/app/routes.txt.bak_x)"));
        assert!(report.contains("CRITICAL: BackupError"));
        assert!(report.contains("no backup was created"));
    }
}
