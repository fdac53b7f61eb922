//! External validation gate.
//!
//! The gate runs one command under a timeout and classifies its stdout. A
//! run passes only when the success marker is present and no failure marker
//! is; the exit code is advisory unless the gate demands a zero exit. When a
//! completed run fails, an optional verbose re-run collects diagnostics.

mod process;
#[cfg(test)]
pub(crate) mod test_doubles;

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;
use tracing::{info, warn};

pub use process::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};

const VALIDATION_TARGET: &str = "patchgate::validation";

/// Timeout applied to the verbose diagnostic re-run.
pub const DEFAULT_DIAGNOSTIC_TIMEOUT: Duration = Duration::from_secs(60);
/// Characters kept in a failure excerpt.
pub const DEFAULT_EXCERPT_CHARS: usize = 800;

/// The validation command could not be run at all.
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    /// The command could not be started.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        /// Program name.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },
    /// Output capture or process polling failed.
    #[error("I/O error while running '{program}': {source}")]
    Io {
        /// Program name.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },
    /// The success marker is not a valid regex.
    #[error("invalid success marker '{pattern}': {message}")]
    InvalidMarker {
        /// Marker source.
        pattern: String,
        /// Compiler message.
        message: String,
    },
}

/// Positive and negative output markers.
#[derive(Debug, Clone)]
pub struct OutcomeMarkers {
    success: Regex,
    failure: Vec<String>,
}

impl OutcomeMarkers {
    /// Compiles the success marker.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidMarker`] when `success` is not a
    /// valid regex.
    pub fn new<I, S>(success: &str, failure: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let success = Regex::new(success).map_err(|error| ValidationError::InvalidMarker {
            pattern: success.to_owned(),
            message: error.to_string(),
        })?;
        Ok(Self {
            success,
            failure: failure.into_iter().map(Into::into).collect(),
        })
    }

    /// Success marker source.
    #[must_use]
    pub fn success_pattern(&self) -> &str {
        self.success.as_str()
    }

    /// Failure markers.
    #[must_use]
    pub fn failure_markers(&self) -> &[String] {
        &self.failure
    }
}

/// Why a run did not pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Failure markers were present.
    FailureMarkers(Vec<String>),
    /// The success marker was absent.
    MissingSuccessMarker,
    /// A zero exit was required and not observed.
    NonZeroExit(Option<i32>),
    /// The run was killed at its timeout.
    TimedOut,
}

/// Classification of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The run passed.
    Passed,
    /// The run failed.
    Failed(FailureReason),
}

/// Classifies a run from its stdout. Stderr never decides the verdict.
#[must_use]
pub fn classify(output: &CommandOutput, markers: &OutcomeMarkers, require_success_exit: bool) -> Verdict {
    if output.timed_out {
        return Verdict::Failed(FailureReason::TimedOut);
    }
    let stdout = output.stdout.as_str();
    let found: Vec<String> = markers
        .failure
        .iter()
        .filter(|marker| stdout.contains(marker.as_str()))
        .cloned()
        .collect();
    if !found.is_empty() {
        return Verdict::Failed(FailureReason::FailureMarkers(found));
    }
    if !markers.success.is_match(stdout) {
        return Verdict::Failed(FailureReason::MissingSuccessMarker);
    }
    if require_success_exit && output.exit_code != Some(0) {
        return Verdict::Failed(FailureReason::NonZeroExit(output.exit_code));
    }
    Verdict::Passed
}

/// Takes up to `max_chars` characters starting at the first anchor found,
/// trying anchors in order. Without an anchor the tail of `text` is used.
#[must_use]
pub fn excerpt(text: &str, anchors: &[String], max_chars: usize) -> String {
    let start = anchors
        .iter()
        .find_map(|anchor| text.find(anchor.as_str()));
    match start {
        Some(offset) => text
            .get(offset..)
            .unwrap_or_default()
            .chars()
            .take(max_chars)
            .collect(),
        None => {
            let total = text.chars().count();
            text.chars().skip(total.saturating_sub(max_chars)).collect()
        }
    }
}

/// Command, markers and diagnostics policy of the gate.
#[derive(Debug, Clone)]
pub struct ValidationGate {
    command: CommandSpec,
    markers: OutcomeMarkers,
    require_success_exit: bool,
    diagnostic: Option<CommandSpec>,
    excerpt_anchors: Vec<String>,
    excerpt_chars: usize,
}

impl ValidationGate {
    /// Gate that ignores the exit code and has no diagnostic re-run.
    #[must_use]
    pub fn new(command: CommandSpec, markers: OutcomeMarkers) -> Self {
        Self {
            command,
            markers,
            require_success_exit: false,
            diagnostic: None,
            excerpt_anchors: Vec::new(),
            excerpt_chars: DEFAULT_EXCERPT_CHARS,
        }
    }

    /// Also require exit code zero.
    #[must_use]
    pub const fn requiring_success_exit(mut self, required: bool) -> Self {
        self.require_success_exit = required;
        self
    }

    /// Adds a verbose re-run used after a failed run.
    #[must_use]
    pub fn with_diagnostic(mut self, command: CommandSpec) -> Self {
        self.diagnostic = Some(command);
        self
    }

    /// Sets where failure excerpts start and how long they are.
    #[must_use]
    pub fn with_excerpt(mut self, anchors: Vec<String>, max_chars: usize) -> Self {
        self.excerpt_anchors = anchors;
        self.excerpt_chars = max_chars;
        self
    }

    /// Primary command.
    #[must_use]
    pub const fn command(&self) -> &CommandSpec {
        &self.command
    }

    /// Markers.
    #[must_use]
    pub const fn markers(&self) -> &OutcomeMarkers {
        &self.markers
    }
}

/// Result of running the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    /// Rendered command line.
    pub command_line: String,
    /// Whether the gate passed.
    pub passed: bool,
    /// Classification detail.
    pub verdict: Verdict,
    /// Exit code of the primary run.
    pub exit_code: Option<i32>,
    /// Stdout of the primary run.
    pub stdout: String,
    /// Stderr of the primary run.
    pub stderr: String,
    /// Whether the primary run was killed at its timeout.
    pub timed_out: bool,
    /// Timeout applied to the primary run.
    pub timeout: Duration,
    /// Failure markers found in the primary run.
    pub failure_markers_found: Vec<String>,
    /// Excerpt of the most informative failure output.
    pub diagnostics: Option<String>,
}

impl ValidationOutcome {
    /// All captured text, primary output first then diagnostics.
    #[must_use]
    pub fn searchable_text(&self) -> String {
        let mut text = format!("{}\n{}", self.stdout, self.stderr);
        if let Some(diagnostics) = self.diagnostics.as_deref() {
            text.push('\n');
            text.push_str(diagnostics);
        }
        text
    }
}

/// Runs a [`ValidationGate`] through a [`CommandRunner`].
#[derive(Debug, Clone, Default)]
pub struct ValidationRunner<R> {
    runner: R,
}

impl<R: CommandRunner> ValidationRunner<R> {
    /// Wraps a command runner.
    pub const fn new(runner: R) -> Self {
        Self { runner }
    }

    /// Underlying runner.
    pub const fn runner(&self) -> &R {
        &self.runner
    }

    /// Runs the gate and classifies the outcome. A failed diagnostic re-run
    /// is logged and does not change the verdict.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the primary command cannot be run.
    pub fn run(&self, gate: &ValidationGate) -> Result<ValidationOutcome, ValidationError> {
        let output = self.runner.run(&gate.command)?;
        let verdict = classify(&output, &gate.markers, gate.require_success_exit);
        let passed = verdict == Verdict::Passed;
        let failure_markers_found = match &verdict {
            Verdict::Failed(FailureReason::FailureMarkers(found)) => found.clone(),
            _ => Vec::new(),
        };

        if passed {
            info!(
                target: VALIDATION_TARGET,
                command = %gate.command.display_line(),
                elapsed_ms = u64::try_from(output.elapsed.as_millis()).unwrap_or(u64::MAX),
                "validation passed"
            );
        } else {
            warn!(
                target: VALIDATION_TARGET,
                command = %gate.command.display_line(),
                ?verdict,
                exit_code = ?output.exit_code,
                "validation failed"
            );
        }

        let diagnostics = if passed {
            None
        } else {
            Some(self.diagnostics(gate, &output))
        };

        Ok(ValidationOutcome {
            command_line: gate.command.display_line(),
            passed,
            verdict,
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            timed_out: output.timed_out,
            timeout: gate.command.timeout(),
            failure_markers_found,
            diagnostics,
        })
    }

    fn diagnostics(&self, gate: &ValidationGate, primary: &CommandOutput) -> String {
        let rerun = match gate.diagnostic.as_ref() {
            Some(command) if !primary.timed_out => match self.runner.run(command) {
                Ok(output) => Some(output.combined()),
                Err(error) => {
                    warn!(
                        target: VALIDATION_TARGET,
                        %error,
                        "diagnostic re-run failed; using primary output"
                    );
                    None
                }
            },
            _ => None,
        };
        let text = rerun.unwrap_or_else(|| primary.combined());
        excerpt(&text, &gate.excerpt_anchors, gate.excerpt_chars)
    }
}
