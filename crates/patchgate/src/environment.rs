//! Preflight checks run before anything is touched.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::validation::{CommandRunner, CommandSpec};

const ENVIRONMENT_TARGET: &str = "patchgate::environment";

/// The environment is not fit for the operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvironmentError {
    /// The artifact does not exist.
    #[error("artifact {path} does not exist")]
    Missing {
        /// Artifact path.
        path: Utf8PathBuf,
    },
    /// The artifact is not a regular file.
    #[error("artifact {path} is not a regular file")]
    NotAFile {
        /// Artifact path.
        path: Utf8PathBuf,
    },
    /// The artifact is read-only.
    #[error("artifact {path} is not writable")]
    ReadOnly {
        /// Artifact path.
        path: Utf8PathBuf,
    },
    /// The artifact cannot be read as UTF-8 text.
    #[error("artifact {path} is not readable text: {message}")]
    Unreadable {
        /// Artifact path.
        path: Utf8PathBuf,
        /// Error description.
        message: String,
    },
    /// The readiness command could not be run or did not succeed.
    #[error("readiness check '{command}' failed: {message}")]
    ProbeFailed {
        /// Rendered command line.
        command: String,
        /// What went wrong.
        message: String,
        /// Suggested remedy.
        hint: Option<String>,
    },
}

impl EnvironmentError {
    /// Suggested remedy, when one is configured.
    #[must_use]
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::ProbeFailed { hint, .. } => hint.as_deref(),
            _ => None,
        }
    }
}

/// A command that must succeed, and optionally print a line, before the
/// operation proceeds. Typically checks that a service is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessProbe {
    command: CommandSpec,
    expect_line: Option<String>,
    hint: Option<String>,
}

impl ReadinessProbe {
    /// Probe that only requires a zero exit.
    #[must_use]
    pub const fn new(command: CommandSpec) -> Self {
        Self {
            command,
            expect_line: None,
            hint: None,
        }
    }

    /// Also require a stdout line equal to `line` (surrounding whitespace
    /// ignored).
    #[must_use]
    pub fn expecting(mut self, line: impl Into<String>) -> Self {
        self.expect_line = Some(line.into());
        self
    }

    /// Remedy shown when the probe fails.
    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Probe command.
    #[must_use]
    pub const fn command(&self) -> &CommandSpec {
        &self.command
    }
}

/// Confirms the artifact exists, is a regular file, and is writable.
///
/// # Errors
///
/// Returns the first [`EnvironmentError`] found.
pub fn check_artifact(path: &Utf8Path) -> Result<(), EnvironmentError> {
    let metadata = fs::metadata(path).map_err(|_| EnvironmentError::Missing {
        path: path.to_owned(),
    })?;
    if !metadata.is_file() {
        return Err(EnvironmentError::NotAFile {
            path: path.to_owned(),
        });
    }
    if metadata.permissions().readonly() {
        return Err(EnvironmentError::ReadOnly {
            path: path.to_owned(),
        });
    }
    debug!(target: ENVIRONMENT_TARGET, artifact = %path, "artifact is a writable file");
    Ok(())
}

/// Reads the artifact as text.
///
/// # Errors
///
/// Returns [`EnvironmentError::Unreadable`] for I/O errors and non-UTF-8
/// content.
pub fn read_artifact(path: &Utf8Path) -> Result<String, EnvironmentError> {
    fs::read_to_string(path).map_err(|error| EnvironmentError::Unreadable {
        path: path.to_owned(),
        message: error.to_string(),
    })
}

/// Runs the readiness probe.
///
/// # Errors
///
/// Returns [`EnvironmentError::ProbeFailed`] when the probe cannot run,
/// times out, exits non-zero, or does not list the expected line.
pub fn check_readiness<R: CommandRunner + ?Sized>(
    runner: &R,
    probe: &ReadinessProbe,
) -> Result<(), EnvironmentError> {
    let failed = |message: String| {
        warn!(
            target: ENVIRONMENT_TARGET,
            command = %probe.command.display_line(),
            %message,
            "readiness check failed"
        );
        EnvironmentError::ProbeFailed {
            command: probe.command.display_line(),
            message,
            hint: probe.hint.clone(),
        }
    };

    let output = runner
        .run(&probe.command)
        .map_err(|error| failed(error.to_string()))?;
    if output.timed_out {
        return Err(failed(format!(
            "timed out after {}s",
            probe.command.timeout().as_secs()
        )));
    }
    if output.exit_code != Some(0) {
        return Err(failed(match output.exit_code {
            Some(code) => format!("exited with status {code}"),
            None => "terminated by signal".to_owned(),
        }));
    }
    if let Some(expected) = probe.expect_line.as_deref()
        && !output.stdout.lines().any(|line| line.trim() == expected)
    {
        return Err(failed(format!("output did not list '{expected}'")));
    }

    debug!(
        target: ENVIRONMENT_TARGET,
        command = %probe.command.display_line(),
        "readiness check passed"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use camino::Utf8PathBuf;
    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;
    use crate::validation::test_doubles::{ScriptedRunner, exited, timed_out};

    fn probe() -> ReadinessProbe {
        ReadinessProbe::new(
            CommandSpec::new("docker", Duration::from_secs(10)).with_args(["compose", "ps"]),
        )
        .expecting("backend")
        .with_hint("start services with: docker compose up -d")
    }

    fn temp_path(dir: &TempDir, name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join(name)).expect("utf-8 temp path")
    }

    #[test]
    fn missing_artifact_is_reported() {
        let dir = TempDir::new().expect("temp dir");
        let error = check_artifact(&temp_path(&dir, "absent.txt")).expect_err("missing");
        assert!(matches!(error, EnvironmentError::Missing { .. }));
    }

    #[test]
    fn directories_are_not_artifacts() {
        let dir = TempDir::new().expect("temp dir");
        let path = temp_path(&dir, "nested");
        fs::create_dir(&path).expect("mkdir");
        assert!(matches!(
            check_artifact(&path),
            Err(EnvironmentError::NotAFile { .. })
        ));
    }

    #[test]
    fn read_only_artifacts_are_rejected() {
        let dir = TempDir::new().expect("temp dir");
        let path = temp_path(&dir, "locked.txt");
        fs::write(&path, "x").expect("seed");
        let mut permissions = fs::metadata(&path).expect("metadata").permissions();
        permissions.set_readonly(true);
        fs::set_permissions(&path, permissions).expect("chmod");

        assert!(matches!(
            check_artifact(&path),
            Err(EnvironmentError::ReadOnly { .. })
        ));
    }

    #[test]
    fn non_utf8_artifacts_are_unreadable() {
        let dir = TempDir::new().expect("temp dir");
        let path = temp_path(&dir, "binary.bin");
        fs::write(&path, [0xff_u8, 0xfe, 0x00]).expect("seed");
        assert!(matches!(
            read_artifact(&path),
            Err(EnvironmentError::Unreadable { .. })
        ));
    }

    #[test]
    fn readiness_passes_when_expected_line_is_listed() {
        let runner = ScriptedRunner::new().then_output(exited(0, "db\nbackend\n"));
        check_readiness(&runner, &probe()).expect("ready");
    }

    #[rstest]
    #[case::not_listed(exited(0, "db\nbackend-worker\n"))]
    #[case::non_zero(exited(1, "backend\n"))]
    #[case::timed_out(timed_out("backend\n"))]
    fn readiness_failures_carry_hint(#[case] output: crate::validation::CommandOutput) {
        let runner = ScriptedRunner::new().then_output(output);
        let error = check_readiness(&runner, &probe()).expect_err("not ready");
        assert_eq!(error.hint(), Some("start services with: docker compose up -d"));
    }

    #[test]
    fn readiness_spawn_failure_is_an_environment_error() {
        let runner = ScriptedRunner::new().then_spawn_failure("docker");
        assert!(matches!(
            check_readiness(&runner, &probe()),
            Err(EnvironmentError::ProbeFailed { .. })
        ));
    }
}
