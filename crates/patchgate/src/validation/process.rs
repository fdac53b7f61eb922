//! Child-process execution with a hard timeout.
//!
//! [`ProcessRunner`] implements [`CommandRunner`] by spawning the command
//! with stdout and stderr redirected into anonymous temporary files, polling
//! for exit, and killing the child once the timeout elapses. Redirecting to
//! files rather than pipes means a chatty child can never block on a full
//! pipe buffer while we wait for it.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use tracing::{debug, warn};

use super::ValidationError;

const PROCESS_TARGET: &str = "patchgate::validation";
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A command line plus the limits it runs under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    working_dir: Option<Utf8PathBuf>,
    timeout: Duration,
}

impl CommandSpec {
    /// Creates a command with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            timeout,
        }
    }

    /// Replaces the argument list.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Runs the command from `dir`.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Program name or path.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Working directory, if any.
    #[must_use]
    pub fn working_dir(&self) -> Option<&Utf8PathBuf> {
        self.working_dir.as_ref()
    }

    /// Timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Shell-like rendering for reports and logs.
    #[must_use]
    pub fn display_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Everything observed from one run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Exit code; `None` when killed or terminated by a signal.
    pub exit_code: Option<i32>,
    /// Captured stdout (lossy UTF-8).
    pub stdout: String,
    /// Captured stderr (lossy UTF-8).
    pub stderr: String,
    /// Whether the timeout fired and the child was killed.
    pub timed_out: bool,
    /// Wall-clock run time.
    pub elapsed: Duration,
}

impl CommandOutput {
    /// Stdout followed by stderr.
    #[must_use]
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            return self.stdout.clone();
        }
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// Executes commands for the validation gate and readiness probe.
///
/// The production implementation is [`ProcessRunner`]. Tests substitute
/// scripted runners so pipeline behaviour can be exercised without spawning
/// anything.
pub trait CommandRunner {
    /// Runs `command` to completion or until its timeout.
    ///
    /// A timeout is not an error: it is reported through
    /// [`CommandOutput::timed_out`].
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the command cannot be spawned or its
    /// output cannot be collected.
    fn run(&self, command: &CommandSpec) -> Result<CommandOutput, ValidationError>;
}

impl<T: CommandRunner + ?Sized> CommandRunner for &T {
    fn run(&self, command: &CommandSpec) -> Result<CommandOutput, ValidationError> {
        (**self).run(command)
    }
}

/// Runs commands as local child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, command: &CommandSpec) -> Result<CommandOutput, ValidationError> {
        let program = command.program();
        let io_error = |error: std::io::Error| ValidationError::Io {
            program: program.to_owned(),
            source: Arc::new(error),
        };
        let mut stdout_file = tempfile::tempfile().map_err(io_error)?;
        let mut stderr_file = tempfile::tempfile().map_err(io_error)?;

        let mut process = Command::new(program);
        process
            .args(command.args())
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout_file.try_clone().map_err(io_error)?))
            .stderr(Stdio::from(stderr_file.try_clone().map_err(io_error)?));
        if let Some(dir) = command.working_dir() {
            process.current_dir(dir);
        }

        debug!(
            target: PROCESS_TARGET,
            command = %command.display_line(),
            timeout_secs = command.timeout().as_secs(),
            "spawning command"
        );
        let start = Instant::now();
        let mut child = process.spawn().map_err(|error| ValidationError::Spawn {
            program: program.to_owned(),
            source: Arc::new(error),
        })?;

        let (exit_code, timed_out) = loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(target: PROCESS_TARGET, ?status, "command exited");
                    break (status.code(), false);
                }
                Ok(None) if start.elapsed() >= command.timeout() => {
                    warn!(
                        target: PROCESS_TARGET,
                        command = %command.display_line(),
                        timeout_secs = command.timeout().as_secs(),
                        "command timed out, killing process"
                    );
                    drop(child.kill());
                    drop(child.wait());
                    break (None, true);
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(error) => return Err(io_error(error)),
            }
        };

        Ok(CommandOutput {
            exit_code,
            stdout: read_capture(&mut stdout_file).map_err(io_error)?,
            stderr: read_capture(&mut stderr_file).map_err(io_error)?,
            timed_out,
            elapsed: start.elapsed(),
        })
    }
}

fn read_capture(file: &mut File) -> std::io::Result<String> {
    file.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
