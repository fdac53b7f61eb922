//! Scripted command runner for exercising the gate without processes.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use super::{CommandOutput, CommandRunner, CommandSpec, ValidationError};

/// Replays queued results in order and records every command it was given.
/// Once the queue is empty, further runs repeat the fallback result.
#[derive(Debug, Default)]
pub(crate) struct ScriptedRunner {
    queue: RefCell<VecDeque<Result<CommandOutput, ValidationError>>>,
    fallback: Option<CommandOutput>,
    seen: RefCell<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn then_output(self, output: CommandOutput) -> Self {
        self.queue.borrow_mut().push_back(Ok(output));
        self
    }

    pub(crate) fn then_spawn_failure(self, program: &str) -> Self {
        self.queue.borrow_mut().push_back(Err(ValidationError::Spawn {
            program: program.to_owned(),
            source: Arc::new(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no such program",
            )),
        }));
        self
    }

    pub(crate) fn always(mut self, output: CommandOutput) -> Self {
        self.fallback = Some(output);
        self
    }

    pub(crate) fn seen(&self) -> Vec<CommandSpec> {
        self.seen.borrow().clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, command: &CommandSpec) -> Result<CommandOutput, ValidationError> {
        self.seen.borrow_mut().push(command.clone());
        if let Some(next) = self.queue.borrow_mut().pop_front() {
            return next;
        }
        Ok(self.fallback.clone().unwrap_or_default())
    }
}

/// Output of a run that exited on its own.
pub(crate) fn exited(code: i32, stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code: Some(code),
        stdout: stdout.to_owned(),
        stderr: String::new(),
        timed_out: false,
        elapsed: Duration::from_millis(5),
    }
}

/// Output of a run killed at its timeout.
pub(crate) fn timed_out(stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code: None,
        stdout: stdout.to_owned(),
        stderr: String::new(),
        timed_out: true,
        elapsed: Duration::from_secs(1),
    }
}
