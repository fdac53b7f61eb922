//! Interactive rollback confirmation.

use std::io::{BufRead, Write};

use patchgate::{
    AutoRollback, NeverRollback, RollbackDecider, RollbackPrompt, manual_recovery_command,
};
use patchgate_config::RollbackPolicy;
use tracing::warn;

const PROMPT_TARGET: &str = "patchgate::prompt";

/// Asks on `output` and reads the answer from `input`. Only `y` or `yes`
/// (any case) confirms; end of input or a read error declines.
pub(crate) struct PromptDecider<'a, R, W> {
    input: &'a mut R,
    output: &'a mut W,
}

impl<'a, R: BufRead, W: Write> PromptDecider<'a, R, W> {
    pub(crate) fn new(input: &'a mut R, output: &'a mut W) -> Self {
        Self { input, output }
    }

    fn ask(&mut self, prompt: &RollbackPrompt<'_>) -> std::io::Result<String> {
        writeln!(self.output, "Validation failed: {}", prompt.failure)?;
        writeln!(
            self.output,
            "The patch is committed to {}; the original is in {}.",
            prompt.artifact,
            prompt.backup.path()
        )?;
        write!(self.output, "Roll back to the backup? [y/N] ")?;
        self.output.flush()?;
        let mut answer = String::new();
        self.input.read_line(&mut answer)?;
        Ok(answer)
    }
}

impl<R: BufRead, W: Write> RollbackDecider for PromptDecider<'_, R, W> {
    fn should_roll_back(&mut self, prompt: &RollbackPrompt<'_>) -> bool {
        match self.ask(prompt) {
            Ok(answer) => {
                let confirmed = matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes");
                if !confirmed {
                    let _ = writeln!(
                        self.output,
                        "Keeping the patch. To undo it later: {}",
                        manual_recovery_command(prompt.backup.path(), prompt.artifact)
                    );
                }
                confirmed
            }
            Err(error) => {
                warn!(target: PROMPT_TARGET, %error, "rollback prompt unavailable; declining");
                false
            }
        }
    }
}

/// Decider implementing `policy`; the prompt reads from `input`.
pub(crate) fn decider_for<'a, R: BufRead, W: Write>(
    policy: RollbackPolicy,
    input: &'a mut R,
    output: &'a mut W,
) -> Box<dyn RollbackDecider + 'a> {
    match policy {
        RollbackPolicy::Prompt => Box::new(PromptDecider::new(input, output)),
        RollbackPolicy::Auto => Box::new(AutoRollback),
        RollbackPolicy::Never => Box::new(NeverRollback),
    }
}
