//! Operator policy for validation-only failures.
//!
//! Failures before the commit always roll back. Once the artifact has been
//! committed and only the external check failed, the patch may still be
//! correct, so the decision is delegated to this policy.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How the pipeline resolves a failed validation gate.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum RollbackPolicy {
    /// Ask the operator on the terminal.
    #[default]
    Prompt,
    /// Restore the backup without asking.
    Auto,
    /// Keep the committed patch and report it as unverified.
    Never,
}

/// Errors encountered while parsing a [`RollbackPolicy`] from text.
pub type RollbackPolicyParseError = strum::ParseError;
