//! Operation manifests.
//!
//! One TOML file describes one operation: the artifact, the patch, the
//! invariants, and the gates around it. Relative paths resolve against the
//! manifest's directory. Manifests are validated on load so a bad pattern or
//! a zero timeout is rejected before anything runs.

use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use thiserror::Error;

use crate::environment::ReadinessProbe;
use crate::spec::{LocateStrategy, PatchSpec, default_strategies};
use crate::validation::{
    CommandSpec, DEFAULT_DIAGNOSTIC_TIMEOUT, DEFAULT_EXCERPT_CHARS, OutcomeMarkers,
    ValidationGate,
};
use crate::verify::Invariant;

const DEFAULT_READINESS_TIMEOUT_SECS: u64 = 10;
const DEFAULT_VALIDATION_TIMEOUT_SECS: u64 = 120;

/// Errors raised while loading a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest could not be read.
    #[error("failed to read manifest {path}: {message}")]
    Read {
        /// Manifest path.
        path: Utf8PathBuf,
        /// I/O error description.
        message: String,
    },
    /// The manifest is not valid TOML for the schema.
    #[error("failed to parse manifest {path}: {source}")]
    Parse {
        /// Manifest path.
        path: Utf8PathBuf,
        /// Parser error.
        #[source]
        source: Box<toml::de::Error>,
    },
    /// The manifest parsed but is not usable.
    #[error("invalid manifest {path}: {reason}")]
    Invalid {
        /// Manifest path.
        path: Utf8PathBuf,
        /// What is wrong.
        reason: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    #[serde(default)]
    name: Option<String>,
    artifact: Utf8PathBuf,
    patch: RawPatch,
    #[serde(default)]
    invariants: Vec<Invariant>,
    #[serde(default)]
    readiness: Option<RawReadiness>,
    #[serde(default)]
    validation: Option<RawValidation>,
    #[serde(default)]
    hints: Vec<Hint>,
    #[serde(default)]
    fallback_hint: Option<String>,
    #[serde(default)]
    summary: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPatch {
    #[serde(default)]
    old: String,
    new: String,
    #[serde(default = "default_strategies")]
    strategies: Vec<LocateStrategy>,
    #[serde(default)]
    required_markers: Vec<String>,
    #[serde(default)]
    staging_marker: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawReadiness {
    program: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    expect_line: Option<String>,
    #[serde(default = "default_readiness_timeout")]
    timeout_secs: u64,
    #[serde(default)]
    hint: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawValidation {
    program: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    working_dir: Option<Utf8PathBuf>,
    #[serde(default = "default_validation_timeout")]
    timeout_secs: u64,
    success_marker: String,
    #[serde(default)]
    failure_markers: Vec<String>,
    #[serde(default)]
    require_success_exit: bool,
    #[serde(default)]
    diagnostic_args: Option<Vec<String>>,
    #[serde(default = "default_diagnostic_timeout")]
    diagnostic_timeout_secs: u64,
    #[serde(default)]
    excerpt_anchors: Vec<String>,
    #[serde(default = "default_excerpt_chars")]
    excerpt_chars: usize,
}

const fn default_readiness_timeout() -> u64 {
    DEFAULT_READINESS_TIMEOUT_SECS
}

const fn default_validation_timeout() -> u64 {
    DEFAULT_VALIDATION_TIMEOUT_SECS
}

const fn default_diagnostic_timeout() -> u64 {
    DEFAULT_DIAGNOSTIC_TIMEOUT.as_secs()
}

const fn default_excerpt_chars() -> usize {
    DEFAULT_EXCERPT_CHARS
}

/// A recommended action shown when validation output mentions any keyword.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Hint {
    /// Keywords searched for in the validation output.
    pub when_output_contains: Vec<String>,
    /// Advice shown when a keyword is found.
    pub message: String,
}

impl Hint {
    /// Whether `output` mentions any keyword.
    #[must_use]
    pub fn matches(&self, output: &str) -> bool {
        self.when_output_contains
            .iter()
            .any(|keyword| output.contains(keyword.as_str()))
    }
}

/// A validated operation.
#[derive(Debug, Clone)]
pub struct Operation {
    name: Option<String>,
    artifact: Utf8PathBuf,
    patch: PatchSpec,
    invariants: Vec<Invariant>,
    readiness: Option<ReadinessProbe>,
    validation: Option<ValidationGate>,
    hints: Vec<Hint>,
    fallback_hint: Option<String>,
    summary: Vec<String>,
}

impl Operation {
    /// Operation with only an artifact and a patch.
    #[must_use]
    pub fn new(artifact: impl Into<Utf8PathBuf>, patch: PatchSpec) -> Self {
        Self {
            name: None,
            artifact: artifact.into(),
            patch,
            invariants: Vec::new(),
            readiness: None,
            validation: None,
            hints: Vec::new(),
            fallback_hint: None,
            summary: Vec::new(),
        }
    }

    /// Adds invariants.
    #[must_use]
    pub fn with_invariants(mut self, invariants: Vec<Invariant>) -> Self {
        self.invariants = invariants;
        self
    }

    /// Adds a readiness probe.
    #[must_use]
    pub fn with_readiness(mut self, probe: ReadinessProbe) -> Self {
        self.readiness = Some(probe);
        self
    }

    /// Adds a validation gate.
    #[must_use]
    pub fn with_validation(mut self, gate: ValidationGate) -> Self {
        self.validation = Some(gate);
        self
    }

    /// Adds hints and the fallback shown when none match.
    #[must_use]
    pub fn with_hints(mut self, hints: Vec<Hint>, fallback: Option<String>) -> Self {
        self.hints = hints;
        self.fallback_hint = fallback;
        self
    }

    /// Adds success summary lines.
    #[must_use]
    pub fn with_summary(mut self, summary: Vec<String>) -> Self {
        self.summary = summary;
        self
    }

    /// Loads and validates a manifest file.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError`] when the file cannot be read, parsed or
    /// validated.
    pub fn load(path: &Utf8Path) -> Result<Self, ManifestError> {
        let text = fs::read_to_string(path).map_err(|error| ManifestError::Read {
            path: path.to_owned(),
            message: error.to_string(),
        })?;
        let base = match path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent,
            _ => Utf8Path::new("."),
        };
        Self::from_toml(&text, path, base)
    }

    /// Parses manifest text; `origin` names the source in errors and
    /// relative paths resolve against `base`.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Parse`] or [`ManifestError::Invalid`].
    pub fn from_toml(text: &str, origin: &Utf8Path, base: &Utf8Path) -> Result<Self, ManifestError> {
        let raw: RawManifest = toml::from_str(text).map_err(|error| ManifestError::Parse {
            path: origin.to_owned(),
            source: Box::new(error),
        })?;
        let invalid = |reason: String| ManifestError::Invalid {
            path: origin.to_owned(),
            reason,
        };
        validate(&raw).map_err(invalid)?;

        let resolve = |path: Utf8PathBuf| {
            if path.is_absolute() {
                path
            } else {
                base.join(path)
            }
        };

        let mut patch = PatchSpec::new(raw.patch.old, raw.patch.new)
            .with_strategies(raw.patch.strategies)
            .with_required_markers(raw.patch.required_markers);
        if let Some(marker) = raw.patch.staging_marker {
            patch = patch.with_staging_marker(marker);
        }

        let readiness = raw.readiness.map(|probe| {
            let command = CommandSpec::new(probe.program, Duration::from_secs(probe.timeout_secs))
                .with_args(probe.args);
            let mut readiness = ReadinessProbe::new(command);
            if let Some(line) = probe.expect_line {
                readiness = readiness.expecting(line);
            }
            if let Some(hint) = probe.hint {
                readiness = readiness.with_hint(hint);
            }
            readiness
        });

        let validation = raw
            .validation
            .map(|gate| {
                let markers = OutcomeMarkers::new(&gate.success_marker, gate.failure_markers)
                    .map_err(|error| invalid(error.to_string()))?;
                let working_dir = resolve(gate.working_dir.unwrap_or_else(|| base.to_owned()));
                let command =
                    CommandSpec::new(gate.program.clone(), Duration::from_secs(gate.timeout_secs))
                        .with_args(gate.args)
                        .with_working_dir(working_dir.clone());
                let mut validation = ValidationGate::new(command, markers)
                    .requiring_success_exit(gate.require_success_exit)
                    .with_excerpt(gate.excerpt_anchors, gate.excerpt_chars);
                if let Some(args) = gate.diagnostic_args {
                    validation = validation.with_diagnostic(
                        CommandSpec::new(gate.program, Duration::from_secs(gate.diagnostic_timeout_secs))
                            .with_args(args)
                            .with_working_dir(working_dir),
                    );
                }
                Ok::<_, ManifestError>(validation)
            })
            .transpose()?;

        Ok(Self {
            name: raw.name,
            artifact: resolve(raw.artifact),
            patch,
            invariants: raw.invariants,
            readiness,
            validation,
            hints: raw.hints,
            fallback_hint: raw.fallback_hint,
            summary: raw.summary,
        })
    }

    /// Display name, if the manifest gave one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Artifact path.
    #[must_use]
    pub fn artifact(&self) -> &Utf8Path {
        &self.artifact
    }

    /// Patch.
    #[must_use]
    pub const fn patch(&self) -> &PatchSpec {
        &self.patch
    }

    /// Invariants.
    #[must_use]
    pub fn invariants(&self) -> &[Invariant] {
        &self.invariants
    }

    /// Readiness probe.
    #[must_use]
    pub const fn readiness(&self) -> Option<&ReadinessProbe> {
        self.readiness.as_ref()
    }

    /// Validation gate.
    #[must_use]
    pub const fn validation(&self) -> Option<&ValidationGate> {
        self.validation.as_ref()
    }

    /// Success summary lines.
    #[must_use]
    pub fn summary(&self) -> &[String] {
        &self.summary
    }

    /// Hints whose keywords appear in `output`; the fallback when none do.
    #[must_use]
    pub fn hints_for(&self, output: &str) -> Vec<String> {
        let matched: Vec<String> = self
            .hints
            .iter()
            .filter(|hint| hint.matches(output))
            .map(|hint| hint.message.clone())
            .collect();
        if matched.is_empty() {
            self.fallback_hint.iter().cloned().collect()
        } else {
            matched
        }
    }
}

fn validate(raw: &RawManifest) -> Result<(), String> {
    if raw.artifact.as_str().is_empty() {
        return Err("artifact path is empty".to_owned());
    }
    if raw.patch.strategies.is_empty() {
        return Err("patch.strategies must list at least one strategy".to_owned());
    }
    if raw.patch.new.is_empty() {
        return Err("patch.new must not be empty".to_owned());
    }
    for strategy in &raw.patch.strategies {
        validate_strategy(strategy, &raw.patch.old)?;
    }
    for invariant in &raw.invariants {
        invariant
            .validate()
            .map_err(|message| format!("invalid invariant {invariant:?}: {message}"))?;
    }
    if let Some(readiness) = raw.readiness.as_ref()
        && readiness.timeout_secs == 0
    {
        return Err("readiness.timeout_secs must be positive".to_owned());
    }
    if let Some(validation) = raw.validation.as_ref() {
        if validation.timeout_secs == 0 || validation.diagnostic_timeout_secs == 0 {
            return Err("validation timeouts must be positive".to_owned());
        }
        if validation.excerpt_chars == 0 {
            return Err("validation.excerpt_chars must be positive".to_owned());
        }
    }
    if raw.hints.iter().any(|hint| hint.when_output_contains.is_empty()) {
        return Err("every hint needs at least one keyword".to_owned());
    }
    Ok(())
}

fn validate_strategy(strategy: &LocateStrategy, old: &str) -> Result<(), String> {
    let compile = |pattern: &str| {
        regex::Regex::new(pattern)
            .map(|_| ())
            .map_err(|error| format!("invalid {} pattern '{pattern}': {error}", strategy.kind()))
    };
    match strategy {
        LocateStrategy::Exact | LocateStrategy::Normalized if old.trim().is_empty() => Err(format!(
            "{} strategy needs non-empty patch.old",
            strategy.kind()
        )),
        LocateStrategy::Exact | LocateStrategy::Normalized => Ok(()),
        LocateStrategy::StructuralPattern(pattern) => {
            compile(&pattern.header)?;
            pattern.terminator.as_deref().map_or(Ok(()), compile)
        }
        LocateStrategy::Heuristic(rule) => {
            if rule.anchor.is_empty() {
                return Err("heuristic anchor must not be empty".to_owned());
            }
            rule.terminator.as_deref().map_or(Ok(()), compile)
        }
    }
}
