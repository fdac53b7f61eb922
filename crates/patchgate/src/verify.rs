//! Integrity checks on the in-memory candidate before anything is written.
//!
//! Markers prove the replacement landed. Invariants are structural rules
//! checked on the original as a precondition and on the candidate as a
//! postcondition, so a patch cannot break what was sound and is not blamed
//! for what was already broken.

use std::fmt;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::apply::AppliedPatch;

/// A structural rule over the artifact's text.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Invariant {
    /// `open` and `close` occur the same number of times.
    Balanced {
        /// Opening delimiter.
        open: String,
        /// Closing delimiter.
        close: String,
    },
    /// `marker` occurs at least `min` times.
    MinOccurrences {
        /// Literal to count.
        marker: String,
        /// Minimum count.
        min: usize,
    },
    /// `pattern` must not match anywhere.
    Forbidden {
        /// Regex that must not match.
        pattern: String,
    },
    /// When both are present, the first `then` follows the first `first`.
    Ordered {
        /// Literal expected earlier.
        first: String,
        /// Literal expected later.
        then: String,
    },
}

impl Invariant {
    /// Checks that any pattern in the rule compiles.
    ///
    /// # Errors
    ///
    /// Returns the regex compiler message.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Forbidden { pattern } => {
                Regex::new(pattern).map(|_| ()).map_err(|error| error.to_string())
            }
            Self::Balanced { open, close } if open.is_empty() || close.is_empty() => {
                Err("balanced delimiters must not be empty".to_owned())
            }
            Self::MinOccurrences { marker, .. } if marker.is_empty() => {
                Err("counted marker must not be empty".to_owned())
            }
            _ => Ok(()),
        }
    }

    /// Evaluates the rule, describing the violation if it does not hold.
    #[must_use]
    pub fn check(&self, content: &str) -> Option<String> {
        match self {
            Self::Balanced { open, close } => {
                let opened = content.matches(open.as_str()).count();
                let closed = content.matches(close.as_str()).count();
                (opened != closed).then(|| {
                    format!("'{open}' occurs {opened} times but '{close}' occurs {closed} times")
                })
            }
            Self::MinOccurrences { marker, min } => {
                let found = content.matches(marker.as_str()).count();
                (found < *min)
                    .then(|| format!("'{marker}' occurs {found} times, expected at least {min}"))
            }
            Self::Forbidden { pattern } => match Regex::new(pattern) {
                Ok(regex) => regex.find(content).map(|found| {
                    format!("forbidden pattern '{pattern}' matches at byte {}", found.start())
                }),
                Err(error) => Some(format!("forbidden pattern '{pattern}' is invalid: {error}")),
            },
            Self::Ordered { first, then } => {
                let first_at = content.find(first.as_str())?;
                let then_at = content.find(then.as_str())?;
                (then_at < first_at)
                    .then(|| format!("'{then}' appears before '{first}'"))
            }
        }
    }
}

/// Whether a violation was found before or after substitution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckPhase {
    /// On the artifact as read.
    Precondition,
    /// On the candidate.
    Postcondition,
}

impl fmt::Display for CheckPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Precondition => "precondition",
            Self::Postcondition => "postcondition",
        })
    }
}

/// Reasons a candidate is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityError {
    /// Required markers are absent from the candidate.
    #[error("missing required markers: {}", markers.join(", "))]
    MissingMarkers {
        /// Every marker that was not found.
        markers: Vec<String>,
    },
    /// One or more invariants do not hold.
    #[error("{phase} invariant violated: {}", violations.join("; "))]
    InvariantViolated {
        /// When the violation was found.
        phase: CheckPhase,
        /// Description per violated rule.
        violations: Vec<String>,
    },
    /// Bytes outside the replaced span changed.
    #[error("content outside the replaced span changed: {reason}")]
    SpliceCorrupted {
        /// What differed.
        reason: String,
    },
    /// The committed artifact does not equal the candidate.
    #[error("committed artifact does not match the verified candidate")]
    CommittedMismatch,
}

/// Verifies markers, invariants and splice integrity.
#[derive(Debug, Clone, Default)]
pub struct IntegrityVerifier {
    required_markers: Vec<String>,
    invariants: Vec<Invariant>,
}

impl IntegrityVerifier {
    /// Creates a verifier.
    #[must_use]
    pub fn new(required_markers: Vec<String>, invariants: Vec<Invariant>) -> Self {
        Self {
            required_markers,
            invariants,
        }
    }

    /// Checks every required marker, reporting all missing ones at once.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::MissingMarkers`].
    pub fn verify_markers(&self, candidate: &str) -> Result<(), IntegrityError> {
        let missing: Vec<String> = self
            .required_markers
            .iter()
            .filter(|marker| !candidate.contains(marker.as_str()))
            .cloned()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(IntegrityError::MissingMarkers { markers: missing })
        }
    }

    /// Evaluates the invariants on `content`.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::InvariantViolated`] listing every violation.
    pub fn check_invariants(&self, content: &str, phase: CheckPhase) -> Result<(), IntegrityError> {
        let violations: Vec<String> = self
            .invariants
            .iter()
            .filter_map(|invariant| invariant.check(content))
            .collect();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(IntegrityError::InvariantViolated { phase, violations })
        }
    }

    /// Full postcondition check on an applied patch: splice, markers,
    /// invariants.
    ///
    /// # Errors
    ///
    /// Returns the first failing [`IntegrityError`] class.
    pub fn verify(&self, original: &str, applied: &AppliedPatch) -> Result<(), IntegrityError> {
        verify_splice(original, applied)?;
        self.verify_markers(applied.candidate())?;
        self.check_invariants(applied.candidate(), CheckPhase::Postcondition)
    }
}

/// Confirms the candidate equals the original outside the replaced span and
/// holds exactly the replacement inside it.
///
/// # Errors
///
/// Returns [`IntegrityError::SpliceCorrupted`].
pub fn verify_splice(original: &str, applied: &AppliedPatch) -> Result<(), IntegrityError> {
    let span = applied.original_span();
    let candidate = applied.candidate();
    let replaced = applied.replaced_span();

    let corrupted = |reason: &str| IntegrityError::SpliceCorrupted {
        reason: reason.to_owned(),
    };
    if candidate.get(..replaced.start) != original.get(..span.start) {
        return Err(corrupted("prefix differs"));
    }
    if candidate.get(replaced.end..) != original.get(span.end..) {
        return Err(corrupted("suffix differs"));
    }
    if candidate.get(replaced.range()) != Some(applied.replacement()) {
        return Err(corrupted("replacement differs"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::apply::PatchApplier;
    use crate::locate::TargetLocator;
    use crate::spec::PatchSpec;

    fn applied(original: &str, spec: &PatchSpec) -> AppliedPatch {
        let matched = TargetLocator::new().locate(original, spec).expect("locate");
        PatchApplier::new()
            .apply(original, &matched, spec)
            .expect("apply")
    }

    #[test]
    fn all_missing_markers_are_reported_together() {
        let verifier = IntegrityVerifier::new(
            vec!["alpha".into(), "beta".into(), "gamma".into()],
            Vec::new(),
        );
        let error = verifier.verify_markers("only beta here").expect_err("missing");
        assert_eq!(
            error,
            IntegrityError::MissingMarkers {
                markers: vec!["alpha".into(), "gamma".into()]
            }
        );
    }

    #[rstest]
    #[case::balanced_ok(Invariant::Balanced { open: "{".into(), close: "}".into() }, "{ { } }", true)]
    #[case::balanced_broken(Invariant::Balanced { open: "{".into(), close: "}".into() }, "{ { }", false)]
    #[case::min_ok(Invariant::MinOccurrences { marker: "route".into(), min: 2 }, "route route", true)]
    #[case::min_short(Invariant::MinOccurrences { marker: "route".into(), min: 2 }, "route", false)]
    #[case::forbidden_absent(Invariant::Forbidden { pattern: r"TODO\(\w+\)".into() }, "clean", true)]
    #[case::forbidden_present(Invariant::Forbidden { pattern: r"TODO\(\w+\)".into() }, "TODO(me)", false)]
    #[case::ordered_ok(Invariant::Ordered { first: "});".into(), then: "/health".into() }, "}); /health", true)]
    #[case::ordered_inverted(Invariant::Ordered { first: "});".into(), then: "/health".into() }, "/health });", false)]
    #[case::ordered_absent(Invariant::Ordered { first: "});".into(), then: "/health".into() }, "});", true)]
    fn invariants_evaluate(#[case] invariant: Invariant, #[case] content: &str, #[case] holds: bool) {
        assert_eq!(invariant.check(content).is_none(), holds);
    }

    #[test]
    fn invariant_validation_rejects_bad_patterns() {
        assert!(Invariant::Forbidden { pattern: "(".into() }.validate().is_err());
        assert!(
            Invariant::Balanced {
                open: String::new(),
                close: "}".into()
            }
            .validate()
            .is_err()
        );
        assert!(Invariant::Forbidden { pattern: "ok".into() }.validate().is_ok());
    }

    #[test]
    fn precondition_violations_carry_their_phase() {
        let verifier = IntegrityVerifier::new(
            Vec::new(),
            vec![Invariant::Balanced {
                open: "(".into(),
                close: ")".into(),
            }],
        );
        let error = verifier
            .check_invariants("call(", CheckPhase::Precondition)
            .expect_err("unbalanced");
        assert!(matches!(
            error,
            IntegrityError::InvariantViolated {
                phase: CheckPhase::Precondition,
                ..
            }
        ));
    }

    #[test]
    fn verify_accepts_clean_patch() {
        let original = "head\nstatus: pending\ntail\n";
        let spec = PatchSpec::new("status: pending", "status: confirmed")
            .with_required_markers(["confirmed"]);
        let patch = applied(original, &spec);

        let verifier = IntegrityVerifier::new(spec.required_markers().to_vec(), Vec::new());
        verifier.verify(original, &patch).expect("clean patch");
    }

    #[test]
    fn verify_splice_detects_outside_changes() {
        let original = "head\nstatus: pending\ntail\n";
        let spec = PatchSpec::new("status: pending", "status: confirmed");
        let patch = applied(original, &spec);

        let error = verify_splice("HEAD\nstatus: pending\ntail\n", &patch).expect_err("prefix");
        assert_eq!(
            error,
            IntegrityError::SpliceCorrupted {
                reason: "prefix differs".into()
            }
        );
    }
}
