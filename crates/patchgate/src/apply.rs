//! In-memory substitution of a located span.

use thiserror::Error;
use tracing::debug;

use crate::locate::{LocateError, MatchResult, Span, candidates};
use crate::spec::{PatchSpec, StrategyKind};

const APPLY_TARGET: &str = "patchgate::apply";

/// Failures while re-validating and splicing a match.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    /// The strategy no longer yields exactly one candidate.
    #[error("{strategy} strategy now yields {found} candidates; expected exactly 1")]
    MatchCount {
        /// Strategy re-run.
        strategy: StrategyKind,
        /// Candidates found on re-run.
        found: usize,
    },
    /// The single candidate is not the span that was located.
    #[error("{strategy} match moved from {expected} to {found}")]
    SpanMismatch {
        /// Strategy re-run.
        strategy: StrategyKind,
        /// Located span.
        expected: Span,
        /// Span found on re-run.
        found: Span,
    },
    /// The strategy itself failed on re-run.
    #[error(transparent)]
    Locate(#[from] LocateError),
}

/// The candidate content produced by a substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedPatch {
    candidate: String,
    original_span: Span,
    replaced_span: Span,
    match_count: usize,
}

impl AppliedPatch {
    /// Full candidate content.
    #[must_use]
    pub fn candidate(&self) -> &str {
        &self.candidate
    }

    /// Consumes the patch, returning the candidate.
    #[must_use]
    pub fn into_candidate(self) -> String {
        self.candidate
    }

    /// Replaced range in the original content.
    #[must_use]
    pub const fn original_span(&self) -> Span {
        self.original_span
    }

    /// Range the replacement occupies in the candidate.
    #[must_use]
    pub const fn replaced_span(&self) -> Span {
        self.replaced_span
    }

    /// Replacement text as it appears in the candidate.
    #[must_use]
    pub fn replacement(&self) -> &str {
        self.candidate
            .get(self.replaced_span.range())
            .unwrap_or_default()
    }

    /// Number of matches achieved on re-validation.
    #[must_use]
    pub const fn match_count(&self) -> usize {
        self.match_count
    }
}

/// Substitutes exactly one occurrence of the located span.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatchApplier;

impl PatchApplier {
    /// Creates an applier.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Re-runs the winning strategy on `content`, confirms it still yields
    /// the located span and nothing else, and splices the replacement in.
    ///
    /// # Errors
    ///
    /// Returns an [`ApplyError`] when the re-run disagrees with the match.
    pub fn apply(
        &self,
        content: &str,
        matched: &MatchResult,
        spec: &PatchSpec,
    ) -> Result<AppliedPatch, ApplyError> {
        let strategy = matched.strategy().kind();
        let spans = candidates(content, matched.strategy(), spec)?;
        let span = match spans.as_slice() {
            [span] => *span,
            other => {
                return Err(ApplyError::MatchCount {
                    strategy,
                    found: other.len(),
                });
            }
        };
        if span != matched.span() {
            return Err(ApplyError::SpanMismatch {
                strategy,
                expected: matched.span(),
                found: span,
            });
        }

        if !content.is_char_boundary(span.start) || !content.is_char_boundary(span.end) {
            return Err(ApplyError::SpanMismatch {
                strategy,
                expected: matched.span(),
                found: span,
            });
        }
        let replacement = spec.new_content();
        let mut candidate = content.to_owned();
        candidate.replace_range(span.range(), replacement);

        debug!(
            target: APPLY_TARGET,
            strategy = %strategy,
            span = %span,
            replaced_bytes = span.len(),
            inserted_bytes = replacement.len(),
            "replacement spliced"
        );
        Ok(AppliedPatch {
            candidate,
            original_span: span,
            replaced_span: Span::new(span.start, span.start + replacement.len()),
            match_count: 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locate::TargetLocator;

    const ORIGINAL: &str = "a\nstatus: pending\nz\n";

    fn located(content: &str, spec: &PatchSpec) -> MatchResult {
        TargetLocator::new().locate(content, spec).expect("locate")
    }

    #[test]
    fn splices_exactly_one_occurrence() {
        let spec = PatchSpec::new("status: pending", "status: confirmed");
        let matched = located(ORIGINAL, &spec);

        let applied = PatchApplier::new()
            .apply(ORIGINAL, &matched, &spec)
            .expect("apply");

        assert_eq!(applied.candidate(), "a\nstatus: confirmed\nz\n");
        assert_eq!(applied.match_count(), 1);
        assert_eq!(applied.replacement(), "status: confirmed");
        assert_eq!(applied.original_span(), Span::new(2, 17));
    }

    #[test]
    fn refuses_when_content_gained_a_second_match() {
        let spec = PatchSpec::new("status: pending", "status: confirmed");
        let matched = located(ORIGINAL, &spec);
        let drifted = format!("{ORIGINAL}status: pending\n");

        let error = PatchApplier::new()
            .apply(&drifted, &matched, &spec)
            .expect_err("two matches");
        assert_eq!(
            error,
            ApplyError::MatchCount {
                strategy: StrategyKind::Exact,
                found: 2
            }
        );
    }

    #[test]
    fn refuses_when_match_moved() {
        let spec = PatchSpec::new("status: pending", "status: confirmed");
        let matched = located(ORIGINAL, &spec);
        let shifted = format!("prefix\n{ORIGINAL}");

        let error = PatchApplier::new()
            .apply(&shifted, &matched, &spec)
            .expect_err("span moved");
        assert!(matches!(error, ApplyError::SpanMismatch { .. }));
    }
}
