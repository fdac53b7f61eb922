//! Target location: finds the one span a patch will replace.
//!
//! Strategies are tried in the order the [`PatchSpec`] lists them. A strategy
//! that yields no candidate hands over to the next one; a strategy that
//! yields two or more candidates stops the search with
//! [`LocateError::AmbiguousMatch`]. Looser strategies never get a chance to
//! pick one of several tighter matches.

mod strategies;

use std::fmt;
use std::ops::Range;

use thiserror::Error;
use tracing::{debug, warn};

use crate::spec::{LocateStrategy, PatchSpec, StrategyKind};

pub(crate) use strategies::{candidates, floor_char_boundary};

const LOCATE_TARGET: &str = "patchgate::locate";
const EXCERPT_RADIUS: usize = 120;

/// Half-open byte range into the artifact content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// First byte of the span.
    pub start: usize,
    /// One past the last byte of the span.
    pub end: usize,
}

impl Span {
    /// Creates a span; callers guarantee `start <= end`.
    #[must_use]
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Length in bytes.
    #[must_use]
    pub const fn len(self) -> usize {
        self.end - self.start
    }

    /// Whether the span is empty.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.start == self.end
    }

    /// Range form for slicing.
    #[must_use]
    pub const fn range(self) -> Range<usize> {
        self.start..self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// The single span selected by a strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    strategy: LocateStrategy,
    occurrence_count: usize,
    span: Span,
}

impl MatchResult {
    /// Strategy that produced the match.
    #[must_use]
    pub const fn strategy(&self) -> &LocateStrategy {
        &self.strategy
    }

    /// Number of candidates the strategy saw; always `1` for a returned match.
    #[must_use]
    pub const fn occurrence_count(&self) -> usize {
        self.occurrence_count
    }

    /// Matched byte range in the original content.
    #[must_use]
    pub const fn span(&self) -> Span {
        self.span
    }

    /// Whether the match is an approximation; reports flag these for review.
    #[must_use]
    pub const fn is_approximate(&self) -> bool {
        self.strategy.is_approximate()
    }
}

/// Context attached to a not-found failure.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NotFoundDiagnostic {
    /// Strategies tried, in order.
    pub tried: Vec<StrategyKind>,
    /// The replacement is already present and the old block is not.
    pub already_applied: bool,
    /// Byte offset of the closest anchor that was found, if any.
    pub nearest_anchor: Option<usize>,
    /// Text surrounding the nearest anchor.
    pub excerpt: Option<String>,
}

impl fmt::Display for NotFoundDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.already_applied {
            return f.write_str("the replacement is already present; the patch appears to be applied");
        }
        let tried: Vec<String> = self.tried.iter().map(ToString::to_string).collect();
        write!(f, "no strategy matched (tried: {})", tried.join(", "))?;
        if let Some(offset) = self.nearest_anchor {
            write!(f, "; nearest anchor at byte {offset}")?;
        }
        Ok(())
    }
}

/// Errors raised while locating the target.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocateError {
    /// No strategy found the target.
    #[error("target not found: {diagnostic}")]
    TargetNotFound {
        /// What was tried and what was seen.
        diagnostic: Box<NotFoundDiagnostic>,
    },
    /// A strategy found more than one candidate.
    #[error("{strategy} strategy found {count} candidate spans at byte offsets {offsets:?}")]
    AmbiguousMatch {
        /// Strategy that saw the candidates.
        strategy: StrategyKind,
        /// Number of candidates.
        count: usize,
        /// Start offsets of the candidates.
        offsets: Vec<usize>,
    },
    /// A strategy's pattern does not compile.
    #[error("invalid {strategy} pattern '{pattern}': {message}")]
    InvalidPattern {
        /// Strategy owning the pattern.
        strategy: StrategyKind,
        /// Pattern source.
        pattern: String,
        /// Compiler message.
        message: String,
    },
}

impl LocateError {
    /// Whether the error is the already-applied guard.
    #[must_use]
    pub fn is_already_applied(&self) -> bool {
        matches!(self, Self::TargetNotFound { diagnostic } if diagnostic.already_applied)
    }
}

/// Finds the unique span a [`PatchSpec`] targets.
#[derive(Debug, Clone, Copy, Default)]
pub struct TargetLocator;

impl TargetLocator {
    /// Creates a locator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Runs the strategies of `spec` against `content`.
    ///
    /// # Errors
    ///
    /// Returns [`LocateError::TargetNotFound`] when nothing matches or the
    /// patch already appears applied, [`LocateError::AmbiguousMatch`] when a
    /// strategy sees several candidates, and [`LocateError::InvalidPattern`]
    /// when a strategy regex does not compile.
    pub fn locate(&self, content: &str, spec: &PatchSpec) -> Result<MatchResult, LocateError> {
        if already_applied(content, spec) {
            warn!(
                target: LOCATE_TARGET,
                "replacement already present; refusing to apply twice"
            );
            return Err(LocateError::TargetNotFound {
                diagnostic: Box::new(NotFoundDiagnostic {
                    tried: Vec::new(),
                    already_applied: true,
                    nearest_anchor: None,
                    excerpt: None,
                }),
            });
        }

        let mut tried = Vec::with_capacity(spec.strategies().len());
        for strategy in spec.strategies() {
            let kind = strategy.kind();
            tried.push(kind);
            let spans = candidates(content, strategy, spec)?;
            debug!(
                target: LOCATE_TARGET,
                strategy = %kind,
                candidates = spans.len(),
                "strategy evaluated"
            );
            match spans.as_slice() {
                [] => {}
                [span] => {
                    return Ok(MatchResult {
                        strategy: strategy.clone(),
                        occurrence_count: 1,
                        span: *span,
                    });
                }
                many => {
                    return Err(LocateError::AmbiguousMatch {
                        strategy: kind,
                        count: many.len(),
                        offsets: many.iter().map(|span| span.start).collect(),
                    });
                }
            }
        }

        let nearest_anchor = nearest_anchor(content, spec);
        let excerpt = nearest_anchor.map(|offset| excerpt_around(content, offset));
        Err(LocateError::TargetNotFound {
            diagnostic: Box::new(NotFoundDiagnostic {
                tried,
                already_applied: false,
                nearest_anchor,
                excerpt,
            }),
        })
    }
}

fn already_applied(content: &str, spec: &PatchSpec) -> bool {
    let old = spec.old();
    let new = spec.new_content();
    if new.is_empty() || !content.contains(new) {
        return false;
    }
    old.is_empty() || !content.contains(old) || new.contains(old)
}

/// Offset of the first anchor that can be seen: a heuristic anchor, a
/// structural header, or the first non-blank line of the old block.
fn nearest_anchor(content: &str, spec: &PatchSpec) -> Option<usize> {
    for strategy in spec.strategies() {
        let found = match strategy {
            LocateStrategy::Heuristic(rule) => content.find(rule.anchor.as_str()),
            LocateStrategy::StructuralPattern(pattern) => regex::Regex::new(&pattern.header)
                .ok()
                .and_then(|header| header.find(content).map(|m| m.start())),
            LocateStrategy::Exact | LocateStrategy::Normalized => None,
        };
        if found.is_some() {
            return found;
        }
    }

    spec.old()
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| content.find(line))
}

fn excerpt_around(content: &str, offset: usize) -> String {
    let start = floor_char_boundary(content, offset.saturating_sub(EXCERPT_RADIUS));
    let end = floor_char_boundary(content, offset.saturating_add(EXCERPT_RADIUS));
    content.get(start..end).unwrap_or_default().to_owned()
}
