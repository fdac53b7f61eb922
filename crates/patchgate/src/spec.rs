//! Declarative description of one patch: what to find, what to put in its
//! place, and what must hold afterwards.

use std::fmt;

use serde::Deserialize;

/// Ordered list of strategies used when a manifest does not name any.
#[must_use]
pub fn default_strategies() -> Vec<LocateStrategy> {
    vec![LocateStrategy::Exact, LocateStrategy::Normalized]
}

/// One way of locating the target block. Strategies are tried in order and
/// the first one that finds a candidate wins.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LocateStrategy {
    /// Literal substring equality of the old block.
    Exact,
    /// Whitespace-collapsed detection, substituted through a derived
    /// whitespace-tolerant pattern over the original bytes.
    Normalized,
    /// Header regex, optionally followed by a terminator regex.
    StructuralPattern(StructuralPattern),
    /// Anchor plus nearby keywords; last resort.
    Heuristic(HeuristicRule),
}

impl LocateStrategy {
    /// Discriminant used in reports and logs.
    #[must_use]
    pub const fn kind(&self) -> StrategyKind {
        match self {
            Self::Exact => StrategyKind::Exact,
            Self::Normalized => StrategyKind::Normalized,
            Self::StructuralPattern(_) => StrategyKind::StructuralPattern,
            Self::Heuristic(_) => StrategyKind::Heuristic,
        }
    }

    /// Whether a match from this strategy is only an approximation of the
    /// declared old block.
    #[must_use]
    pub const fn is_approximate(&self) -> bool {
        !matches!(self, Self::Exact)
    }
}

/// Strategy discriminant without its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    /// See [`LocateStrategy::Exact`].
    Exact,
    /// See [`LocateStrategy::Normalized`].
    Normalized,
    /// See [`LocateStrategy::StructuralPattern`].
    StructuralPattern,
    /// See [`LocateStrategy::Heuristic`].
    Heuristic,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Exact => "exact",
            Self::Normalized => "normalized",
            Self::StructuralPattern => "structural_pattern",
            Self::Heuristic => "heuristic",
        };
        f.write_str(name)
    }
}

/// "Header, followed eventually by a closing delimiter."
///
/// Each header match is one candidate. Without a terminator the header match
/// itself is the span. With a terminator the span runs to the first
/// terminator match after the header, or to the end of the document when no
/// terminator follows (a trailing section).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StructuralPattern {
    /// Regex matching the start of the block. Use `(?m)`/`(?s)` as needed.
    pub header: String,
    /// Regex matching the end of the block.
    #[serde(default)]
    pub terminator: Option<String>,
    /// Whether the terminator match is part of the replaced span.
    #[serde(default)]
    pub include_terminator: bool,
}

impl StructuralPattern {
    /// Pattern whose header match is the whole span.
    #[must_use]
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            terminator: None,
            include_terminator: false,
        }
    }

    /// Adds a terminator regex.
    #[must_use]
    pub fn with_terminator(mut self, terminator: impl Into<String>, include: bool) -> Self {
        self.terminator = Some(terminator.into());
        self.include_terminator = include;
        self
    }
}

/// Keyword-proximity rule: the anchor must occur exactly once and every
/// keyword must appear within `window` bytes of it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HeuristicRule {
    /// Literal anchor, typically a function or section name.
    pub anchor: String,
    /// Literals that must all appear near the anchor.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Search radius in bytes on either side of the anchor.
    #[serde(default = "default_window")]
    pub window: usize,
    /// Regex ending the replaced span; without it the span stops at the end
    /// of the line where the window ends.
    #[serde(default)]
    pub terminator: Option<String>,
}

const fn default_window() -> usize {
    500
}

impl HeuristicRule {
    /// Rule with the default window and no keywords.
    #[must_use]
    pub fn new(anchor: impl Into<String>) -> Self {
        Self {
            anchor: anchor.into(),
            keywords: Vec::new(),
            window: default_window(),
            terminator: None,
        }
    }

    /// Adds required keywords.
    #[must_use]
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    /// Overrides the search window.
    #[must_use]
    pub const fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    /// Adds a terminator regex.
    #[must_use]
    pub fn with_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.terminator = Some(terminator.into());
        self
    }
}

/// What must be found, what replaces it, and which markers must be present
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSpec {
    strategies: Vec<LocateStrategy>,
    old: String,
    new: String,
    required_markers: Vec<String>,
    staging_marker: Option<String>,
}

impl PatchSpec {
    /// Creates a spec with the default `exact`, `normalized` strategies.
    #[must_use]
    pub fn new(old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            strategies: default_strategies(),
            old: old.into(),
            new: new.into(),
            required_markers: Vec::new(),
            staging_marker: None,
        }
    }

    /// Replaces the strategy list.
    #[must_use]
    pub fn with_strategies(mut self, strategies: Vec<LocateStrategy>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Sets the markers that must be present after substitution. Duplicates
    /// are dropped, first occurrence wins.
    #[must_use]
    pub fn with_required_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for marker in markers.into_iter().map(Into::into) {
            if !unique.contains(&marker) {
                unique.push(marker);
            }
        }
        self.required_markers = unique;
        self
    }

    /// Sets the marker the staged file must contain before it is committed.
    #[must_use]
    pub fn with_staging_marker(mut self, marker: impl Into<String>) -> Self {
        self.staging_marker = Some(marker.into());
        self
    }

    /// Ordered strategies.
    #[must_use]
    pub fn strategies(&self) -> &[LocateStrategy] {
        &self.strategies
    }

    /// Block to be replaced; may be empty for structural-only specs.
    #[must_use]
    pub fn old(&self) -> &str {
        &self.old
    }

    /// Replacement block.
    #[must_use]
    pub fn new_content(&self) -> &str {
        &self.new
    }

    /// Markers checked by the integrity verifier.
    #[must_use]
    pub fn required_markers(&self) -> &[String] {
        &self.required_markers
    }

    /// Marker checked on the staged copy. Falls back to the first required
    /// marker, then to the replacement block itself.
    #[must_use]
    pub fn staging_marker(&self) -> &str {
        self.staging_marker
            .as_deref()
            .or_else(|| self.required_markers.first().map(String::as_str))
            .unwrap_or(&self.new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_markers_are_deduplicated_in_order() {
        let spec = PatchSpec::new("a", "b").with_required_markers(["x", "y", "x"]);
        assert_eq!(spec.required_markers(), ["x", "y"]);
    }

    #[test]
    fn staging_marker_defaults_to_first_required_marker() {
        let spec = PatchSpec::new("a", "b").with_required_markers(["first", "second"]);
        assert_eq!(spec.staging_marker(), "first");

        let explicit = spec.with_staging_marker("explicit");
        assert_eq!(explicit.staging_marker(), "explicit");
    }

    #[test]
    fn staging_marker_falls_back_to_the_replacement() {
        let spec = PatchSpec::new("status: pending", "status: confirmed");
        assert_eq!(spec.staging_marker(), "status: confirmed");
    }

    #[test]
    fn only_exact_is_precise() {
        assert!(!LocateStrategy::Exact.is_approximate());
        assert!(LocateStrategy::Normalized.is_approximate());
        assert!(LocateStrategy::Heuristic(HeuristicRule::new("fn")).is_approximate());
    }
}
