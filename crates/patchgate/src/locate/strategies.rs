//! Candidate enumeration for each locate strategy.

use regex::Regex;

use super::{LocateError, Span};
use crate::spec::{HeuristicRule, LocateStrategy, PatchSpec, StrategyKind, StructuralPattern};

/// Every disjoint candidate span `strategy` sees in `content`.
pub(crate) fn candidates(
    content: &str,
    strategy: &LocateStrategy,
    spec: &PatchSpec,
) -> Result<Vec<Span>, LocateError> {
    match strategy {
        LocateStrategy::Exact => Ok(exact(content, spec.old())),
        LocateStrategy::Normalized => normalized(content, spec.old()),
        LocateStrategy::StructuralPattern(pattern) => structural(content, pattern),
        LocateStrategy::Heuristic(rule) => heuristic(content, rule),
    }
}

/// Largest char boundary not after `index`, clamped to the content length.
pub(crate) fn floor_char_boundary(content: &str, index: usize) -> usize {
    let mut boundary = index.min(content.len());
    while !content.is_char_boundary(boundary) {
        boundary -= 1;
    }
    boundary
}

fn ceil_char_boundary(content: &str, index: usize) -> usize {
    let mut boundary = index.min(content.len());
    while !content.is_char_boundary(boundary) {
        boundary += 1;
    }
    boundary
}

fn compile(strategy: StrategyKind, pattern: &str) -> Result<Regex, LocateError> {
    Regex::new(pattern).map_err(|error| LocateError::InvalidPattern {
        strategy,
        pattern: pattern.to_owned(),
        message: error.to_string(),
    })
}

fn exact(content: &str, old: &str) -> Vec<Span> {
    if old.is_empty() {
        return Vec::new();
    }
    content
        .match_indices(old)
        .map(|(start, matched)| Span::new(start, start + matched.len()))
        .collect()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Detection runs on whitespace-collapsed text. Substitution spans come from
/// a pattern derived from the old block's tokens joined by `\s+`, matched
/// against the original content so the bytes around the span stay untouched.
fn normalized(content: &str, old: &str) -> Result<Vec<Span>, LocateError> {
    let needle = collapse_whitespace(old);
    if needle.is_empty() || !collapse_whitespace(content).contains(&needle) {
        return Ok(Vec::new());
    }

    let derived = old
        .split_whitespace()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"\s+");
    let pattern = compile(StrategyKind::Normalized, &derived)?;
    let leading = old.starts_with(char::is_whitespace);
    let trailing_newline = old.ends_with('\n');

    Ok(pattern
        .find_iter(content)
        .map(|found| {
            let mut start = found.start();
            if leading {
                start = extend_back_over_indent(content, start);
            }
            let mut end = found.end();
            if trailing_newline {
                end = extend_forward_to_newline(content, end);
            }
            Span::new(start, end)
        })
        .collect())
}

fn extend_back_over_indent(content: &str, start: usize) -> usize {
    let indent = content
        .get(..start)
        .unwrap_or_default()
        .bytes()
        .rev()
        .take_while(|byte| *byte == b' ' || *byte == b'\t')
        .count();
    start - indent
}

fn extend_forward_to_newline(content: &str, end: usize) -> usize {
    let rest = content.get(end..).unwrap_or_default();
    let blanks = rest
        .bytes()
        .take_while(|byte| *byte == b' ' || *byte == b'\t' || *byte == b'\r')
        .count();
    if rest.as_bytes().get(blanks) == Some(&b'\n') {
        end + blanks + 1
    } else {
        end
    }
}

fn structural(content: &str, pattern: &StructuralPattern) -> Result<Vec<Span>, LocateError> {
    let header = compile(StrategyKind::StructuralPattern, &pattern.header)?;
    let terminator = pattern
        .terminator
        .as_deref()
        .map(|source| compile(StrategyKind::StructuralPattern, source))
        .transpose()?;

    Ok(header
        .find_iter(content)
        .map(|found| {
            let Some(terminator) = terminator.as_ref() else {
                return Span::new(found.start(), found.end());
            };
            let end = terminator
                .find_at(content, found.end())
                .map_or(content.len(), |closing| {
                    if pattern.include_terminator {
                        closing.end()
                    } else {
                        closing.start()
                    }
                });
            Span::new(found.start(), end)
        })
        .collect())
}

/// The anchor must occur exactly once; every keyword must sit inside the
/// window around it. The span starts at the beginning of the anchor's line.
fn heuristic(content: &str, rule: &HeuristicRule) -> Result<Vec<Span>, LocateError> {
    let terminator = rule
        .terminator
        .as_deref()
        .map(|source| compile(StrategyKind::Heuristic, source))
        .transpose()?;
    if rule.anchor.is_empty() {
        return Ok(Vec::new());
    }

    let anchors: Vec<usize> = content
        .match_indices(rule.anchor.as_str())
        .map(|(offset, _)| offset)
        .collect();
    let anchor = match anchors.as_slice() {
        [] => return Ok(Vec::new()),
        [single] => *single,
        many => {
            return Ok(many
                .iter()
                .map(|offset| Span::new(*offset, offset + rule.anchor.len()))
                .collect());
        }
    };

    let window_start = floor_char_boundary(content, anchor.saturating_sub(rule.window));
    let anchor_end = anchor + rule.anchor.len();
    let window_end = ceil_char_boundary(content, anchor_end.saturating_add(rule.window));
    let window = content.get(window_start..window_end).unwrap_or_default();
    if !rule.keywords.iter().all(|keyword| window.contains(keyword.as_str())) {
        return Ok(Vec::new());
    }

    let start = content
        .get(..anchor)
        .and_then(|before| before.rfind('\n'))
        .map_or(0, |newline| newline + 1);
    let end = match terminator {
        Some(terminator) => match terminator.find_at(content, anchor_end) {
            Some(closing) => closing.end(),
            None => return Ok(Vec::new()),
        },
        None => content
            .get(window_end..)
            .and_then(|rest| rest.find('\n'))
            .map_or(content.len(), |newline| window_end + newline),
    };
    Ok(vec![Span::new(start, end)])
}
