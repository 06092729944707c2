//! Node-name pattern resolution.
//!
//! Patterns are shell-style globs (`*`, `?`, `[...]`) anchored to the full
//! name, or regular expressions prefixed with `re:` matched anywhere in the
//! name. A candidate is selected when any pattern in the set matches.

use crate::errors::PatchError;
use globset::{GlobBuilder, GlobMatcher};
use regex::Regex;
use std::collections::HashSet;

/// Prefix marking a pattern as a regular expression instead of a glob.
const REGEX_PREFIX: &str = "re:";

#[derive(Debug, Clone)]
enum Matcher {
    Glob(GlobMatcher),
    Regex(Regex),
}

#[derive(Debug, Clone)]
struct CompiledPattern {
    source: String,
    matcher: Matcher,
}

/// An ordered, pre-compiled set of match expressions.
#[derive(Debug, Clone)]
pub struct PatternSet {
    patterns: Vec<CompiledPattern>,
}

impl PatternSet {
    /// Compile every expression up front.
    ///
    /// A malformed expression is a configuration error naming the offending
    /// pattern; it is never silently skipped.
    pub fn compile(exprs: &[String]) -> Result<Self, PatchError> {
        let mut patterns = Vec::with_capacity(exprs.len());
        for expr in exprs {
            let matcher = if let Some(raw) = expr.strip_prefix(REGEX_PREFIX) {
                let regex = Regex::new(raw).map_err(|err| PatchError::InvalidPattern {
                    pattern: expr.clone(),
                    message: err.to_string(),
                })?;
                Matcher::Regex(regex)
            } else {
                let glob = GlobBuilder::new(expr).build().map_err(|err| {
                    PatchError::InvalidPattern {
                        pattern: expr.clone(),
                        message: err.to_string(),
                    }
                })?;
                Matcher::Glob(glob.compile_matcher())
            };
            patterns.push(CompiledPattern {
                source: expr.clone(),
                matcher,
            });
        }
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Whether any pattern in the set matches `name`.
    pub fn matches(&self, name: &str) -> bool {
        self.patterns.iter().any(|pattern| match &pattern.matcher {
            Matcher::Glob(glob) => glob.is_match(name),
            Matcher::Regex(regex) => regex.is_match(name),
        })
    }

    /// Resolve the set against a name snapshot.
    ///
    /// Output order follows `candidates` (never pattern order) and each name
    /// appears at most once. An empty resolution substitutes `fallback`
    /// verbatim; an empty fallback yields an empty result, which callers
    /// must treat as "no candidates".
    pub fn resolve(&self, candidates: &[String], fallback: &[String]) -> Vec<String> {
        let mut seen: HashSet<&str> = HashSet::with_capacity(candidates.len());
        let resolved: Vec<String> = candidates
            .iter()
            .filter(|name| self.matches(name) && seen.insert(name.as_str()))
            .cloned()
            .collect();
        if resolved.is_empty() {
            fallback.to_vec()
        } else {
            resolved
        }
    }

    /// Source expressions, for traceability output.
    pub fn sources(&self) -> Vec<&str> {
        self.patterns
            .iter()
            .map(|pattern| pattern.source.as_str())
            .collect()
    }
}
