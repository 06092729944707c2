//! Change records and their renderings.
//!
//! The ordered [`ChangeRecord`] sequence is the authoritative description of
//! a run: changelog and diff output are derived from it (plus the
//! before/after documents), and the idempotence contract is "a second run
//! produces an empty sequence".

use serde_yaml::Value;
use similar::TextDiff;
use std::fmt;

/// The nature of one mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A value or mapping that did not exist before.
    Added,
    /// An existing value that did not match the required one.
    Corrected,
    /// An entry appended to a membership list.
    Appended,
    /// An engine-owned list recomputed wholesale.
    Replaced,
}

impl ChangeKind {
    pub fn verb(&self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Corrected => "corrected",
            ChangeKind::Appended => "appended",
            ChangeKind::Replaced => "replaced",
        }
    }
}

/// One entry per actual mutation, in application order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    /// Rendered target path, e.g. `proxy-groups[name=US Auto].proxies`.
    pub path: String,
    pub kind: ChangeKind,
    /// Previous value, or `None` when the target was absent.
    pub previous: Option<String>,
    /// The value after the mutation.
    pub value: String,
    /// Human label of the rule that produced the change.
    pub label: String,
}

impl fmt::Display for ChangeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.previous {
            Some(previous) => write!(
                f,
                "{:<9} {}: {} -> {}  ({})",
                self.kind.verb(),
                self.path,
                previous,
                self.value,
                self.label
            ),
            None => write!(
                f,
                "{:<9} {}: {}  ({})",
                self.kind.verb(),
                self.path,
                self.value,
                self.label
            ),
        }
    }
}

/// Render the itemized changelog: one line per record, in application
/// order, then any warnings. Output is deterministic for a given input.
pub fn render_changelog(changes: &[ChangeRecord], warnings: &[String]) -> String {
    let mut out = String::new();
    if changes.is_empty() {
        out.push_str("no changes needed\n");
    } else {
        for change in changes {
            out.push_str(&change.to_string());
            out.push('\n');
        }
    }
    for warning in warnings {
        out.push_str("warning: ");
        out.push_str(warning);
        out.push('\n');
    }
    out
}

/// Unified diff of the serialized before/after documents.
pub fn unified_diff(before: &str, after: &str, from_label: &str, to_label: &str) -> String {
    TextDiff::from_lines(before, after)
        .unified_diff()
        .context_radius(3)
        .header(from_label, to_label)
        .to_string()
}

/// Compact single-line rendering of a YAML value for change records.
pub(crate) fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Sequence(items) => {
            let parts: Vec<String> = items.iter().map(render_value).collect();
            format!("[{}]", parts.join(", "))
        }
        Value::Mapping(map) => {
            let parts: Vec<String> = map
                .iter()
                .map(|(key, val)| format!("{}: {}", render_value(key), render_value(val)))
                .collect();
            format!("{{{}}}", parts.join(", "))
        }
        Value::Tagged(tagged) => render_value(&tagged.value),
    }
}
