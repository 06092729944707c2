//! One patch run: parse → resolve compat → build rules → apply.
//!
//! The session is a pure function of (input text, profile) to a report;
//! persistence, backups, and rendering decisions stay with the caller.

use crate::compat::{self, CompatProfile};
use crate::config::Profile;
use crate::doc::Document;
use crate::errors::PatchError;
use crate::report::ChangeRecord;
use crate::rules::{builder, PatchEngine};

/// Everything a caller needs to render or persist one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// False means "no changes needed": the document already satisfied
    /// every eligible rule.
    pub changed: bool,
    pub compat: CompatProfile,
    pub changes: Vec<ChangeRecord>,
    pub warnings: Vec<String>,
    /// The pre-patch document, serialized. Diffing against this (instead of
    /// the raw input) keeps formatting noise out of the diff.
    pub before: String,
    /// The patched document, serialized.
    pub patched: String,
}

/// Execute one run against `yaml` under `profile`.
pub fn run(profile: &Profile, yaml: &str) -> Result<RunReport, PatchError> {
    let document = Document::parse(yaml)?;
    let resolution = compat::resolve(profile.compat, &document);
    let rule_set = builder::build(profile, &document)?;

    let engine = PatchEngine::new(resolution.profile, profile.features);
    let outcome = engine.apply(&document, &rule_set.rules)?;

    let mut warnings = Vec::new();
    if let Some(warning) = resolution.warning {
        warnings.push(warning);
    }
    warnings.extend(rule_set.warnings);
    warnings.extend(outcome.warnings);

    let before = document.to_yaml()?;
    let patched = outcome.document.to_yaml()?;

    Ok(RunReport {
        changed: !outcome.changes.is_empty(),
        compat: resolution.profile,
        changes: outcome.changes,
        warnings,
        before,
        patched,
    })
}
