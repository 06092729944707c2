//! Idempotent rule application over a document snapshot.
//!
//! The engine owns exactly one document per run. Rules are applied in their
//! given order; an operation whose condition already holds is a no-op and
//! emits no change record, so a second pass over its own output always
//! produces an empty change sequence. Errors abort the whole run: the
//! caller's document is never left partially patched because all mutation
//! happens on a private clone.

use crate::compat::CompatProfile;
use crate::config::FeatureSet;
use crate::doc::{path, Document, Step, TargetPath};
use crate::errors::PatchError;
use crate::report::{render_value, ChangeKind, ChangeRecord};
use crate::rules::op::{EnsureOp, MergeStrategy, Rule};
use serde_yaml::{Mapping, Sequence, Value};

/// Result of one engine pass.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub document: Document,
    pub changes: Vec<ChangeRecord>,
    pub warnings: Vec<String>,
}

/// Applies a rule set under an active compat profile and feature set.
pub struct PatchEngine {
    profile: CompatProfile,
    features: FeatureSet,
}

impl PatchEngine {
    pub fn new(profile: CompatProfile, features: FeatureSet) -> Self {
        Self { profile, features }
    }

    /// Apply `rules` to a snapshot of `document`.
    pub fn apply(
        &self,
        document: &Document,
        rules: &[Rule],
    ) -> Result<ApplyOutcome, PatchError> {
        let mut patched = document.clone();
        let mut changes = Vec::new();
        let mut warnings = Vec::new();

        for rule in rules {
            if !self.eligible(rule) {
                continue;
            }
            self.apply_rule(patched.root_mut(), rule, &mut changes, &mut warnings)?;
        }

        Ok(ApplyOutcome {
            document: patched,
            changes,
            warnings,
        })
    }

    fn eligible(&self, rule: &Rule) -> bool {
        if !self.features.enabled(rule.guard.feature) {
            return false;
        }
        !rule.guard.mihomo_only || self.profile.allow_mihomo_only_fields
    }

    fn apply_rule(
        &self,
        root: &mut Mapping,
        rule: &Rule,
        changes: &mut Vec<ChangeRecord>,
        warnings: &mut Vec<String>,
    ) -> Result<(), PatchError> {
        match &rule.op {
            EnsureOp::Scalar { path, value } => {
                apply_scalar(root, rule, path, value, changes, warnings)
            }
            EnsureOp::Mapping {
                path,
                template,
                enforce,
            } => apply_mapping(root, rule, path, template, enforce, changes, warnings),
            EnsureOp::Membership {
                path,
                entries,
                strategy,
            } => apply_membership(root, rule, path, entries, *strategy, changes, warnings),
        }
    }
}

fn apply_scalar(
    root: &mut Mapping,
    rule: &Rule,
    target: &TargetPath,
    value: &Value,
    changes: &mut Vec<ChangeRecord>,
    warnings: &mut Vec<String>,
) -> Result<(), PatchError> {
    let Some((Step::Key(key), parent_steps)) = target.split_last() else {
        return Err(invalid_target(rule, target));
    };
    let Some(parent) = parent_mapping_mut(root, parent_steps) else {
        warnings.push(skip_note(rule, target));
        return Ok(());
    };

    let key_value = Value::from(key.as_str());
    let current = parent.get(&key_value).cloned();
    match current {
        Some(ref existing) if existing == value => {}
        Some(existing) => {
            parent.insert(key_value, value.clone());
            changes.push(ChangeRecord {
                path: target.to_string(),
                kind: ChangeKind::Corrected,
                previous: Some(render_value(&existing)),
                value: render_value(value),
                label: rule.label.clone(),
            });
        }
        None => {
            parent.insert(key_value, value.clone());
            changes.push(ChangeRecord {
                path: target.to_string(),
                kind: ChangeKind::Added,
                previous: None,
                value: render_value(value),
                label: rule.label.clone(),
            });
        }
    }
    Ok(())
}

fn apply_mapping(
    root: &mut Mapping,
    rule: &Rule,
    target: &TargetPath,
    template: &Mapping,
    enforce: &[String],
    changes: &mut Vec<ChangeRecord>,
    warnings: &mut Vec<String>,
) -> Result<(), PatchError> {
    match target.split_last() {
        Some((Step::Entry { field, ident }, parent_steps)) => {
            let Some(list) = parent_sequence_mut(root, parent_steps) else {
                warnings.push(skip_note(rule, target));
                return Ok(());
            };
            let position = list
                .iter()
                .position(|item| path::entry_ident(item, field) == Some(ident.as_str()));
            match position {
                None => {
                    let inserted = Value::Mapping(template.clone());
                    let rendered = render_value(&inserted);
                    // New engine-owned entries go to the head of the
                    // section so they stay visible above subscription bulk.
                    list.insert(0, inserted);
                    changes.push(ChangeRecord {
                        path: target.to_string(),
                        kind: ChangeKind::Added,
                        previous: None,
                        value: rendered,
                        label: rule.label.clone(),
                    });
                }
                Some(index) => {
                    if let Some(existing) = list[index].as_mapping_mut() {
                        enforce_fields(existing, template, enforce, target, &rule.label, changes);
                    }
                }
            }
            Ok(())
        }
        Some((Step::Key(key), parent_steps)) => {
            let Some(parent) = parent_mapping_mut(root, parent_steps) else {
                warnings.push(skip_note(rule, target));
                return Ok(());
            };
            let key_value = Value::from(key.as_str());
            if !parent.contains_key(&key_value) {
                let inserted = Value::Mapping(template.clone());
                let rendered = render_value(&inserted);
                parent.insert(key_value, inserted);
                changes.push(ChangeRecord {
                    path: target.to_string(),
                    kind: ChangeKind::Added,
                    previous: None,
                    value: rendered,
                    label: rule.label.clone(),
                });
                return Ok(());
            }
            if let Some(Value::Mapping(existing)) = parent.get_mut(&key_value) {
                enforce_fields(existing, template, enforce, target, &rule.label, changes);
                return Ok(());
            }
            // Present but not a mapping: correct it wholesale.
            let previous = parent.get(&key_value).map(render_value);
            let inserted = Value::Mapping(template.clone());
            let rendered = render_value(&inserted);
            parent.insert(key_value, inserted);
            changes.push(ChangeRecord {
                path: target.to_string(),
                kind: ChangeKind::Corrected,
                previous,
                value: rendered,
                label: rule.label.clone(),
            });
            Ok(())
        }
        None => Err(invalid_target(rule, target)),
    }
}

/// Correct only the fields the rule owns; anything else the operator may
/// have customized stays as-is.
fn enforce_fields(
    existing: &mut Mapping,
    template: &Mapping,
    enforce: &[String],
    target: &TargetPath,
    label: &str,
    changes: &mut Vec<ChangeRecord>,
) {
    for field in enforce {
        let field_key = Value::from(field.as_str());
        let Some(desired) = template.get(&field_key) else {
            continue;
        };
        let current = existing.get(&field_key).cloned();
        match current {
            Some(ref value) if value == desired => {}
            Some(value) => {
                existing.insert(field_key, desired.clone());
                changes.push(ChangeRecord {
                    path: target.child(field),
                    kind: ChangeKind::Corrected,
                    previous: Some(render_value(&value)),
                    value: render_value(desired),
                    label: label.to_string(),
                });
            }
            None => {
                existing.insert(field_key, desired.clone());
                changes.push(ChangeRecord {
                    path: target.child(field),
                    kind: ChangeKind::Added,
                    previous: None,
                    value: render_value(desired),
                    label: label.to_string(),
                });
            }
        }
    }
}

fn apply_membership(
    root: &mut Mapping,
    rule: &Rule,
    target: &TargetPath,
    entries: &[Value],
    strategy: MergeStrategy,
    changes: &mut Vec<ChangeRecord>,
    warnings: &mut Vec<String>,
) -> Result<(), PatchError> {
    if entries.is_empty() {
        return match strategy {
            MergeStrategy::AppendOnly => Ok(()),
            MergeStrategy::Replace => Err(PatchError::EmptyCandidates {
                rule: rule.label.clone(),
            }),
        };
    }

    let Some((Step::Key(key), parent_steps)) = target.split_last() else {
        return Err(invalid_target(rule, target));
    };
    let parent = match parent_mapping_mut(root, parent_steps) {
        Some(parent) => parent,
        None => {
            return match strategy {
                MergeStrategy::AppendOnly => {
                    warnings.push(skip_note(rule, target));
                    Ok(())
                }
                // Engine-owned lists are ensured by an earlier rule in the
                // same run; a missing parent here is a broken rule set.
                MergeStrategy::Replace => Err(invalid_target(rule, target)),
            };
        }
    };

    let key_value = Value::from(key.as_str());
    let was_absent = !parent.contains_key(&key_value);
    if was_absent {
        parent.insert(key_value.clone(), Value::Sequence(Sequence::new()));
    }
    let Some(list) = parent.get_mut(&key_value).and_then(Value::as_sequence_mut) else {
        return match strategy {
            MergeStrategy::AppendOnly => {
                warnings.push(format!(
                    "{}: target '{}' is not a sequence; skipped",
                    rule.label, target
                ));
                Ok(())
            }
            MergeStrategy::Replace => Err(PatchError::TargetNotSequence {
                rule: rule.label.clone(),
                path: target.to_string(),
            }),
        };
    };

    match strategy {
        MergeStrategy::AppendOnly => {
            for entry in entries {
                if !list.contains(entry) {
                    list.push(entry.clone());
                    changes.push(ChangeRecord {
                        path: target.to_string(),
                        kind: ChangeKind::Appended,
                        previous: None,
                        value: render_value(entry),
                        label: rule.label.clone(),
                    });
                }
            }
        }
        MergeStrategy::Replace => {
            let mut desired = Sequence::new();
            for entry in entries {
                if !desired.contains(entry) {
                    desired.push(entry.clone());
                }
            }
            if *list != desired {
                let previous = if was_absent {
                    None
                } else {
                    Some(render_value(&Value::Sequence(list.clone())))
                };
                let rendered = render_value(&Value::Sequence(desired.clone()));
                *list = desired;
                changes.push(ChangeRecord {
                    path: target.to_string(),
                    kind: ChangeKind::Replaced,
                    previous,
                    value: rendered,
                    label: rule.label.clone(),
                });
            }
        }
    }
    Ok(())
}

fn parent_mapping_mut<'a>(root: &'a mut Mapping, steps: &[Step]) -> Option<&'a mut Mapping> {
    if steps.is_empty() {
        return Some(root);
    }
    path::resolve_mut(root, steps)?.as_mapping_mut()
}

fn parent_sequence_mut<'a>(root: &'a mut Mapping, steps: &[Step]) -> Option<&'a mut Sequence> {
    path::resolve_mut(root, steps)?.as_sequence_mut()
}

fn invalid_target(rule: &Rule, target: &TargetPath) -> PatchError {
    PatchError::InvalidTarget {
        rule: rule.label.clone(),
        path: target.to_string(),
    }
}

fn skip_note(rule: &Rule, target: &TargetPath) -> String {
    format!("{}: target '{}' not found; skipped", rule.label, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::op::{Feature, Guard};

    const GUARD: Guard = Guard {
        feature: Feature::Resi,
        mihomo_only: false,
    };

    fn engine() -> PatchEngine {
        PatchEngine::new(CompatProfile::MIHOMO, FeatureSet::default())
    }

    fn doc(text: &str) -> Document {
        Document::parse(text).unwrap()
    }

    fn base_doc() -> Document {
        doc("mixed-port: 7890\nproxies: []\nproxy-groups:\n  - name: Proxy\n    type: select\n    proxies:\n      - a\n      - b\nrules: []\n")
    }

    fn scalar_rule(value: u64) -> Rule {
        Rule::new(
            "test: port",
            GUARD,
            EnsureOp::Scalar {
                path: TargetPath::key("port"),
                value: Value::from(value),
            },
        )
    }

    #[test]
    fn scalar_is_added_then_stable() {
        let outcome = engine().apply(&base_doc(), &[scalar_rule(7891)]).unwrap();
        assert_eq!(outcome.changes.len(), 1);
        assert_eq!(outcome.changes[0].kind, ChangeKind::Added);

        let second = engine()
            .apply(&outcome.document, &[scalar_rule(7891)])
            .unwrap();
        assert!(second.changes.is_empty());
    }

    #[test]
    fn scalar_mismatch_is_corrected_with_previous_value() {
        let first = engine().apply(&base_doc(), &[scalar_rule(7890)]).unwrap();
        let outcome = engine()
            .apply(&first.document, &[scalar_rule(7891)])
            .unwrap();
        assert_eq!(outcome.changes.len(), 1);
        assert_eq!(outcome.changes[0].kind, ChangeKind::Corrected);
        assert_eq!(outcome.changes[0].previous.as_deref(), Some("7890"));
    }

    fn group_rule() -> Rule {
        let template: Mapping = serde_yaml::from_str(
            "name: US Auto\ntype: url-test\nurl: http://www.gstatic.com/generate_204\ninterval: 300\n",
        )
        .unwrap();
        Rule::new(
            "test: group",
            GUARD,
            EnsureOp::Mapping {
                path: TargetPath::key("proxy-groups").then_entry("name", "US Auto"),
                template,
                enforce: vec!["type".to_string(), "interval".to_string()],
            },
        )
    }

    #[test]
    fn mapping_entry_inserted_at_head_when_absent() {
        let outcome = engine().apply(&base_doc(), &[group_rule()]).unwrap();
        assert_eq!(outcome.changes.len(), 1);
        assert_eq!(outcome.document.group_names(), vec!["US Auto", "Proxy"]);
    }

    #[test]
    fn mapping_entry_enforces_only_listed_fields() {
        let existing = doc(
            "proxies: []\nproxy-groups:\n  - name: US Auto\n    type: select\n    interval: 300\n    lazy: true\nrules: []\n",
        );
        let outcome = engine().apply(&existing, &[group_rule()]).unwrap();
        // `type` corrected, `interval` already matches, `url` not enforced,
        // operator's `lazy` untouched.
        assert_eq!(outcome.changes.len(), 1);
        assert_eq!(outcome.changes[0].path, "proxy-groups[name=US Auto].type");
        let group = path::resolve(
            outcome.document.root(),
            TargetPath::key("proxy-groups")
                .then_entry("name", "US Auto")
                .steps(),
        )
        .unwrap()
        .as_mapping()
        .unwrap()
        .clone();
        assert_eq!(
            group.get(&Value::from("lazy")),
            Some(&Value::Bool(true))
        );
        assert!(group.get(&Value::from("url")).is_none());
    }

    fn membership_rule(entries: &[&str], strategy: MergeStrategy) -> Rule {
        Rule::new(
            "test: membership",
            GUARD,
            EnsureOp::Membership {
                path: TargetPath::key("proxy-groups")
                    .then_entry("name", "Proxy")
                    .then_key("proxies"),
                entries: entries.iter().map(|e| Value::from(*e)).collect(),
                strategy,
            },
        )
    }

    fn group_candidates(document: &Document) -> Vec<String> {
        path::resolve(
            document.root(),
            TargetPath::key("proxy-groups")
                .then_entry("name", "Proxy")
                .then_key("proxies")
                .steps(),
        )
        .unwrap()
        .as_sequence()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect()
    }

    #[test]
    fn append_only_keeps_existing_entries_in_place() {
        let rule = membership_rule(&["c", "a"], MergeStrategy::AppendOnly);
        let outcome = engine().apply(&base_doc(), &[rule]).unwrap();
        assert_eq!(group_candidates(&outcome.document), vec!["a", "b", "c"]);
        assert_eq!(outcome.changes.len(), 1);
        assert_eq!(outcome.changes[0].kind, ChangeKind::Appended);
    }

    #[test]
    fn append_only_never_duplicates() {
        let rule = membership_rule(&["c", "c"], MergeStrategy::AppendOnly);
        let outcome = engine().apply(&base_doc(), &[rule]).unwrap();
        assert_eq!(group_candidates(&outcome.document), vec!["a", "b", "c"]);
    }

    #[test]
    fn replace_rewrites_when_different_and_noops_when_equal() {
        let rule = membership_rule(&["x", "y"], MergeStrategy::Replace);
        let outcome = engine().apply(&base_doc(), &[rule.clone()]).unwrap();
        assert_eq!(group_candidates(&outcome.document), vec!["x", "y"]);
        assert_eq!(outcome.changes[0].kind, ChangeKind::Replaced);

        let second = engine().apply(&outcome.document, &[rule]).unwrap();
        assert!(second.changes.is_empty());
    }

    #[test]
    fn replace_with_no_entries_is_a_configuration_error() {
        let rule = membership_rule(&[], MergeStrategy::Replace);
        let err = engine().apply(&base_doc(), &[rule]).unwrap_err();
        assert!(matches!(err, PatchError::EmptyCandidates { .. }));
    }

    #[test]
    fn append_only_to_missing_group_warns_instead_of_failing() {
        let rule = Rule::new(
            "test: missing",
            GUARD,
            EnsureOp::Membership {
                path: TargetPath::key("proxy-groups")
                    .then_entry("name", "Nope")
                    .then_key("proxies"),
                entries: vec![Value::from("x")],
                strategy: MergeStrategy::AppendOnly,
            },
        );
        let outcome = engine().apply(&base_doc(), &[rule]).unwrap();
        assert!(outcome.changes.is_empty());
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[test]
    fn mihomo_only_rule_is_silently_skipped_under_classic() {
        let engine = PatchEngine::new(CompatProfile::CLASSIC, FeatureSet::default());
        let rule = Rule::new(
            "test: gated",
            Guard {
                feature: Feature::Resi,
                mihomo_only: true,
            },
            EnsureOp::Scalar {
                path: TargetPath::key("port"),
                value: Value::from(7891u64),
            },
        );
        let outcome = engine.apply(&base_doc(), &[rule]).unwrap();
        assert!(outcome.changes.is_empty());
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn disabled_feature_contributes_nothing() {
        let features = FeatureSet {
            resi: false,
            bypass: true,
        };
        let engine = PatchEngine::new(CompatProfile::MIHOMO, features);
        let outcome = engine.apply(&base_doc(), &[scalar_rule(7891)]).unwrap();
        assert!(outcome.changes.is_empty());
    }

    #[test]
    fn error_leaves_input_document_untouched() {
        let document = base_doc();
        let rules = vec![
            scalar_rule(7891),
            membership_rule(&[], MergeStrategy::Replace),
        ];
        let err = engine().apply(&document, &rules).unwrap_err();
        assert!(matches!(err, PatchError::EmptyCandidates { .. }));
        // The caller's snapshot still has no `port` key.
        assert!(document.root().get(&Value::from("port")).is_none());
    }
}
