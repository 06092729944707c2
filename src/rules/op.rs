use crate::doc::TargetPath;
use serde_yaml::{Mapping, Value};
use std::fmt;

/// Feature flag a rule belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    /// Residential-chain layout: dialer node, url-test group, entry group.
    Resi,
    /// Always-DIRECT bypass for private ranges and selected domains.
    Bypass,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Resi => "resi",
            Feature::Bypass => "bypass",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Controls whether a rule participates in a run. A guarded-out rule
/// contributes no changes, no warnings, and no errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Guard {
    pub feature: Feature,
    /// The rule writes fields only mihomo-class cores accept.
    pub mihomo_only: bool,
}

/// How ensure-membership reconciles an existing list with required entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Missing entries are appended at the end; existing entries are never
    /// altered, removed, or reordered. The default for operator-visible
    /// lists.
    AppendOnly,
    /// The list is recomputed wholesale. Only for engine-owned lists; a
    /// zero-length replacement fails the run.
    Replace,
}

/// The closed set of idempotent ensure operations.
///
/// The operation vocabulary is fixed and finite, so rule construction and
/// application both get exhaustive-match safety.
#[derive(Debug, Clone, PartialEq)]
pub enum EnsureOp {
    /// Set the scalar at `path` unless it already equals `value`.
    Scalar { path: TargetPath, value: Value },
    /// Insert the fully-formed `template` when the target mapping is
    /// absent; otherwise correct only the fields named in `enforce`,
    /// leaving operator-customized fields untouched.
    Mapping {
        path: TargetPath,
        template: Mapping,
        enforce: Vec<String>,
    },
    /// Reconcile the sequence at `path` with `entries` per `strategy`.
    Membership {
        path: TargetPath,
        entries: Vec<Value>,
        strategy: MergeStrategy,
    },
}

impl EnsureOp {
    pub fn path(&self) -> &TargetPath {
        match self {
            EnsureOp::Scalar { path, .. }
            | EnsureOp::Mapping { path, .. }
            | EnsureOp::Membership { path, .. } => path,
        }
    }
}

/// One declarative patch rule: a labeled, guarded ensure operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub label: String,
    pub guard: Guard,
    pub op: EnsureOp,
}

impl Rule {
    pub fn new(label: impl Into<String>, guard: Guard, op: EnsureOp) -> Self {
        Self {
            label: label.into(),
            guard,
            op,
        }
    }
}
