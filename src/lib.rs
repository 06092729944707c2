//! Subpatch: idempotent structural patcher for proxy-subscription YAML
//!
//! A subscription refresh overwrites whatever an operator edited by hand.
//! Subpatch brings a refreshed document back to a target structural state
//! declaratively: every operation is an idempotent "ensure" over an ordered
//! YAML tree, so re-running the patcher on its own output is always a
//! no-op.
//!
//! # Architecture
//!
//! All mutations compile down to three ensure operations ([`EnsureOp`]):
//! ensure-scalar, ensure-mapping, and ensure-list-membership. Intelligence
//! lives in rule construction (pattern-resolved candidate lists, compat
//! gating), not in the application logic.
//!
//! # Guarantees
//!
//! - Idempotence: a second pass over patched output yields zero changes
//! - Append-only membership never removes or reorders operator entries
//! - Mapping key order survives load → patch → save
//! - Runs are all-or-nothing; errors never leave a half-patched document
//!
//! # Example
//!
//! ```no_run
//! use subpatch::config::Profile;
//! use subpatch::session;
//!
//! let yaml = std::fs::read_to_string("subscription.yaml").unwrap();
//! let report = session::run(&Profile::default(), &yaml).unwrap();
//! if report.changed {
//!     std::fs::write("subscription.yaml", &report.patched).unwrap();
//! }
//! ```

pub mod compat;
pub mod config;
pub mod doc;
pub mod errors;
pub mod matcher;
pub mod report;
pub mod rules;
pub mod session;

// Re-exports
pub use compat::{CompatMode, CompatProfile, CompatResolution};
pub use config::{load_from_path, load_from_str, ConfigError, FeatureSet, Profile};
pub use doc::{Document, Step, TargetPath};
pub use errors::PatchError;
pub use matcher::PatternSet;
pub use report::{render_changelog, unified_diff, ChangeKind, ChangeRecord};
pub use rules::{ApplyOutcome, EnsureOp, Guard, MergeStrategy, PatchEngine, Rule, RuleSet};
pub use session::RunReport;
