pub mod builder;
pub mod engine;
pub mod op;

pub use builder::{build, RuleSet};
pub use engine::{ApplyOutcome, PatchEngine};
pub use op::{EnsureOp, Feature, Guard, MergeStrategy, Rule};
