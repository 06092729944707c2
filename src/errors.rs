use thiserror::Error;

/// Errors surfaced by the patch engine and its collaborators.
///
/// The taxonomy is deliberately small: parse-class errors abort before any
/// rule runs, configuration-class errors identify the offending pattern or
/// rule, and everything recoverable is reported as a warning instead.
#[derive(Error, Debug)]
pub enum PatchError {
    #[error("invalid YAML document: {message}")]
    InvalidYaml { message: String },

    #[error("document is missing required top-level section '{section}'")]
    MissingSection { section: &'static str },

    #[error("top-level section '{section}' is malformed: {message}")]
    MalformedSection {
        section: &'static str,
        message: String,
    },

    #[error("invalid match pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("unknown feature '{name}' (valid: resi, bypass)")]
    UnknownFeature { name: String },

    #[error("rule '{rule}' resolved an empty candidate list and no fallback is configured")]
    EmptyCandidates { rule: String },

    #[error("rule '{rule}' has an unusable target path: {path}")]
    InvalidTarget { rule: String, path: String },

    #[error("rule '{rule}' target '{path}' is not a sequence")]
    TargetNotSequence { rule: String, path: String },

    #[error("failed to serialize patched document: {message}")]
    Serialize { message: String },
}
