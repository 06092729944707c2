use crate::errors::PatchError;
use serde_yaml::{Mapping, Value};

/// Top-level sections every subscription document must carry.
pub const REQUIRED_SECTIONS: [&str; 3] = ["proxies", "proxy-groups", "rules"];

/// An ordered subscription document.
///
/// The tree is backed by [`serde_yaml::Mapping`], which preserves key
/// insertion order, so structure the engine never touches round-trips
/// through load → patch → save without diff noise. Comments do not survive
/// (serde_yaml semantics); everything structural does.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    root: Mapping,
}

impl Document {
    /// Parse and validate a document.
    ///
    /// Fails if the input is not well-formed YAML, the root is not a
    /// mapping, or any required section is missing or not a sequence. All
    /// of these abort before any rule runs.
    pub fn parse(text: &str) -> Result<Self, PatchError> {
        let value: Value =
            serde_yaml::from_str(text).map_err(|err| PatchError::InvalidYaml {
                message: err.to_string(),
            })?;
        let root = match value {
            Value::Mapping(map) => map,
            other => {
                return Err(PatchError::InvalidYaml {
                    message: format!(
                        "expected a mapping at the document root, found {}",
                        value_kind(&other)
                    ),
                })
            }
        };

        for section in REQUIRED_SECTIONS {
            match root.get(&Value::from(section)) {
                None => return Err(PatchError::MissingSection { section }),
                Some(Value::Sequence(_)) => {}
                Some(other) => {
                    return Err(PatchError::MalformedSection {
                        section,
                        message: format!("expected a sequence, found {}", value_kind(other)),
                    })
                }
            }
        }

        Ok(Self { root })
    }

    pub fn root(&self) -> &Mapping {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Mapping {
        &mut self.root
    }

    /// Serialize the tree, preserving mapping key order.
    pub fn to_yaml(&self) -> Result<String, PatchError> {
        serde_yaml::to_string(&Value::Mapping(self.root.clone())).map_err(|err| {
            PatchError::Serialize {
                message: err.to_string(),
            }
        })
    }

    /// Node names from `proxies`, in source order.
    pub fn proxy_names(&self) -> Vec<String> {
        self.entry_names("proxies")
    }

    /// Group names from `proxy-groups`, in source order.
    pub fn group_names(&self) -> Vec<String> {
        self.entry_names("proxy-groups")
    }

    fn entry_names(&self, section: &str) -> Vec<String> {
        self.root
            .get(&Value::from(section))
            .and_then(Value::as_sequence)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        entry
                            .as_mapping()
                            .and_then(|map| map.get(&Value::from("name")))
                            .and_then(Value::as_str)
                            .map(str::to_string)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}
