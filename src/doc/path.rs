use serde_yaml::{Mapping, Value};
use std::fmt;

/// One navigation step into the document tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Descend into a mapping by key.
    Key(String),
    /// Select the mapping in a sequence whose `field` scalar equals `ident`.
    Entry { field: String, ident: String },
}

/// A typed locator for an ensure operation's target.
///
/// Ensure operations manipulate a well-defined path expression instead of
/// walking the tree ad hoc, so every mutation site can be named in change
/// records and error messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPath {
    steps: Vec<Step>,
}

impl TargetPath {
    pub fn key(name: &str) -> Self {
        Self {
            steps: vec![Step::Key(name.to_string())],
        }
    }

    pub fn then_key(mut self, name: &str) -> Self {
        self.steps.push(Step::Key(name.to_string()));
        self
    }

    pub fn then_entry(mut self, field: &str, ident: &str) -> Self {
        self.steps.push(Step::Entry {
            field: field.to_string(),
            ident: ident.to_string(),
        });
        self
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Final step plus the parent prefix leading to it.
    pub fn split_last(&self) -> Option<(&Step, &[Step])> {
        self.steps.split_last()
    }

    /// Display path of a field beneath this target.
    pub fn child(&self, field: &str) -> String {
        format!("{}.{}", self, field)
    }
}

impl fmt::Display for TargetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, step) in self.steps.iter().enumerate() {
            match step {
                Step::Key(key) => {
                    if idx > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{key}")?;
                }
                Step::Entry { field, ident } => write!(f, "[{field}={ident}]")?,
            }
        }
        Ok(())
    }
}

/// Resolve a step sequence to a node, or `None` when any step is missing.
pub fn resolve<'a>(root: &'a Mapping, steps: &[Step]) -> Option<&'a Value> {
    let (first, rest) = steps.split_first()?;
    let mut node = match first {
        Step::Key(key) => root.get(&Value::from(key.as_str()))?,
        Step::Entry { .. } => return None,
    };
    for step in rest {
        node = step_into(node, step)?;
    }
    Some(node)
}

/// Mutable variant of [`resolve`].
pub fn resolve_mut<'a>(root: &'a mut Mapping, steps: &[Step]) -> Option<&'a mut Value> {
    let (first, rest) = steps.split_first()?;
    let mut node = match first {
        Step::Key(key) => root.get_mut(&Value::from(key.as_str()))?,
        Step::Entry { .. } => return None,
    };
    for step in rest {
        node = step_into_mut(node, step)?;
    }
    Some(node)
}

fn step_into<'a>(node: &'a Value, step: &Step) -> Option<&'a Value> {
    match step {
        Step::Key(key) => node.as_mapping()?.get(&Value::from(key.as_str())),
        Step::Entry { field, ident } => node
            .as_sequence()?
            .iter()
            .find(|item| entry_ident(item, field) == Some(ident.as_str())),
    }
}

fn step_into_mut<'a>(node: &'a mut Value, step: &Step) -> Option<&'a mut Value> {
    match step {
        Step::Key(key) => node.as_mapping_mut()?.get_mut(&Value::from(key.as_str())),
        Step::Entry { field, ident } => node
            .as_sequence_mut()?
            .iter_mut()
            .find(|item| entry_ident(item, field) == Some(ident.as_str())),
    }
}

/// The identifying scalar of a sequence entry, when it has one.
pub fn entry_ident<'a>(item: &'a Value, field: &str) -> Option<&'a str> {
    item.as_mapping()?
        .get(&Value::from(field))?
        .as_str()
}
