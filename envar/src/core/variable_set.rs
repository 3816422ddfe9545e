//! Case-insensitive, name-ordered collection of variables.

use std::collections::BTreeMap;

/// A variable set materialized from one scope.
///
/// Keys compare with ASCII case folding and iterate in folded-name order.
/// The casing seen in the source is kept for display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableSet {
    entries: BTreeMap<String, Variable>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub value: String,
}

impl VariableSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a variable unless a case-insensitively equal name is present.
    ///
    /// Returns `false` (and keeps the earlier entry) on a collision.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> bool {
        let name = name.into();
        let key = fold(&name);
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(
            key,
            Variable {
                name,
                value: value.into(),
            },
        );
        true
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(&fold(name)).map(|var| var.value.as_str())
    }

    /// Stored casing of `name`, if present.
    pub fn stored_name(&self, name: &str) -> Option<&str> {
        self.entries.get(&fold(name)).map(|var| var.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.entries.values()
    }

    /// Width of the longest name, in chars.
    pub fn name_width(&self) -> usize {
        self.iter()
            .map(|var| var.name.chars().count())
            .max()
            .unwrap_or(0)
    }
}

fn fold(name: &str) -> String {
    name.to_ascii_lowercase()
}
