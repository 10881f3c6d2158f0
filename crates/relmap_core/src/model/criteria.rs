//! Named query criteria bound to select-for commands.

use rusqlite::types::Value;
use std::collections::BTreeMap;

/// Identifier of a select-for command plus the values bound to its inputs.
///
/// Values are keyed by the parameter descriptor's `field` name, the same way
/// record fields are.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Criteria {
    name: String,
    values: BTreeMap<String, Value>,
}

impl Criteria {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.values.insert(field.to_string(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }
}
