//! Mapped records and the object graph arena.
//!
//! # Responsibility
//! - Hold field values and lifecycle flags for one mapped object.
//! - Own every record of a unit of work in one arena addressed by `RecordId`.
//!
//! # Invariants
//! - A `RecordId` is only meaningful for the graph that issued it.
//! - Relationship collections keep insertion order; cascades follow it.

use crate::model::lifecycle::{Lifecycle, ObjectState};
use rusqlite::types::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Arena index of one record inside an `ObjectGraph`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(usize);

impl RecordId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// In-memory object mapped to one row of a relational store.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    type_name: String,
    lifecycle: Lifecycle,
    fields: BTreeMap<String, Value>,
    relations: BTreeMap<String, Vec<RecordId>>,
}

impl Record {
    /// Creates a never-stored record with no field values.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            lifecycle: Lifecycle::fresh(),
            fields: BTreeMap::new(),
            relations: BTreeMap::new(),
        }
    }

    /// Creates a record that mirrors an existing row.
    ///
    /// Used by callers that rebuild records from data loaded elsewhere.
    pub fn loaded(type_name: impl Into<String>) -> Self {
        Self::new(type_name).with_lifecycle(Lifecycle::loaded())
    }

    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Builder-style field assignment.
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn state(&self) -> ObjectState {
        self.lifecycle.state
    }

    pub fn is_new(&self) -> bool {
        self.lifecycle.is_new
    }

    /// Requests an insert (new record) or update (stored record).
    pub fn mark_modified(&mut self) {
        self.lifecycle.state = ObjectState::Modified;
    }

    /// Requests a delete of the backing row.
    pub fn mark_removed(&mut self) {
        self.lifecycle.state = ObjectState::Removed;
    }

    pub(crate) fn lifecycle_mut(&mut self) -> &mut Lifecycle {
        &mut self.lifecycle
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Returns the field as `i64` when it holds an integer.
    pub fn get_i64(&self, field: &str) -> Option<i64> {
        match self.fields.get(field) {
            Some(Value::Integer(value)) => Some(*value),
            _ => None,
        }
    }

    /// Returns the field as `&str` when it holds text.
    pub fn get_text(&self, field: &str) -> Option<&str> {
        match self.fields.get(field) {
            Some(Value::Text(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.fields.insert(field.to_string(), value.into());
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Child ids under one relationship property, in attach order.
    pub fn children(&self, property: &str) -> &[RecordId] {
        self.relations
            .get(property)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Error raised when a graph operation names a record it does not own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownRecord(pub RecordId);

impl Display for UnknownRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "record {} is not part of this object graph", self.0)
    }
}

impl Error for UnknownRecord {}

/// Arena of records for one unit of work.
#[derive(Debug, Clone, Default)]
pub struct ObjectGraph {
    records: Vec<Record>,
}

impl ObjectGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: Record) -> RecordId {
        self.records.push(record);
        RecordId(self.records.len() - 1)
    }

    pub fn get(&self, id: RecordId) -> Option<&Record> {
        self.records.get(id.0)
    }

    pub fn get_mut(&mut self, id: RecordId) -> Option<&mut Record> {
        self.records.get_mut(id.0)
    }

    /// Appends `child` to `parent`'s collection named `property`.
    pub fn attach(
        &mut self,
        parent: RecordId,
        property: &str,
        child: RecordId,
    ) -> Result<(), UnknownRecord> {
        if self.records.get(child.0).is_none() {
            return Err(UnknownRecord(child));
        }
        let record = self.records.get_mut(parent.0).ok_or(UnknownRecord(parent))?;
        record
            .relations
            .entry(property.to_string())
            .or_default()
            .push(child);
        Ok(())
    }

    /// Inserts `child` and attaches it under `parent` in one step.
    pub fn insert_child(
        &mut self,
        parent: RecordId,
        property: &str,
        child: Record,
    ) -> Result<RecordId, UnknownRecord> {
        if self.records.get(parent.0).is_none() {
            return Err(UnknownRecord(parent));
        }
        let id = self.insert(child);
        self.attach(parent, property, id)?;
        Ok(id)
    }

    /// Returns an owned copy of the child ids so callers may mutate the graph.
    pub fn children(&self, parent: RecordId, property: &str) -> Vec<RecordId> {
        self.get(parent)
            .map(|record| record.children(property).to_vec())
            .unwrap_or_default()
    }

    /// Lifecycle flags of `root` and every record reachable through its
    /// collections, each record listed once.
    pub(crate) fn subtree_lifecycles(&self, root: RecordId) -> Vec<(RecordId, Lifecycle)> {
        let mut seen = BTreeSet::new();
        let mut pending = vec![root];
        let mut saved = Vec::new();
        while let Some(id) = pending.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(record) = self.get(id) {
                saved.push((id, record.lifecycle));
                pending.extend(record.relations.values().flatten().copied());
            }
        }
        saved
    }

    pub(crate) fn restore_lifecycles(&mut self, saved: &[(RecordId, Lifecycle)]) {
        for (id, lifecycle) in saved {
            if let Some(record) = self.get_mut(*id) {
                record.lifecycle = *lifecycle;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
