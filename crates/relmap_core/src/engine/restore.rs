//! Restore engine: single-row lookup by identity, with explicit includes.
//!
//! # Invariants
//! - Child collections are loaded only when the caller names them.
//! - Included children are attached in the order their query returns them.

use super::{command_lists, Engine, EngineError, EngineResult};
use crate::exec::binding::bind_inputs;
use crate::exec::{BindError, StatementExecutor};
use crate::mapping::MappingError;
use crate::model::criteria::Criteria;
use crate::model::lifecycle::Operation;
use crate::model::record::{ObjectGraph, Record, RecordId};
use log::debug;
use std::collections::BTreeMap;

/// Tree of relationship properties to load after a restore.
///
/// Built from dotted paths: `["lines", "lines.notes"]` loads `lines` and,
/// under every line, `notes`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IncludePlan {
    children: BTreeMap<String, IncludePlan>,
}

impl IncludePlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse<S: AsRef<str>>(paths: &[S]) -> EngineResult<Self> {
        let mut plan = Self::new();
        for path in paths {
            plan.add(path.as_ref())?;
        }
        Ok(plan)
    }

    pub fn add(&mut self, path: &str) -> EngineResult<()> {
        let segments: Vec<&str> = path.split('.').map(str::trim).collect();
        if segments.iter().any(|segment| segment.is_empty()) {
            return Err(EngineError::InvalidInclude(path.to_string()));
        }
        let mut node = self;
        for segment in segments {
            node = node.children.entry(segment.to_string()).or_default();
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Deepest level named by this plan.
    pub fn depth(&self) -> usize {
        self.children
            .values()
            .map(|child| child.depth() + 1)
            .max()
            .unwrap_or(0)
    }
}

impl<E: StatementExecutor> Engine<'_, E> {
    /// Loads the record of `type_name` identified by `identity`'s fields.
    ///
    /// Returns `None` when no row matches.
    ///
    /// # Errors
    /// - `MultipleRowsReturned` when the lookup matches more than one row.
    pub fn restore(&self, type_name: &str, identity: &Record) -> EngineResult<Option<Record>> {
        let map = self.registry.get_map(type_name)?;
        let operation = Operation::SelectOne;
        let command = map
            .select_one
            .as_ref()
            .ok_or_else(|| MappingError::Incomplete {
                type_name: type_name.to_string(),
                operation,
                missing: "a command",
            })?;
        let (parameters, fields) = command_lists(type_name, operation, command)?;
        let bound = bind_inputs(identity, parameters)?;

        let outcome = self
            .executor
            .execute(&self.request(command, &command.text, &bound, Some(1)))?;
        self.check_read_count(type_name, operation, command, &outcome)?;

        match outcome.rows.as_slice() {
            [] => {
                debug!("event=restore module=engine status=ok type={type_name} found=false");
                Ok(None)
            }
            [row] => {
                debug!("event=restore module=engine status=ok type={type_name} found=true");
                self.materialize(type_name, row, fields).map(Some)
            }
            _ => Err(EngineError::MultipleRowsReturned {
                type_name: type_name.to_string(),
                operation,
            }),
        }
    }

    /// Restores one record into `graph` and loads the included collections.
    ///
    /// Each included relationship must declare a `load_command` on the child
    /// type; it is queried with `{foreign_key: parent.principal_key}`.
    pub fn restore_graph<S: AsRef<str>>(
        &self,
        graph: &mut ObjectGraph,
        type_name: &str,
        identity: &Record,
        includes: &[S],
    ) -> EngineResult<Option<RecordId>> {
        let plan = IncludePlan::parse(includes)?;
        if plan.depth() > self.config.max_cascade_depth {
            return Err(EngineError::CascadeTooDeep {
                max_depth: self.config.max_cascade_depth,
            });
        }

        let Some(record) = self.restore(type_name, identity)? else {
            return Ok(None);
        };
        let id = graph.insert(record);
        self.load_includes(graph, id, &plan)?;
        Ok(Some(id))
    }

    fn load_includes(
        &self,
        graph: &mut ObjectGraph,
        parent: RecordId,
        plan: &IncludePlan,
    ) -> EngineResult<()> {
        if plan.is_empty() {
            return Ok(());
        }

        let parent_type = graph
            .get(parent)
            .ok_or(EngineError::UnknownRecord(parent))?
            .type_name()
            .to_string();
        let map = self.registry.get_map(&parent_type)?;

        for (property, nested) in &plan.children {
            let relationship = map.one_to_many_named(property).ok_or_else(|| {
                MappingError::UnknownRelationship {
                    type_name: parent_type.clone(),
                    property: property.clone(),
                }
            })?;
            let load_command =
                relationship
                    .load_command
                    .as_deref()
                    .ok_or_else(|| MappingError::Incomplete {
                        type_name: parent_type.clone(),
                        operation: Operation::SelectFor,
                        missing: "a load command for the included relationship",
                    })?;
            let principal = graph
                .get(parent)
                .and_then(|record| record.get(&relationship.principal_key))
                .cloned()
                .ok_or_else(|| BindError::MissingField {
                    parameter: relationship.foreign_key.clone(),
                    field: relationship.principal_key.clone(),
                })?;

            let criteria = Criteria::new(load_command).with(&relationship.foreign_key, principal);
            let children = self.query(&relationship.child_type, Some(&criteria))?;
            for child in children {
                let child_id = graph.insert_child(parent, &relationship.property, child)?;
                self.load_includes(graph, child_id, nested)?;
            }
        }
        Ok(())
    }
}
