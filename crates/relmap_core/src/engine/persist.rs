//! Persist engine: one insert, update or delete per record plus cascades.
//!
//! # Invariants
//! - Children are deleted before their parent and written after it, so the
//!   parent's generated key exists before any child insert.
//! - Lifecycle flags change only after the record's own statement and its
//!   cascades succeeded.
//! - A `ChangeConflict` leaves every record of the subtree with the flags it
//!   had before the call.

use super::{command_lists, Engine, EngineError, EngineResult};
use crate::exec::binding::{apply_outputs, bind_inputs, merge_row};
use crate::exec::{BindError, StatementExecutor};
use crate::mapping::{DataSourceMap, MappingError, RelationshipDescriptor};
use crate::model::lifecycle::{operation_before, state_after, ObjectState, Operation};
use crate::model::record::{ObjectGraph, RecordId};
use log::{debug, trace, warn};
use rusqlite::types::Value;
use std::collections::BTreeSet;
use std::time::Instant;

/// Records whose persist call has started but not finished.
type InProgress = BTreeSet<RecordId>;

impl<E: StatementExecutor> Engine<'_, E> {
    /// Persists one record and cascades to its one-to-many children.
    ///
    /// Returns the operation that ran, `Operation::None` when nothing was
    /// pending, or `Operation::ChangeConflict` when the store reported an
    /// affected-row count other than one.
    ///
    /// # Errors
    /// - Configuration defects: missing/incomplete mapping, missing open
    ///   transaction for identity fetches.
    /// - Integrity violations: multiple rows, cascade mismatches, lifecycle
    ///   state that cannot advance.
    pub fn persist(&self, graph: &mut ObjectGraph, id: RecordId) -> EngineResult<Operation> {
        let started_at = Instant::now();
        let mut in_progress = InProgress::new();
        let result = self.persist_record(graph, id, 0, &mut in_progress);

        match &result {
            Ok(operation) => debug!(
                "event=persist module=engine status=ok record={id} operation={operation} duration_ms={}",
                started_at.elapsed().as_millis()
            ),
            Err(err) => warn!(
                "event=persist module=engine status=error record={id} duration_ms={} error={err}",
                started_at.elapsed().as_millis()
            ),
        }
        result
    }

    fn persist_record(
        &self,
        graph: &mut ObjectGraph,
        id: RecordId,
        depth: usize,
        in_progress: &mut InProgress,
    ) -> EngineResult<Operation> {
        if depth > self.config.max_cascade_depth {
            return Err(EngineError::CascadeTooDeep {
                max_depth: self.config.max_cascade_depth,
            });
        }

        let record = graph.get(id).ok_or(EngineError::UnknownRecord(id))?;
        let map = self.registry.get_map(record.type_name())?;
        let pre_state = record.state();
        let operation = operation_before(pre_state, record.is_new());
        match operation {
            Operation::None => return Ok(Operation::None),
            Operation::StateError => {
                return Err(EngineError::StateError {
                    type_name: map.type_name.clone(),
                    state: pre_state,
                })
            }
            _ => {}
        }

        if !in_progress.insert(id) {
            return Err(EngineError::CascadeCycle { record: id });
        }
        trace!(
            "event=persist_record module=engine status=start record={id} type={} operation={operation} depth={depth}",
            map.type_name
        );
        let result = self.write_record(graph, id, &map, operation, pre_state, depth, in_progress);
        in_progress.remove(&id);
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn write_record(
        &self,
        graph: &mut ObjectGraph,
        id: RecordId,
        map: &DataSourceMap,
        operation: Operation,
        pre_state: ObjectState,
        depth: usize,
        in_progress: &mut InProgress,
    ) -> EngineResult<Operation> {
        let type_name = map.type_name.as_str();
        let command = map
            .command(operation)
            .ok_or_else(|| MappingError::Incomplete {
                type_name: type_name.to_string(),
                operation,
                missing: "a command",
            })?;
        let (parameters, fields) = command_lists(type_name, operation, command)?;

        if command.identity.is_some() && !self.executor.in_transaction() {
            return Err(EngineError::NoAmbientTransaction {
                type_name: type_name.to_string(),
            });
        }

        let bound = {
            let record = graph.get(id).ok_or(EngineError::UnknownRecord(id))?;
            bind_inputs(record, parameters)?
        };

        let mut cascaded = Vec::new();
        if operation == Operation::Delete {
            cascaded = graph.subtree_lifecycles(id);
            self.cascade_delete(graph, id, map, depth, in_progress)?;
        }

        let outcome = self
            .executor
            .execute(&self.request(command, &command.text, &bound, Some(1)))?;
        if outcome.rows.len() > 1 {
            return Err(EngineError::MultipleRowsReturned {
                type_name: type_name.to_string(),
                operation,
            });
        }
        if outcome.affected_rows != 1 {
            warn!(
                "event=persist_conflict module=engine status=conflict record={id} type={type_name} operation={operation} affected_rows={}",
                outcome.affected_rows
            );
            // Children deleted by the cascade go back to their pre-call flags.
            graph.restore_lifecycles(&cascaded);
            return Ok(Operation::ChangeConflict);
        }

        // Results land on a copy so a failed merge leaves the record as it was.
        let mut record = graph.get(id).ok_or(EngineError::UnknownRecord(id))?.clone();
        let row = outcome.rows.first();
        if let Some(row) = row {
            merge_row(&mut record, row, fields);
        }
        apply_outputs(&mut record, row, parameters)?;

        if let Some(identity) = &command.identity {
            let fetched = self
                .executor
                .execute(&self.request(command, identity, &[], Some(1)))?;
            match fetched.rows.as_slice() {
                [] => {
                    return Err(EngineError::IdentityNotFound {
                        type_name: type_name.to_string(),
                    })
                }
                [row] => {
                    if merge_row(&mut record, row, fields) == 0 {
                        return Err(MappingError::Incomplete {
                            type_name: type_name.to_string(),
                            operation,
                            missing: "field descriptors matching the identity row",
                        }
                        .into());
                    }
                }
                _ => {
                    return Err(EngineError::MultipleRowsReturned {
                        type_name: type_name.to_string(),
                        operation: Operation::SelectId,
                    })
                }
            }
        }

        *graph.get_mut(id).ok_or(EngineError::UnknownRecord(id))? = record;

        if matches!(operation, Operation::Insert | Operation::Update) {
            self.cascade_save(graph, id, map, operation, depth, in_progress)?;
        }

        let after = state_after(pre_state);
        if after == pre_state {
            return Err(EngineError::StateError {
                type_name: type_name.to_string(),
                state: pre_state,
            });
        }
        let record = graph.get_mut(id).ok_or(EngineError::UnknownRecord(id))?;
        let lifecycle = record.lifecycle_mut();
        lifecycle.state = after;
        match operation {
            Operation::Insert => lifecycle.is_new = false,
            Operation::Delete => lifecycle.is_new = true,
            _ => {}
        }
        Ok(operation)
    }

    /// Marks every child removed and deletes it before the parent row.
    fn cascade_delete(
        &self,
        graph: &mut ObjectGraph,
        parent: RecordId,
        map: &DataSourceMap,
        depth: usize,
        in_progress: &mut InProgress,
    ) -> EngineResult<()> {
        for relationship in map.one_to_many() {
            self.registry.get_map(&relationship.child_type)?;
            for child in graph.children(parent, &relationship.property) {
                let record = graph.get_mut(child).ok_or(EngineError::UnknownRecord(child))?;
                check_child_type(relationship, record.type_name())?;
                record.mark_removed();

                let child_operation = self.persist_record(graph, child, depth + 1, in_progress)?;
                if child_operation != Operation::Delete {
                    return Err(cascade_violation(
                        map,
                        Operation::Delete,
                        relationship,
                        child_operation,
                    ));
                }
            }
        }
        Ok(())
    }

    /// Propagates the parent key and persists every child after the parent.
    fn cascade_save(
        &self,
        graph: &mut ObjectGraph,
        parent: RecordId,
        map: &DataSourceMap,
        operation: Operation,
        depth: usize,
        in_progress: &mut InProgress,
    ) -> EngineResult<()> {
        for relationship in map.one_to_many() {
            self.registry.get_map(&relationship.child_type)?;
            for child in graph.children(parent, &relationship.property) {
                let record = graph.get(child).ok_or(EngineError::UnknownRecord(child))?;
                check_child_type(relationship, record.type_name())?;
                if record.lifecycle().pending_operation().is_write() {
                    let principal = principal_value(graph, parent, relationship)?;
                    graph
                        .get_mut(child)
                        .ok_or(EngineError::UnknownRecord(child))?
                        .set(&relationship.foreign_key, principal);
                }

                let child_operation = self.persist_record(graph, child, depth + 1, in_progress)?;
                let allowed = match operation {
                    Operation::Insert => {
                        matches!(child_operation, Operation::Insert | Operation::None)
                    }
                    _ => matches!(
                        child_operation,
                        Operation::Insert | Operation::Update | Operation::None
                    ),
                };
                if !allowed {
                    return Err(cascade_violation(map, operation, relationship, child_operation));
                }
            }
        }
        Ok(())
    }
}

/// Parent key copied into pending children; required only when one exists.
fn principal_value(
    graph: &ObjectGraph,
    parent: RecordId,
    relationship: &RelationshipDescriptor,
) -> EngineResult<Value> {
    let value = graph
        .get(parent)
        .and_then(|record| record.get(&relationship.principal_key))
        .cloned()
        .ok_or_else(|| BindError::MissingField {
            parameter: relationship.foreign_key.clone(),
            field: relationship.principal_key.clone(),
        })?;
    Ok(value)
}

fn check_child_type(relationship: &RelationshipDescriptor, found: &str) -> EngineResult<()> {
    if relationship.child_type == found {
        return Ok(());
    }
    Err(EngineError::ChildTypeMismatch {
        property: relationship.property.clone(),
        expected: relationship.child_type.clone(),
        found: found.to_string(),
    })
}

fn cascade_violation(
    map: &DataSourceMap,
    parent_operation: Operation,
    relationship: &RelationshipDescriptor,
    child_operation: Operation,
) -> EngineError {
    EngineError::CascadeViolation {
        parent_type: map.type_name.clone(),
        parent_operation,
        child_type: relationship.child_type.clone(),
        child_operation,
    }
}
