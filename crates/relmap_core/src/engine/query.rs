//! Query engine: set-returning reads materialized into fresh records.

use super::{command_lists, Engine, EngineError, EngineResult};
use crate::exec::binding::{apply_row, bind_criteria, bind_none};
use crate::exec::{ExecOutcome, ResultRow, StatementExecutor};
use crate::mapping::{CommandDescriptor, FieldDescriptor, MappingError};
use crate::model::criteria::Criteria;
use crate::model::lifecycle::{Lifecycle, Operation};
use crate::model::record::Record;
use log::debug;

impl<E: StatementExecutor> Engine<'_, E> {
    /// Runs the type's select-all command, or the select-for command named
    /// by `criteria`, and materializes one record per row.
    ///
    /// Materialized records are loaded (`is_new == false`, consistent).
    pub fn query(&self, type_name: &str, criteria: Option<&Criteria>) -> EngineResult<Vec<Record>> {
        let map = self.registry.get_map(type_name)?;
        let (operation, command) = match criteria {
            None => (
                Operation::SelectAll,
                map.select_all
                    .as_ref()
                    .ok_or_else(|| MappingError::Incomplete {
                        type_name: type_name.to_string(),
                        operation: Operation::SelectAll,
                        missing: "a command",
                    })?,
            ),
            Some(criteria) => (
                Operation::SelectFor,
                map.select_for(criteria.name())
                    .ok_or_else(|| MappingError::UnknownCriteria {
                        type_name: type_name.to_string(),
                        criteria: criteria.name().to_string(),
                    })?,
            ),
        };
        let (parameters, fields) = command_lists(type_name, operation, command)?;
        let bound = match criteria {
            Some(criteria) => bind_criteria(criteria, parameters)?,
            None => bind_none(parameters)?,
        };

        let outcome = self
            .executor
            .execute(&self.request(command, &command.text, &bound, None))?;
        self.check_read_count(type_name, operation, command, &outcome)?;

        let mut records = Vec::with_capacity(outcome.rows.len());
        for row in &outcome.rows {
            records.push(self.materialize(type_name, row, fields)?);
        }
        debug!(
            "event=query module=engine status=ok type={type_name} operation={operation} rows={}",
            records.len()
        );
        Ok(records)
    }

    /// Creates a loaded record of `type_name` from one result row.
    pub(super) fn materialize(
        &self,
        type_name: &str,
        row: &ResultRow,
        fields: &[FieldDescriptor],
    ) -> EngineResult<Record> {
        let mut record = self.registry.instantiate(type_name)?;
        apply_row(&mut record, row, fields)?;
        *record.lifecycle_mut() = Lifecycle::loaded();
        Ok(record)
    }

    /// Reads have no conflicting-writer outcome: any count mismatch is fatal.
    pub(super) fn check_read_count(
        &self,
        type_name: &str,
        operation: Operation,
        command: &CommandDescriptor,
        outcome: &ExecOutcome,
    ) -> EngineResult<()> {
        if outcome.affected_rows == command.expected_rows_affected {
            return Ok(());
        }
        Err(EngineError::DataIntegrity {
            type_name: type_name.to_string(),
            operation,
            expected: command.expected_rows_affected,
            actual: outcome.affected_rows,
        })
    }
}
