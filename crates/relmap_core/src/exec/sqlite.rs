//! SQLite statement executor.
//!
//! # Responsibility
//! - Run one request on a borrowed connection and collect its rows.
//! - Report affected rows for data-modifying statements.
//!
//! # Invariants
//! - The connection's transaction state is observed, never changed.
//! - Read-only statements always report zero affected rows.

use crate::exec::{
    BoundParameter, ExecError, ExecOutcome, ExecResult, ResultRow, StatementExecutor,
    StatementRequest,
};
use crate::mapping::StatementKind;
use log::trace;
use rusqlite::types::Value;
use rusqlite::{Connection, Statement};
use std::time::Duration;

/// Executor bound to one SQLite connection or open transaction.
///
/// Pass `&tx` (a `rusqlite::Transaction`) to enlist statements in it.
pub struct SqliteExecutor<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteExecutor<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &'conn Connection {
        self.conn
    }
}

impl StatementExecutor for SqliteExecutor<'_> {
    fn execute(&self, request: &StatementRequest<'_>) -> ExecResult<ExecOutcome> {
        if request.kind != StatementKind::Text {
            return Err(ExecError::UnsupportedStatementKind(request.kind));
        }

        let previous_timeout: i64 =
            self.conn
                .query_row("PRAGMA busy_timeout;", [], |row| row.get(0))?;
        self.conn.busy_timeout(request.timeout)?;
        trace!(
            "event=statement_execute module=exec status=start params={} prepare={} in_transaction={}",
            request.parameters.len(),
            request.prepare,
            self.in_transaction()
        );

        let outcome = if request.prepare {
            self.conn
                .prepare_cached(request.text)
                .map_err(ExecError::from)
                .and_then(|mut stmt| run_statement(self.conn, &mut stmt, request))
        } else {
            self.conn
                .prepare(request.text)
                .map_err(ExecError::from)
                .and_then(|mut stmt| run_statement(self.conn, &mut stmt, request))
        };

        // The connection keeps the busy timeout it was opened with.
        let previous_timeout = Duration::from_millis(u64::try_from(previous_timeout).unwrap_or(0));
        self.conn.busy_timeout(previous_timeout)?;
        outcome
    }

    fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }
}

fn run_statement(
    conn: &Connection,
    stmt: &mut Statement<'_>,
    request: &StatementRequest<'_>,
) -> ExecResult<ExecOutcome> {
    bind_all(stmt, request.parameters)?;

    let column_names: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect();
    let readonly = stmt.readonly();

    let mut collected = Vec::new();
    {
        let mut rows = stmt.raw_query();
        while let Some(row) = rows.next()? {
            let mut columns = Vec::with_capacity(column_names.len());
            for (index, name) in column_names.iter().enumerate() {
                columns.push((name.clone(), row.get::<_, Value>(index)?));
            }
            collected.push(ResultRow::new(columns));
            if matches!(request.row_limit, Some(limit) if collected.len() > limit) {
                break;
            }
        }
    }

    let affected_rows = if readonly { 0 } else { conn.changes() as u64 };
    Ok(ExecOutcome {
        rows: collected,
        affected_rows,
    })
}

fn bind_all(stmt: &mut Statement<'_>, parameters: &[BoundParameter]) -> ExecResult<()> {
    for parameter in parameters {
        let index = stmt
            .parameter_index(&parameter.placeholder)?
            .ok_or_else(|| ExecError::UnknownParameter(parameter.placeholder.clone()))?;
        stmt.raw_bind_parameter(index, &parameter.value)?;
    }
    Ok(())
}
