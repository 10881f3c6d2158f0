//! Statement execution boundary.
//!
//! # Responsibility
//! - Define the executor contract the engines run statements through.
//! - Provide the SQLite executor and descriptor-driven binding helpers.
//!
//! # Invariants
//! - Executors never open, commit or roll back transactions.
//! - Result rows are returned as ordered column-name/value pairs.

use crate::db::DbError;
use crate::mapping::StatementKind;
use rusqlite::types::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

pub mod binding;
mod sqlite;

pub use binding::BindError;
pub use sqlite::SqliteExecutor;

pub type ExecResult<T> = Result<T, ExecError>;

/// Errors raised by a statement executor.
#[derive(Debug)]
pub enum ExecError {
    Db(DbError),
    /// The backend cannot run this kind of statement.
    UnsupportedStatementKind(StatementKind),
    /// A bound parameter has no placeholder in the statement text.
    UnknownParameter(String),
}

impl Display for ExecError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::UnsupportedStatementKind(kind) => {
                write!(f, "statement kind {kind:?} is not supported by this executor")
            }
            Self::UnknownParameter(name) => {
                write!(f, "statement has no placeholder for parameter `{name}`")
            }
        }
    }
}

impl Error for ExecError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::UnsupportedStatementKind(_) => None,
            Self::UnknownParameter(_) => None,
        }
    }
}

impl From<DbError> for ExecError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for ExecError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Input value for one statement placeholder.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParameter {
    /// Placeholder including its prefix, e.g. `:id`.
    pub placeholder: String,
    pub value: Value,
}

/// One statement execution as handed to an executor.
#[derive(Debug, Clone)]
pub struct StatementRequest<'a> {
    pub kind: StatementKind,
    pub text: &'a str,
    pub parameters: &'a [BoundParameter],
    pub timeout: Duration,
    pub prepare: bool,
    /// Stop reading once more than this many rows arrived.
    pub row_limit: Option<usize>,
}

/// One result row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultRow {
    columns: Vec<(String, Value)>,
}

impl ResultRow {
    pub fn new(columns: Vec<(String, Value)>) -> Self {
        Self { columns }
    }

    /// Returns the value of the first column named `column`.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Rows read back plus the affected-row count reported by the store.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecOutcome {
    pub rows: Vec<ResultRow>,
    /// Zero for read-only statements.
    pub affected_rows: u64,
}

/// Contract for running parameterized statements on a unit of work.
pub trait StatementExecutor {
    fn execute(&self, request: &StatementRequest<'_>) -> ExecResult<ExecOutcome>;
    /// Returns whether a transaction is open on the underlying connection.
    fn in_transaction(&self) -> bool;
}
