//! Persist, query and restore engines.
//!
//! # Responsibility
//! - Drive lifecycle decisions, statement execution and cascades for records.
//! - Materialize records from result rows through registered factories.
//!
//! # Invariants
//! - Exactly one statement runs per record per call, plus at most one
//!   identity fetch after an insert.
//! - Optimistic-concurrency loss is returned as `Operation::ChangeConflict`,
//!   never as an error.
//! - Transactions are owned by the caller; engines never commit or roll back.

use crate::config::EngineConfig;
use crate::exec::{BindError, BoundParameter, ExecError, StatementExecutor, StatementRequest};
use crate::mapping::{
    CommandDescriptor, FieldDescriptor, MappingError, MappingRegistry, ParameterDescriptor,
};
use crate::model::lifecycle::{ObjectState, Operation};
use crate::model::record::{RecordId, UnknownRecord};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

mod persist;
mod query;
mod restore;

pub use restore::IncludePlan;

pub type EngineResult<T> = Result<T, EngineError>;

/// Error taxonomy used to decide how callers react to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Deployment/build defect in mappings or usage; never retried.
    Configuration,
    /// A statement or mapping broke its own contract.
    Integrity,
    /// A read path observed a row count it did not declare.
    DataIntegrity,
    /// The backing store failed.
    Store,
}

#[derive(Debug)]
pub enum EngineError {
    Mapping(MappingError),
    Bind(BindError),
    Exec(ExecError),
    UnknownRecord(RecordId),
    /// A command promised at most one row and returned more.
    MultipleRowsReturned {
        type_name: String,
        operation: Operation,
    },
    /// A cascaded child produced an operation its parent does not allow.
    CascadeViolation {
        parent_type: String,
        parent_operation: Operation,
        child_type: String,
        child_operation: Operation,
    },
    /// A record was reached again while its own persist was in progress.
    CascadeCycle { record: RecordId },
    CascadeTooDeep { max_depth: usize },
    /// A child record does not have the relationship's declared type.
    ChildTypeMismatch {
        property: String,
        expected: String,
        found: String,
    },
    /// Lifecycle flags are unusable or failed to advance.
    StateError {
        type_name: String,
        state: ObjectState,
    },
    /// An identity fetch needs an open transaction on the connection.
    NoAmbientTransaction { type_name: String },
    /// The identity statement returned no row.
    IdentityNotFound { type_name: String },
    /// A read reported a different affected-row count than declared.
    DataIntegrity {
        type_name: String,
        operation: Operation,
        expected: u64,
        actual: u64,
    },
    InvalidInclude(String),
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Mapping(_)
            | Self::UnknownRecord(_)
            | Self::ChildTypeMismatch { .. }
            | Self::NoAmbientTransaction { .. }
            | Self::InvalidInclude(_) => ErrorClass::Configuration,
            Self::Bind(_)
            | Self::MultipleRowsReturned { .. }
            | Self::CascadeViolation { .. }
            | Self::CascadeCycle { .. }
            | Self::CascadeTooDeep { .. }
            | Self::StateError { .. }
            | Self::IdentityNotFound { .. } => ErrorClass::Integrity,
            Self::DataIntegrity { .. } => ErrorClass::DataIntegrity,
            Self::Exec(_) => ErrorClass::Store,
        }
    }
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mapping(err) => write!(f, "{err}"),
            Self::Bind(err) => write!(f, "{err}"),
            Self::Exec(err) => write!(f, "{err}"),
            Self::UnknownRecord(id) => write!(f, "record {id} is not part of the object graph"),
            Self::MultipleRowsReturned {
                type_name,
                operation,
            } => write!(
                f,
                "{operation} on `{type_name}` returned more than one row"
            ),
            Self::CascadeViolation {
                parent_type,
                parent_operation,
                child_type,
                child_operation,
            } => write!(
                f,
                "{parent_operation} on `{parent_type}` cascaded to `{child_type}` which returned {child_operation}"
            ),
            Self::CascadeCycle { record } => {
                write!(f, "cascade reached record {record} while it was being persisted")
            }
            Self::CascadeTooDeep { max_depth } => {
                write!(f, "cascade exceeded the maximum depth of {max_depth}")
            }
            Self::ChildTypeMismatch {
                property,
                expected,
                found,
            } => write!(
                f,
                "relationship `{property}` expects `{expected}` children but holds `{found}`"
            ),
            Self::StateError { type_name, state } => {
                write!(f, "`{type_name}` cannot be persisted from state {state}")
            }
            Self::NoAmbientTransaction { type_name } => write!(
                f,
                "inserting `{type_name}` fetches identity values and requires an open transaction"
            ),
            Self::IdentityNotFound { type_name } => {
                write!(f, "identity fetch for `{type_name}` returned no row")
            }
            Self::DataIntegrity {
                type_name,
                operation,
                expected,
                actual,
            } => write!(
                f,
                "{operation} on `{type_name}` reported {actual} affected rows, expected {expected}"
            ),
            Self::InvalidInclude(path) => write!(f, "invalid include path `{path}`"),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Mapping(err) => Some(err),
            Self::Bind(err) => Some(err),
            Self::Exec(err) => Some(err),
            _ => None,
        }
    }
}

impl From<MappingError> for EngineError {
    fn from(value: MappingError) -> Self {
        Self::Mapping(value)
    }
}

impl From<BindError> for EngineError {
    fn from(value: BindError) -> Self {
        Self::Bind(value)
    }
}

impl From<ExecError> for EngineError {
    fn from(value: ExecError) -> Self {
        Self::Exec(value)
    }
}

impl From<UnknownRecord> for EngineError {
    fn from(value: UnknownRecord) -> Self {
        Self::UnknownRecord(value.0)
    }
}

/// Persistence engine bound to one registry and one unit of work.
pub struct Engine<'a, E: StatementExecutor> {
    registry: &'a MappingRegistry,
    executor: &'a E,
    config: EngineConfig,
}

impl<'a, E: StatementExecutor> Engine<'a, E> {
    pub fn new(registry: &'a MappingRegistry, executor: &'a E) -> Self {
        Self::with_config(registry, executor, EngineConfig::default())
    }

    pub fn with_config(registry: &'a MappingRegistry, executor: &'a E, config: EngineConfig) -> Self {
        Self {
            registry,
            executor,
            config,
        }
    }

    pub fn registry(&self) -> &'a MappingRegistry {
        self.registry
    }

    fn timeout_for(&self, command: &CommandDescriptor) -> Duration {
        command
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.default_timeout())
    }

    fn request<'r>(
        &self,
        command: &CommandDescriptor,
        text: &'r str,
        parameters: &'r [BoundParameter],
        row_limit: Option<usize>,
    ) -> StatementRequest<'r> {
        StatementRequest {
            kind: command.kind,
            text,
            parameters,
            timeout: self.timeout_for(command),
            prepare: command.prepare,
            row_limit,
        }
    }
}

/// Returns the parameter and field lists of a usable command.
fn command_lists<'c>(
    type_name: &str,
    operation: Operation,
    command: &'c CommandDescriptor,
) -> EngineResult<(&'c [ParameterDescriptor], &'c [FieldDescriptor])> {
    let parameters = command
        .parameters
        .as_deref()
        .ok_or_else(|| MappingError::Incomplete {
            type_name: type_name.to_string(),
            operation,
            missing: "parameter descriptors",
        })?;
    let fields = command
        .fields
        .as_deref()
        .ok_or_else(|| MappingError::Incomplete {
            type_name: type_name.to_string(),
            operation,
            missing: "field descriptors",
        })?;
    Ok((parameters, fields))
}
