//! Mapping descriptors and their registry.
//!
//! # Responsibility
//! - Describe, per mapped type, the statements used to write and read it.
//! - Resolve a type name to its data source map and record factory.
//!
//! # Invariants
//! - Maps are immutable once registered and shared through `Arc`.
//! - Every missing or malformed piece of mapping is a configuration defect,
//!   surfaced as `MappingError` and never retried.

use crate::model::lifecycle::Operation;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod descriptor;
pub mod registry;

pub use descriptor::{
    CommandDescriptor, DataSourceMap, DataType, FieldDescriptor, ParameterDescriptor,
    ParameterDirection, RelationshipDescriptor, RelationshipKind, StatementKind,
};
pub use registry::{MappingRegistry, RecordFactory};

pub type MappingResult<T> = Result<T, MappingError>;

/// Configuration defects found while resolving or validating mappings.
#[derive(Debug)]
pub enum MappingError {
    /// No data source map is registered for the type.
    NotFound(String),
    /// The map lacks a command or one of its descriptor lists.
    Incomplete {
        type_name: String,
        operation: Operation,
        missing: &'static str,
    },
    /// No select-for command carries the criteria's name.
    UnknownCriteria {
        type_name: String,
        criteria: String,
    },
    /// No one-to-many relationship is declared under the property.
    UnknownRelationship {
        type_name: String,
        property: String,
    },
    /// A map for this type is already registered.
    Duplicate(String),
    /// A descriptor violates a structural rule.
    Invalid { type_name: String, message: String },
    /// A registered factory produced a record of another type.
    FactoryMismatch { expected: String, found: String },
    /// A mapping document could not be parsed.
    Json(serde_json::Error),
}

impl Display for MappingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(type_name) => write!(f, "no mapping registered for `{type_name}`"),
            Self::Incomplete {
                type_name,
                operation,
                missing,
            } => write!(
                f,
                "mapping for `{type_name}` is incomplete: {operation} lacks {missing}"
            ),
            Self::UnknownCriteria {
                type_name,
                criteria,
            } => write!(
                f,
                "mapping for `{type_name}` has no select-for command `{criteria}`"
            ),
            Self::UnknownRelationship {
                type_name,
                property,
            } => write!(
                f,
                "mapping for `{type_name}` has no one-to-many relationship `{property}`"
            ),
            Self::Duplicate(type_name) => {
                write!(f, "mapping for `{type_name}` is already registered")
            }
            Self::Invalid { type_name, message } => {
                write!(f, "invalid mapping for `{type_name}`: {message}")
            }
            Self::FactoryMismatch { expected, found } => write!(
                f,
                "factory for `{expected}` produced a record of type `{found}`"
            ),
            Self::Json(err) => write!(f, "invalid mapping document: {err}"),
        }
    }
}

impl Error for MappingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for MappingError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}
