//! Relational mapping persistence engine.
//! Maps in-memory record graphs onto SQL statements declared per type.

pub mod config;
pub mod db;
pub mod engine;
pub mod exec;
pub mod logging;
pub mod mapping;
pub mod model;

pub use config::{ConfigError, EngineConfig, LoggingConfig};
pub use db::{open_store, open_store_in_memory, DbError};
pub use engine::{Engine, EngineError, EngineResult, ErrorClass, IncludePlan};
pub use exec::{BindError, ExecError, SqliteExecutor, StatementExecutor};
pub use logging::{active_logging, init_logging, LoggingError};
pub use mapping::{
    CommandDescriptor, DataSourceMap, DataType, FieldDescriptor, MappingError, MappingRegistry,
    ParameterDescriptor, ParameterDirection, RecordFactory, RelationshipDescriptor,
    RelationshipKind, StatementKind,
};
pub use model::criteria::Criteria;
pub use model::lifecycle::{operation_before, state_after, Lifecycle, ObjectState, Operation};
pub use model::record::{ObjectGraph, Record, RecordId};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
