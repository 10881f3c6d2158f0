//! Declarative statement and relationship descriptors.
//!
//! # Responsibility
//! - Carry statement text, parameter bindings and result-field bindings for
//!   every command of one mapped type.
//! - Declare relationships that drive persist cascades and restore includes.
//!
//! # Invariants
//! - Statement text is opaque to this crate; only placeholders are resolved.
//! - `parameters` / `fields` set to `None` mark an unusable command; an empty
//!   list is a valid command without bindings.

use crate::mapping::{MappingError, MappingResult};
use crate::model::lifecycle::Operation;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

const PLACEHOLDER_PREFIXES: [char; 3] = [':', '@', '$'];

/// How the statement text is handed to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    #[default]
    Text,
    StoredProcedure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterDirection {
    #[default]
    In,
    /// Read back from the result row after execution.
    Out,
}

/// Declared storage type of one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Integer,
    Real,
    Text,
    Blob,
    /// Stored as integer `0` / `1`.
    Boolean,
    /// Stored as hyphenated lowercase text.
    Uuid,
}

/// Binding between one statement placeholder and one record field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    /// Placeholder name; a missing `:`/`@`/`$` prefix defaults to `:`.
    pub name: String,
    #[serde(default)]
    pub direction: ParameterDirection,
    pub data_type: DataType,
    /// Maximum characters (text) or bytes (blob).
    #[serde(default)]
    pub size: Option<u32>,
    /// Maximum significant digits for real values.
    #[serde(default)]
    pub precision: Option<u8>,
    /// Digits kept after the decimal point for real values.
    #[serde(default)]
    pub scale: Option<u8>,
    pub field: String,
}

impl ParameterDescriptor {
    pub fn input(name: &str, data_type: DataType, field: &str) -> Self {
        Self {
            name: name.to_string(),
            direction: ParameterDirection::In,
            data_type,
            size: None,
            precision: None,
            scale: None,
            field: field.to_string(),
        }
    }

    pub fn output(name: &str, data_type: DataType, field: &str) -> Self {
        Self {
            direction: ParameterDirection::Out,
            ..Self::input(name, data_type, field)
        }
    }

    /// Placeholder as it appears in statement text, prefix included.
    pub fn placeholder(&self) -> String {
        if self.name.starts_with(PLACEHOLDER_PREFIXES) {
            self.name.clone()
        } else {
            format!(":{}", self.name)
        }
    }

    /// Name without placeholder prefix; used as the result column of outputs.
    pub fn bare_name(&self) -> &str {
        self.name.trim_start_matches(PLACEHOLDER_PREFIXES)
    }
}

/// Binding between one result column and one record field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub column: String,
    pub field: String,
}

impl FieldDescriptor {
    pub fn new(column: &str, field: &str) -> Self {
        Self {
            column: column.to_string(),
            field: field.to_string(),
        }
    }

    /// Column and field share one name.
    pub fn same(name: &str) -> Self {
        Self::new(name, name)
    }
}

/// One statement with its bindings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDescriptor {
    #[serde(default)]
    pub kind: StatementKind,
    pub text: String,
    #[serde(default)]
    pub parameters: Option<Vec<ParameterDescriptor>>,
    #[serde(default)]
    pub fields: Option<Vec<FieldDescriptor>>,
    /// Follow-up statement returning store-generated keys after an insert.
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Reuse the connection's prepared-statement cache.
    #[serde(default)]
    pub prepare: bool,
    /// Affected-row count a read command must report.
    #[serde(default)]
    pub expected_rows_affected: u64,
}

impl CommandDescriptor {
    /// Creates a text command with empty parameter and field lists.
    pub fn text(text: &str) -> Self {
        Self {
            kind: StatementKind::Text,
            text: text.to_string(),
            parameters: Some(Vec::new()),
            fields: Some(Vec::new()),
            identity: None,
            timeout_ms: None,
            prepare: false,
            expected_rows_affected: 0,
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<ParameterDescriptor>) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub fn with_fields(mut self, fields: Vec<FieldDescriptor>) -> Self {
        self.fields = Some(fields);
        self
    }

    pub fn with_identity(mut self, statement: &str) -> Self {
        self.identity = Some(statement.to_string());
        self
    }

    fn validate(&self, type_name: &str, label: &str) -> MappingResult<()> {
        if self.text.trim().is_empty() {
            return Err(invalid(type_name, format!("{label} has empty statement text")));
        }
        if matches!(&self.identity, Some(identity) if identity.trim().is_empty()) {
            return Err(invalid(
                type_name,
                format!("{label} has empty identity statement"),
            ));
        }

        if let Some(parameters) = &self.parameters {
            let mut seen = BTreeSet::new();
            for parameter in parameters {
                check_identifier(type_name, label, "parameter", parameter.bare_name())?;
                check_identifier(type_name, label, "parameter field", &parameter.field)?;
                if !seen.insert(parameter.bare_name()) {
                    return Err(invalid(
                        type_name,
                        format!("{label} declares parameter `{}` twice", parameter.name),
                    ));
                }
                if let (Some(precision), Some(scale)) = (parameter.precision, parameter.scale) {
                    if scale > precision {
                        return Err(invalid(
                            type_name,
                            format!(
                                "{label} parameter `{}` has scale {scale} above precision {precision}",
                                parameter.name
                            ),
                        ));
                    }
                }
            }
        }

        if let Some(fields) = &self.fields {
            for field in fields {
                check_identifier(type_name, label, "column", &field.column)?;
                check_identifier(type_name, label, "field", &field.field)?;
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    /// Parent side of one-to-many; the only kind cascades interpret.
    OneToMany,
    ManyToOne,
}

/// Declared link from a parent type to a child collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDescriptor {
    pub kind: RelationshipKind,
    /// Collection name on the parent record.
    pub property: String,
    pub child_type: String,
    /// Child field holding the parent's key.
    pub foreign_key: String,
    /// Parent field referenced by `foreign_key`.
    #[serde(default = "default_principal_key")]
    pub principal_key: String,
    /// Select-for command on `child_type` used to load the collection.
    #[serde(default)]
    pub load_command: Option<String>,
}

fn default_principal_key() -> String {
    "id".to_string()
}

impl RelationshipDescriptor {
    pub fn one_to_many(property: &str, child_type: &str, foreign_key: &str) -> Self {
        Self {
            kind: RelationshipKind::OneToMany,
            property: property.to_string(),
            child_type: child_type.to_string(),
            foreign_key: foreign_key.to_string(),
            principal_key: default_principal_key(),
            load_command: None,
        }
    }

    pub fn loaded_with(mut self, command: &str) -> Self {
        self.load_command = Some(command.to_string());
        self
    }
}

/// All commands and relationships of one mapped type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceMap {
    pub type_name: String,
    #[serde(default)]
    pub insert: Option<CommandDescriptor>,
    #[serde(default)]
    pub update: Option<CommandDescriptor>,
    #[serde(default)]
    pub delete: Option<CommandDescriptor>,
    #[serde(default)]
    pub select_all: Option<CommandDescriptor>,
    #[serde(default)]
    pub select_one: Option<CommandDescriptor>,
    #[serde(default)]
    pub select_for: BTreeMap<String, CommandDescriptor>,
    #[serde(default)]
    pub relationships: Vec<RelationshipDescriptor>,
}

impl DataSourceMap {
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            insert: None,
            update: None,
            delete: None,
            select_all: None,
            select_one: None,
            select_for: BTreeMap::new(),
            relationships: Vec::new(),
        }
    }

    /// Returns the fixed command serving `operation`, if declared.
    pub fn command(&self, operation: Operation) -> Option<&CommandDescriptor> {
        match operation {
            Operation::Insert => self.insert.as_ref(),
            Operation::Update => self.update.as_ref(),
            Operation::Delete => self.delete.as_ref(),
            Operation::SelectAll => self.select_all.as_ref(),
            Operation::SelectOne => self.select_one.as_ref(),
            _ => None,
        }
    }

    pub fn select_for(&self, name: &str) -> Option<&CommandDescriptor> {
        self.select_for.get(name)
    }

    /// Relationships interpreted by cascades, in declaration order.
    pub fn one_to_many(&self) -> impl Iterator<Item = &RelationshipDescriptor> {
        self.relationships
            .iter()
            .filter(|relationship| relationship.kind == RelationshipKind::OneToMany)
    }

    pub fn one_to_many_named(&self, property: &str) -> Option<&RelationshipDescriptor> {
        self.one_to_many()
            .find(|relationship| relationship.property == property)
    }

    /// Validates names and structural rules of every descriptor.
    ///
    /// Missing commands and missing descriptor lists are not rejected here;
    /// they are reported as `MappingError::Incomplete` when used.
    pub fn validate(&self) -> MappingResult<()> {
        let type_name = self.type_name.as_str();
        if !IDENTIFIER_RE.is_match(type_name) {
            return Err(invalid(type_name, "type name is not an identifier".to_string()));
        }

        let fixed = [
            ("insert", &self.insert),
            ("update", &self.update),
            ("delete", &self.delete),
            ("select_all", &self.select_all),
            ("select_one", &self.select_one),
        ];
        for (label, command) in fixed {
            if let Some(command) = command {
                command.validate(type_name, label)?;
            }
        }
        for (name, command) in &self.select_for {
            check_identifier(type_name, "select_for", "command name", name)?;
            command.validate(type_name, &format!("select_for `{name}`"))?;
        }

        let mut properties = BTreeSet::new();
        for relationship in &self.relationships {
            check_identifier(type_name, "relationship", "property", &relationship.property)?;
            check_identifier(type_name, "relationship", "child type", &relationship.child_type)?;
            check_identifier(type_name, "relationship", "foreign key", &relationship.foreign_key)?;
            check_identifier(
                type_name,
                "relationship",
                "principal key",
                &relationship.principal_key,
            )?;
            if !properties.insert(relationship.property.as_str()) {
                return Err(invalid(
                    type_name,
                    format!("relationship `{}` declared twice", relationship.property),
                ));
            }
        }

        Ok(())
    }
}

fn check_identifier(type_name: &str, label: &str, what: &str, value: &str) -> MappingResult<()> {
    if IDENTIFIER_RE.is_match(value) {
        return Ok(());
    }
    Err(invalid(
        type_name,
        format!("{label} {what} `{value}` is not an identifier"),
    ))
}

fn invalid(type_name: &str, message: String) -> MappingError {
    MappingError::Invalid {
        type_name: type_name.to_string(),
        message,
    }
}
