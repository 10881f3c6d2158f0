//! Descriptor-driven mapping between records and statement values.
//!
//! # Responsibility
//! - Build placeholder bindings from record fields or criteria values.
//! - Copy result columns and output parameters back into records.
//!
//! # Invariants
//! - Only descriptors decide which fields are read or written.
//! - Values are coerced to the declared `DataType` in both directions.

use crate::exec::{BoundParameter, ResultRow};
use crate::mapping::{DataType, FieldDescriptor, ParameterDescriptor, ParameterDirection};
use crate::model::criteria::Criteria;
use crate::model::record::Record;
use rusqlite::types::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type BindResult<T> = Result<T, BindError>;

/// Errors raised while moving values between records and statements.
#[derive(Debug, Clone, PartialEq)]
pub enum BindError {
    /// An input parameter names a field the source does not carry.
    MissingField { parameter: String, field: String },
    /// A field descriptor names a column the row does not carry.
    MissingColumn { column: String },
    /// An output parameter found no column of its name in the result row.
    MissingOutput { parameter: String },
    TypeMismatch {
        parameter: String,
        expected: DataType,
        found: &'static str,
    },
    ValueTooLong {
        parameter: String,
        size: u32,
        actual: usize,
    },
    OutOfRange { parameter: String, message: String },
}

impl Display for BindError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingField { parameter, field } => {
                write!(f, "parameter `{parameter}` is bound to missing field `{field}`")
            }
            Self::MissingColumn { column } => write!(f, "result has no column `{column}`"),
            Self::MissingOutput { parameter } => {
                write!(f, "result carries no value for output parameter `{parameter}`")
            }
            Self::TypeMismatch {
                parameter,
                expected,
                found,
            } => write!(
                f,
                "parameter `{parameter}` expects {expected:?} but received {found}"
            ),
            Self::ValueTooLong {
                parameter,
                size,
                actual,
            } => write!(
                f,
                "parameter `{parameter}` allows {size} but received {actual}"
            ),
            Self::OutOfRange { parameter, message } => {
                write!(f, "parameter `{parameter}` is out of range: {message}")
            }
        }
    }
}

impl Error for BindError {}

/// Binds input parameters from record fields.
pub fn bind_inputs(
    record: &Record,
    parameters: &[ParameterDescriptor],
) -> BindResult<Vec<BoundParameter>> {
    bind_from(parameters, |field| record.get(field))
}

/// Binds input parameters from criteria values.
pub fn bind_criteria(
    criteria: &Criteria,
    parameters: &[ParameterDescriptor],
) -> BindResult<Vec<BoundParameter>> {
    bind_from(parameters, |field| criteria.get(field))
}

/// Binds input parameters when the command has no value source.
pub fn bind_none(parameters: &[ParameterDescriptor]) -> BindResult<Vec<BoundParameter>> {
    bind_from(parameters, |_| None)
}

fn bind_from<'v>(
    parameters: &[ParameterDescriptor],
    lookup: impl Fn(&str) -> Option<&'v Value>,
) -> BindResult<Vec<BoundParameter>> {
    let mut bound = Vec::with_capacity(parameters.len());
    for parameter in parameters {
        if parameter.direction != ParameterDirection::In {
            continue;
        }
        let value = lookup(&parameter.field).ok_or_else(|| BindError::MissingField {
            parameter: parameter.name.clone(),
            field: parameter.field.clone(),
        })?;
        bound.push(BoundParameter {
            placeholder: parameter.placeholder(),
            value: coerce(value, parameter)?,
        });
    }
    Ok(bound)
}

/// Copies every described column into the record; absent columns fail.
pub fn apply_row(record: &mut Record, row: &ResultRow, fields: &[FieldDescriptor]) -> BindResult<()> {
    for descriptor in fields {
        let value = row.get(&descriptor.column).ok_or_else(|| BindError::MissingColumn {
            column: descriptor.column.clone(),
        })?;
        record.set(&descriptor.field, value.clone());
    }
    Ok(())
}

/// Copies described columns present in the row; returns how many matched.
pub fn merge_row(record: &mut Record, row: &ResultRow, fields: &[FieldDescriptor]) -> usize {
    let mut merged = 0;
    for descriptor in fields {
        if let Some(value) = row.get(&descriptor.column) {
            record.set(&descriptor.field, value.clone());
            merged += 1;
        }
    }
    merged
}

/// Copies output parameter values, read from same-named result columns.
pub fn apply_outputs(
    record: &mut Record,
    row: Option<&ResultRow>,
    parameters: &[ParameterDescriptor],
) -> BindResult<()> {
    for parameter in parameters {
        if parameter.direction != ParameterDirection::Out {
            continue;
        }
        let value = row
            .and_then(|row| row.get(parameter.bare_name()))
            .ok_or_else(|| BindError::MissingOutput {
                parameter: parameter.name.clone(),
            })?;
        record.set(&parameter.field, coerce(value, parameter)?);
    }
    Ok(())
}

/// Converts `value` to the parameter's declared type and checks its limits.
pub fn coerce(value: &Value, parameter: &ParameterDescriptor) -> BindResult<Value> {
    if matches!(value, Value::Null) {
        return Ok(Value::Null);
    }

    let mismatch = || BindError::TypeMismatch {
        parameter: parameter.name.clone(),
        expected: parameter.data_type,
        found: value_kind(value),
    };

    match parameter.data_type {
        DataType::Integer => match value {
            Value::Integer(number) => Ok(Value::Integer(*number)),
            _ => Err(mismatch()),
        },
        DataType::Boolean => match value {
            Value::Integer(0) => Ok(Value::Integer(0)),
            Value::Integer(1) => Ok(Value::Integer(1)),
            Value::Integer(other) => Err(BindError::OutOfRange {
                parameter: parameter.name.clone(),
                message: format!("boolean must be 0 or 1, got {other}"),
            }),
            _ => Err(mismatch()),
        },
        DataType::Real => {
            let number = match value {
                Value::Real(number) => *number,
                Value::Integer(number) => *number as f64,
                _ => return Err(mismatch()),
            };
            Ok(Value::Real(fit_real(number, parameter)?))
        }
        DataType::Text => match value {
            Value::Text(text) => {
                check_size(parameter, text.chars().count())?;
                Ok(Value::Text(text.clone()))
            }
            _ => Err(mismatch()),
        },
        DataType::Blob => match value {
            Value::Blob(bytes) => {
                check_size(parameter, bytes.len())?;
                Ok(Value::Blob(bytes.clone()))
            }
            _ => Err(mismatch()),
        },
        DataType::Uuid => match value {
            Value::Text(text) => Uuid::parse_str(text)
                .map(|uuid| Value::Text(uuid.hyphenated().to_string()))
                .map_err(|_| BindError::OutOfRange {
                    parameter: parameter.name.clone(),
                    message: format!("`{text}` is not a uuid"),
                }),
            Value::Blob(bytes) => Uuid::from_slice(bytes)
                .map(|uuid| Value::Text(uuid.hyphenated().to_string()))
                .map_err(|_| BindError::OutOfRange {
                    parameter: parameter.name.clone(),
                    message: format!("{} bytes cannot form a uuid", bytes.len()),
                }),
            _ => Err(mismatch()),
        },
    }
}

fn check_size(parameter: &ParameterDescriptor, actual: usize) -> BindResult<()> {
    match parameter.size {
        Some(size) if actual > size as usize => Err(BindError::ValueTooLong {
            parameter: parameter.name.clone(),
            size,
            actual,
        }),
        _ => Ok(()),
    }
}

fn fit_real(number: f64, parameter: &ParameterDescriptor) -> BindResult<f64> {
    if !number.is_finite() {
        return Err(BindError::OutOfRange {
            parameter: parameter.name.clone(),
            message: format!("{number} is not finite"),
        });
    }

    let scale = parameter.scale.unwrap_or(0);
    let rounded = match parameter.scale {
        Some(scale) => {
            let factor = 10_f64.powi(i32::from(scale));
            (number * factor).round() / factor
        }
        None => number,
    };

    if let Some(precision) = parameter.precision {
        let integer_digits = precision.saturating_sub(scale);
        let limit = 10_f64.powi(i32::from(integer_digits));
        if rounded.abs() >= limit {
            return Err(BindError::OutOfRange {
                parameter: parameter.name.clone(),
                message: format!(
                    "{rounded} exceeds precision {precision} with scale {scale}"
                ),
            });
        }
    }

    Ok(rounded)
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Integer(_) => "integer",
        Value::Real(_) => "real",
        Value::Text(_) => "text",
        Value::Blob(_) => "blob",
    }
}
