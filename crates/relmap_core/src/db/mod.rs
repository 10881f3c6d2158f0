//! SQLite store bootstrap.
//!
//! # Responsibility
//! - Open and configure SQLite connections used as units of work.
//!
//! # Invariants
//! - Returned connections enforce foreign keys; cascade ordering relies on it.
//! - Schema management stays outside this crate.

use std::error::Error;
use std::fmt::{Display, Formatter};

mod open;

pub use open::{open_store, open_store_in_memory};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// The SQLite build ignored `PRAGMA foreign_keys = ON`.
    ForeignKeysUnavailable,
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::ForeignKeysUnavailable => {
                write!(f, "sqlite connection does not enforce foreign keys")
            }
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::ForeignKeysUnavailable => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
