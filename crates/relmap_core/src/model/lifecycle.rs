//! Record lifecycle flags and the persist state machine.
//!
//! # Responsibility
//! - Map current lifecycle flags to the operation a persist call must run.
//! - Map a pre-operation state to the state that holds after success.
//!
//! # Invariants
//! - Both functions are pure; only the persist engine applies their results.
//! - A successful Insert/Update/Delete always moves the state forward.

use std::fmt::{Display, Formatter};

/// Persisted state of one record relative to its backing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    /// In-memory values match the stored row (or nothing is pending).
    Consistent,
    /// Caller requested an insert or update.
    Modified,
    /// Caller requested a delete.
    Removed,
    /// The backing row was deleted.
    Obsoleted,
    /// The record reached a state the engine cannot reason about.
    Faulty,
}

/// Operation computed for one engine call. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    None,
    Insert,
    Update,
    Delete,
    SelectAll,
    SelectOne,
    SelectFor,
    SelectId,
    /// Optimistic-concurrency loss: the write touched no row (or several).
    ChangeConflict,
    StateError,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::SelectAll => "select_all",
            Self::SelectOne => "select_one",
            Self::SelectFor => "select_for",
            Self::SelectId => "select_id",
            Self::ChangeConflict => "change_conflict",
            Self::StateError => "state_error",
        }
    }

    /// Returns whether this operation writes to the store.
    pub fn is_write(self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Delete)
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Display for ObjectState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Consistent => "consistent",
            Self::Modified => "modified",
            Self::Removed => "removed",
            Self::Obsoleted => "obsoleted",
            Self::Faulty => "faulty",
        };
        f.write_str(text)
    }
}

/// Lifecycle flags carried by every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifecycle {
    /// True until inserted; reset to true by a delete.
    pub is_new: bool,
    pub state: ObjectState,
}

impl Lifecycle {
    /// Flags for a record that has never been stored.
    pub fn fresh() -> Self {
        Self {
            is_new: true,
            state: ObjectState::Consistent,
        }
    }

    /// Flags for a record materialized from a result row.
    pub fn loaded() -> Self {
        Self {
            is_new: false,
            state: ObjectState::Consistent,
        }
    }

    /// Operation the next persist call would run for these flags.
    pub fn pending_operation(&self) -> Operation {
        operation_before(self.state, self.is_new)
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::fresh()
    }
}

/// Returns the operation required before execution for the given flags.
pub fn operation_before(state: ObjectState, is_new: bool) -> Operation {
    match (state, is_new) {
        (ObjectState::Consistent, _) => Operation::None,
        (ObjectState::Obsoleted, _) => Operation::None,
        (ObjectState::Removed, true) => Operation::None,
        (ObjectState::Removed, false) => Operation::Delete,
        (ObjectState::Modified, true) => Operation::Insert,
        (ObjectState::Modified, false) => Operation::Update,
        (ObjectState::Faulty, _) => Operation::StateError,
    }
}

/// Returns the state that must hold after a successful execution.
pub fn state_after(state: ObjectState) -> ObjectState {
    match state {
        ObjectState::Modified => ObjectState::Consistent,
        ObjectState::Removed => ObjectState::Obsoleted,
        ObjectState::Consistent => ObjectState::Consistent,
        ObjectState::Obsoleted => ObjectState::Obsoleted,
        ObjectState::Faulty => ObjectState::Faulty,
    }
}

#[cfg(test)]
mod tests {
    use super::{operation_before, state_after, Lifecycle, ObjectState, Operation};

    #[test]
    fn operation_table_matches_lifecycle_rules() {
        let cases = [
            (ObjectState::Consistent, true, Operation::None),
            (ObjectState::Consistent, false, Operation::None),
            (ObjectState::Obsoleted, true, Operation::None),
            (ObjectState::Obsoleted, false, Operation::None),
            (ObjectState::Removed, true, Operation::None),
            (ObjectState::Removed, false, Operation::Delete),
            (ObjectState::Modified, true, Operation::Insert),
            (ObjectState::Modified, false, Operation::Update),
            (ObjectState::Faulty, true, Operation::StateError),
            (ObjectState::Faulty, false, Operation::StateError),
        ];
        for (state, is_new, expected) in cases {
            assert_eq!(
                operation_before(state, is_new),
                expected,
                "state={state} is_new={is_new}"
            );
        }
    }

    #[test]
    fn state_after_advances_pending_states_only() {
        assert_eq!(state_after(ObjectState::Modified), ObjectState::Consistent);
        assert_eq!(state_after(ObjectState::Removed), ObjectState::Obsoleted);
        assert_eq!(state_after(ObjectState::Consistent), ObjectState::Consistent);
        assert_eq!(state_after(ObjectState::Obsoleted), ObjectState::Obsoleted);
        assert_eq!(state_after(ObjectState::Faulty), ObjectState::Faulty);
    }

    #[test]
    fn fresh_and_loaded_flags_have_no_pending_work() {
        assert_eq!(Lifecycle::fresh().pending_operation(), Operation::None);
        assert_eq!(Lifecycle::loaded().pending_operation(), Operation::None);
        assert!(Lifecycle::default().is_new);
        assert!(!Lifecycle::loaded().is_new);
    }
}
