//! In-memory object model driven by the persistence engine.
//!
//! # Responsibility
//! - Define records, their lifecycle flags and the arena that owns them.
//! - Define the pure lifecycle state machine consulted before and after writes.
//!
//! # Invariants
//! - Only the engine advances lifecycle state; callers only request work
//!   through `mark_modified` / `mark_removed`.

pub mod criteria;
pub mod lifecycle;
pub mod record;
