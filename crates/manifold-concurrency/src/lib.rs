//! Optimistic concurrency control for manifold
//!
//! This crate implements the transaction manager's data structures and
//! the two halves of commit:
//!
//! - [`Transaction`]: read/write/delete-set buffering with
//!   read-your-writes semantics and the watch policy
//! - [`validation`]: commit-time conflict detection with read/write
//!   diagnosis
//! - [`commit`]: applying validated buffers at a fresh generation
//!
//! The engine owns the lock and the generation counter; this crate only
//! ever sees the store through references the engine hands it.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod commit;
pub mod transaction;
pub mod validation;

pub use commit::{apply_transaction, CommitOutcome};
pub use transaction::{Buffered, Transaction, TransactionStatus};
pub use validation::{
    validate_read_set, validate_transaction, validate_write_set, Conflict, ValidationResult,
};
