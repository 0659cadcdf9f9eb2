//! Storage substrate for manifold
//!
//! This crate owns the in-memory shape of a database: versioned value
//! cells, ordered collections, the collection registry with its drop
//! modes, and the one-file-per-collection disk image. It performs no
//! locking of its own; the engine wraps a [`Store`] in the database's
//! readers-writer lock and the concurrency crate mutates it only at
//! commit time.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cell;
pub mod collection;
pub mod persist;
pub mod store;

pub use cell::{ValueCell, VersionEntry};
pub use collection::{Collection, CollectionConfig, RangeStats, VectorDtype, VectorSpec, ENTRY_OVERHEAD};
pub use store::{DropMode, Store};
