//! Database engine for manifold
//!
//! This crate orchestrates the lower layers into the full call surface:
//!
//! - [`Database`]: the handle owning the store, the global lock, the
//!   generation counter and the snapshot pin table
//! - the batched substrate calls: `read`, `write`, `scan`, `size`
//! - [`Txn`]: optimistic transactions and read-only snapshots
//! - the five modalities: [`Blobs`], [`Graph`], [`Docs`], [`Paths`]
//!   and [`Vectors`], all composable inside one transaction

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod database;
pub mod modalities;
pub mod snapshot;
pub mod substrate;

pub use config::DatabaseConfig;
pub use database::{CollectionListing, Database};
pub use modalities::{
    Blobs, DocModification, DocReadOutput, Docs, Edge, EdgeScan, FieldValue, GatherCells,
    GatherColumn, GatherOutput, GistOutput, Graph, MatchOutput, MatchTask, Metric,
    NeighborsOutput, PathReadOutput, Paths, Role, SearchOutput, VectorReadOutput, VertexRecord,
    Vectors,
};
pub use snapshot::Txn;
pub use substrate::{
    Places, ReadMeta, ReadOutput, ScanOutput, ScanTasks, SizeOutput, SizeTasks,
};

// The storage-level vocabulary callers need alongside the engine.
pub use manifold_storage::{CollectionConfig, DropMode, VectorDtype, VectorSpec};
