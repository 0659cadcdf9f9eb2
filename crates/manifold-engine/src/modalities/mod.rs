//! Typed views over the shared substrate
//!
//! Each modality is a stateless facade over a [`crate::Database`]
//! clone: blobs pass the substrate through, graphs encode adjacency
//! runs, documents encode the canonical tree, paths hash variable-length
//! string keys onto the integer key space, and vectors pack
//! fixed-dimension numeric rows. They all share the key space, the
//! collection namespace and the transaction manager, so one transaction
//! can atomically touch several modalities.

pub mod blobs;
pub mod docs;
pub mod graph;
pub mod paths;
pub mod vectors;

pub use blobs::Blobs;
pub use docs::{
    DocModification, DocReadOutput, Docs, FieldValue, GatherCells, GatherColumn, GatherOutput,
    GistOutput,
};
pub use graph::{Edge, EdgeScan, Graph, NeighborsOutput, Role, VertexRecord};
pub use paths::{MatchOutput, MatchTask, PathReadOutput, Paths};
pub use vectors::{Metric, SearchOutput, VectorReadOutput, Vectors};
