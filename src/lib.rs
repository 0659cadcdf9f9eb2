//! manifold: a multi-modal transactional key-value engine
//!
//! One ACID substrate, four coherent views over it. Binary blobs,
//! hierarchical documents, labeled directed multi-graphs and
//! fixed-dimension vectors share a single key space, collection
//! namespace, transaction manager and snapshot mechanism, so one
//! transaction can atomically touch documents, graph edges and raw
//! payloads.
//!
//! ```
//! use manifold::{Database, Options};
//!
//! let db = Database::in_memory();
//! db.put(None, manifold::CollectionHandle::DEFAULT, 42, Some(b"answer")).unwrap();
//!
//! let mut txn = db.begin_transaction().unwrap();
//! db.put(Some(&mut txn), manifold::CollectionHandle::DEFAULT, 43, Some(b"later")).unwrap();
//! db.commit(&mut txn, Options::NONE).unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use manifold_core::{
    bits, cast_scalar, merge_patch, Arena, CastScalar, Casted, ColKey, CollectionHandle,
    ConflictKind, Contents, DocFormat, DocValue, EngineError, Generation, Key, Options, Patch,
    PatchOp, Pointer, Result, ScalarType, Strided, DEGREE_MISSING, EDGE_ID_NONE, KEY_UNKNOWN,
    LENGTH_MISSING,
};

pub use manifold_engine::{
    Blobs, CollectionConfig, CollectionListing, Database, DatabaseConfig, DocModification,
    DocReadOutput, Docs, DropMode, Edge, EdgeScan, FieldValue, GatherCells, GatherColumn,
    GatherOutput, GistOutput, Graph, MatchOutput, MatchTask, Metric, NeighborsOutput,
    PathReadOutput, Paths, Places, ReadMeta, ReadOutput, Role, ScanOutput, ScanTasks, SearchOutput,
    SizeOutput, SizeTasks, Txn, VectorDtype, VectorReadOutput, VectorSpec, Vectors, VertexRecord,
};

pub use manifold_concurrency::{CommitOutcome, TransactionStatus};
