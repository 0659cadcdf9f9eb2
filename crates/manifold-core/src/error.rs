//! Error types for the manifold engine
//!
//! All public APIs return [`EngineError`] through the [`Result`] alias.
//! `thiserror` provides the `Display` and `Error` implementations.
//!
//! ## Error classes
//!
//! - **Resource**: out-of-memory, I/O failure, persistence corruption.
//! - **Argument**: invalid input that will not succeed on retry
//!   (bad strides, unknown collections, malformed documents, pointers,
//!   patterns, dimension mismatches).
//! - **Policy**: the operation is valid but this backend or configuration
//!   refuses it.
//! - **Concurrency**: commit conflicts, carrying a read/write diagnosis.
//!   These are the only retryable errors.
//! - **Semantic**: not-found on update, already-present on insert, missing
//!   pointer path on patch. Per-row cast collisions in batch reads are
//!   reported as output bits, never as an `EngineError`.

use crate::types::{CollectionHandle, Generation, Key};
use std::io;
use thiserror::Error;

/// Result type alias for all engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// What kind of conflict aborted a commit
///
/// Read conflicts come from watched reads whose observed generation is
/// stale; write conflicts come from write/delete-set entries overwritten
/// since the transaction began.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// A watched read observed a generation that is no longer current
    Read,
    /// A buffered write or delete collides with a newer committed entry
    Write,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictKind::Read => write!(f, "read"),
            ConflictKind::Write => write!(f, "write"),
        }
    }
}

/// Unified error type for all manifold operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// Arena or heap allocation failed or exceeded its configured limit
    #[error("out of memory: requested {requested} bytes, limit {limit}")]
    OutOfMemory {
        /// Bytes the allocation asked for
        requested: usize,
        /// Configured capacity limit
        limit: usize,
    },

    /// I/O failure while persisting or loading collections
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// A persisted file failed structural validation
    #[error("corrupted store: {message}")]
    Corrupted {
        /// What failed to parse
        message: String,
    },

    /// Invalid argument; the call cannot succeed without different input
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// What is wrong with the input
        message: String,
    },

    /// A collection handle that does not name a live collection
    #[error("unknown collection: {handle}")]
    UnknownCollection {
        /// The offending handle
        handle: CollectionHandle,
    },

    /// Creating a named collection that already exists
    #[error("collection already exists: {name}")]
    CollectionExists {
        /// The requested name
        name: String,
    },

    /// A document payload failed to parse in the declared format
    #[error("invalid {format} document: {message}")]
    InvalidDocument {
        /// Format the payload claimed to be
        format: &'static str,
        /// Parser diagnostic
        message: String,
    },

    /// A JSON-Pointer expression failed to parse
    #[error("invalid pointer: {pointer}")]
    InvalidPointer {
        /// The malformed expression
        pointer: String,
    },

    /// A pointer parsed but does not address an existing location
    #[error("pointer path not found: {pointer}")]
    PathNotFound {
        /// The pointer that missed
        pointer: String,
    },

    /// A path pattern failed to compile as a regular expression
    #[error("invalid pattern {pattern:?}: {message}")]
    InvalidPattern {
        /// The offending pattern
        pattern: String,
        /// Compiler diagnostic
        message: String,
    },

    /// Vector payload length disagrees with the collection's dimension
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Declared dimension
        expected: usize,
        /// Supplied dimension
        got: usize,
    },

    /// The operation is recognized but this backend refuses it
    #[error("unsupported: {what}")]
    Unsupported {
        /// What was asked for
        what: String,
    },

    /// A stored value is not encoded for the modality that read it
    #[error("wrong modality: {message}")]
    WrongModality {
        /// Decoder diagnostic
        message: String,
    },

    /// Commit aborted by optimistic validation; buffers remain for retry
    #[error("{kind} conflict on collection {collection} key {key}: observed generation {observed}, current {current}")]
    Conflict {
        /// Read or write diagnosis
        kind: ConflictKind,
        /// Collection of the conflicted entry
        collection: CollectionHandle,
        /// Key of the conflicted entry
        key: Key,
        /// Generation the transaction based itself on
        observed: Generation,
        /// Generation found live at commit time
        current: Generation,
    },

    /// The transaction is not in a state that allows the operation
    #[error("transaction {state}: {message}")]
    TransactionState {
        /// Current state name
        state: &'static str,
        /// Why the operation is refused
        message: String,
    },

    /// Update-style write addressed an absent entry
    #[error("not found: {entity}")]
    NotFound {
        /// Human-readable entity reference
        entity: String,
    },

    /// Insert-style write addressed a present entry
    #[error("already exists: {entity}")]
    AlreadyExists {
        /// Human-readable entity reference
        entity: String,
    },

    /// Invariant violation; indicates a bug in the engine
    #[error("internal error: {message}")]
    Internal {
        /// What broke
        message: String,
    },
}

impl EngineError {
    /// Create an `InvalidArgument` error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        EngineError::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a `Corrupted` error
    pub fn corrupted(message: impl Into<String>) -> Self {
        EngineError::Corrupted {
            message: message.into(),
        }
    }

    /// Create an `Unsupported` error
    pub fn unsupported(what: impl Into<String>) -> Self {
        EngineError::Unsupported { what: what.into() }
    }

    /// Create a `WrongModality` error
    pub fn wrong_modality(message: impl Into<String>) -> Self {
        EngineError::WrongModality {
            message: message.into(),
        }
    }

    /// Create a `NotFound` error
    pub fn not_found(entity: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity: entity.into(),
        }
    }

    /// Create an `AlreadyExists` error
    pub fn already_exists(entity: impl Into<String>) -> Self {
        EngineError::AlreadyExists {
            entity: entity.into(),
        }
    }

    /// Create an `Internal` error
    pub fn internal(message: impl Into<String>) -> Self {
        EngineError::Internal {
            message: message.into(),
        }
    }

    /// Check if this error is a commit conflict
    ///
    /// Conflicts are the only retryable errors: the transaction's buffers
    /// are intact and committing again after the contention clears (or
    /// after `reset()`) may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Conflict { .. })
    }

    /// Check if this error means an entity was absent
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            EngineError::NotFound { .. }
                | EngineError::UnknownCollection { .. }
                | EngineError::PathNotFound { .. }
        )
    }

    /// Check if this error indicates possible data loss or an engine bug
    pub fn is_serious(&self) -> bool {
        matches!(
            self,
            EngineError::Corrupted { .. } | EngineError::Internal { .. }
        )
    }
}
