//! Core types and contracts for manifold
//!
//! This crate defines the foundational vocabulary shared by every layer
//! of the engine:
//!
//! - `Key`, `CollectionHandle`, `Generation` and the reserved sentinels
//! - `EngineError`: the unified error type with conflict diagnosis
//! - `Options`: the per-call flag set
//! - `Strided` / `Contents`: batched argument views, stride zero = repeat
//! - `Arena`: the caller-owned scratch allocator all outputs land in
//! - `document`: the canonical document tree, JSON-Pointer addressing,
//!   RFC 6902 / RFC 7386 modification, and the scalar cast matrix

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arena;
pub mod document;
pub mod error;
pub mod options;
pub mod strided;
pub mod types;

pub use arena::{Arena, Pod};
pub use document::{
    cast_scalar, merge_patch, CastScalar, Casted, DocFormat, DocValue, Patch, PatchOp, Pointer,
    ScalarType,
};
pub use error::{ConflictKind, EngineError, Result};
pub use options::Options;
pub use strided::{Contents, Strided};
pub use types::{
    bits, ColKey, CollectionHandle, Generation, Key, DEGREE_MISSING, EDGE_ID_NONE, KEY_UNKNOWN,
    LENGTH_MISSING,
};
