//! Document modality
//!
//! Values are canonical [`DocValue`] trees stored in their compact
//! binary encoding. Payloads enter as JSON, BSON or MessagePack and
//! leave in whichever of those the reader asks for; fields are
//! addressed with JSON-Pointer expressions. Five modification modes
//! cover whole documents and pointed fields; `gist` enumerates field
//! paths and `gather` exports a columnar table with per-cell validity,
//! conversion and collision planes.

use crate::database::Database;
use crate::snapshot::Txn;
use manifold_core::arena::Arena;
use manifold_core::document::cast::{cast_scalar, write_cell, CastScalar, ScalarType};
use manifold_core::document::{merge_patch, DocFormat, DocValue, Patch, Pointer};
use manifold_core::error::{EngineError, Result};
use manifold_core::options::Options;
use manifold_core::types::{bits, CollectionHandle, Key, LENGTH_MISSING};
use std::collections::BTreeSet;

/// How a document write treats existing state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocModification {
    /// Replace or create
    Upsert,
    /// Create; fail if the document (or pointed field) exists
    Insert,
    /// Replace; fail if the document (or pointed field) is absent
    Update,
    /// RFC 7386 merge patch
    Merge,
    /// RFC 6902 patch; the payload is the patch document
    Patch,
}

/// A pointed field read back as a scalar
#[derive(Debug, Clone, PartialEq)]
pub struct FieldValue {
    /// The cast result; `None` when missing or uncastable
    pub value: Option<CastScalar>,
    /// A lossy or representation-changing cast occurred
    pub converted: bool,
    /// The field exists but cannot be cast to the requested type
    pub collision: bool,
}

/// Hierarchical documents over the substrate
#[derive(Clone)]
pub struct Docs {
    db: Database,
}

impl Docs {
    /// Create the facade
    pub fn new(db: Database) -> Docs {
        Docs { db }
    }

    fn load(
        &self,
        txn: &mut Option<&mut Txn>,
        collection: CollectionHandle,
        key: Key,
    ) -> Result<Option<DocValue>> {
        match self.db.get(txn.as_deref_mut(), collection, key)? {
            Some(bytes) => Ok(Some(DocValue::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn store(
        &self,
        txn: &mut Option<&mut Txn>,
        collection: CollectionHandle,
        key: Key,
        doc: &DocValue,
    ) -> Result<()> {
        self.db
            .put(txn.as_deref_mut(), collection, key, Some(&doc.encode()?))
    }

    // ======================== writes ========================

    /// Apply one modification to one document
    ///
    /// With a pointer, the modification is scoped to that field: upsert
    /// and insert create absent parents, update and patch require the
    /// path to exist. The payload is parsed in `format`; for
    /// [`DocModification::Patch`] it is the RFC 6902 patch array.
    pub fn write(
        &self,
        mut txn: Option<&mut Txn>,
        collection: CollectionHandle,
        key: Key,
        payload: &[u8],
        format: DocFormat,
        modification: DocModification,
        pointer: Option<&Pointer>,
    ) -> Result<()> {
        let incoming = DocValue::parse(payload, format)?;
        let existing = self.load(&mut txn, collection, key)?;
        let entity = || format!("document {}/{}", collection, key);

        let updated = match pointer {
            None => match modification {
                DocModification::Upsert => incoming,
                DocModification::Insert => {
                    if existing.is_some() {
                        return Err(EngineError::already_exists(entity()));
                    }
                    incoming
                }
                DocModification::Update => {
                    if existing.is_none() {
                        return Err(EngineError::not_found(entity()));
                    }
                    incoming
                }
                DocModification::Merge => {
                    let mut target = existing.unwrap_or(DocValue::Null);
                    merge_patch(&mut target, &incoming);
                    target
                }
                DocModification::Patch => {
                    let mut target = existing.ok_or_else(|| EngineError::not_found(entity()))?;
                    Patch::from_doc(&incoming)?.apply(&mut target)?;
                    target
                }
            },
            Some(pointer) => {
                let field_entity = || format!("{} field {}", entity(), pointer);
                match modification {
                    DocModification::Upsert => {
                        let mut target = existing.unwrap_or_else(new_object);
                        if target.pointer_get(pointer).is_some() {
                            target.pointer_replace(pointer, incoming)?;
                        } else {
                            target.pointer_add(pointer, incoming, true)?;
                        }
                        target
                    }
                    DocModification::Insert => {
                        let mut target = existing.unwrap_or_else(new_object);
                        if target.pointer_get(pointer).is_some() {
                            return Err(EngineError::already_exists(field_entity()));
                        }
                        target.pointer_add(pointer, incoming, true)?;
                        target
                    }
                    DocModification::Update => {
                        let mut target =
                            existing.ok_or_else(|| EngineError::not_found(entity()))?;
                        target.pointer_replace(pointer, incoming)?;
                        target
                    }
                    DocModification::Merge => {
                        let mut target = existing.unwrap_or_else(new_object);
                        if target.pointer_get(pointer).is_some() {
                            if let Some(field) = target.pointer_get_mut(pointer) {
                                merge_patch(field, &incoming);
                            }
                        } else {
                            let mut field = DocValue::Null;
                            merge_patch(&mut field, &incoming);
                            target.pointer_add(pointer, field, true)?;
                        }
                        target
                    }
                    DocModification::Patch => {
                        let mut target =
                            existing.ok_or_else(|| EngineError::not_found(entity()))?;
                        let field =
                            target
                                .pointer_get_mut(pointer)
                                .ok_or_else(|| EngineError::PathNotFound {
                                    pointer: pointer.to_string(),
                                })?;
                        Patch::from_doc(&incoming)?.apply(field)?;
                        target
                    }
                }
            }
        };
        self.store(&mut txn, collection, key, &updated)
    }

    /// Bulk form of [`Docs::write`]: one payload per key
    pub fn write_batch(
        &self,
        mut txn: Option<&mut Txn>,
        collection: CollectionHandle,
        keys: &[Key],
        payloads: &[&[u8]],
        format: DocFormat,
        modification: DocModification,
        pointer: Option<&Pointer>,
    ) -> Result<()> {
        if keys.len() != payloads.len() {
            return Err(EngineError::invalid_argument(
                "keys and payloads must pair up",
            ));
        }
        for (key, payload) in keys.iter().zip(payloads) {
            self.write(
                txn.as_deref_mut(),
                collection,
                *key,
                payload,
                format,
                modification,
                pointer,
            )?;
        }
        Ok(())
    }

    /// Slice an incoming array of objects by a nested id field
    ///
    /// Each element is stored under the integer found at `id_field`
    /// inside it; returns the keys in element order.
    pub fn write_sliced(
        &self,
        mut txn: Option<&mut Txn>,
        collection: CollectionHandle,
        payload: &[u8],
        format: DocFormat,
        id_field: &Pointer,
    ) -> Result<Vec<Key>> {
        let incoming = DocValue::parse(payload, format)?;
        let DocValue::Array(elements) = incoming else {
            return Err(EngineError::invalid_argument(
                "id-field slicing requires a top-level array",
            ));
        };
        let mut keys = Vec::with_capacity(elements.len());
        for element in &elements {
            let key = match element.pointer_get(id_field) {
                Some(DocValue::Int(id)) => *id,
                Some(DocValue::UInt(id)) if *id <= i64::MAX as u64 => *id as i64,
                Some(other) => {
                    return Err(EngineError::invalid_argument(format!(
                        "id field {} is a {}, not an integer",
                        id_field,
                        other.type_name()
                    )))
                }
                None => {
                    return Err(EngineError::PathNotFound {
                        pointer: id_field.to_string(),
                    })
                }
            };
            keys.push(key);
        }
        for (key, element) in keys.iter().zip(elements) {
            self.store(&mut txn, collection, *key, &element)?;
        }
        Ok(keys)
    }

    /// Delete documents
    pub fn remove(
        &self,
        mut txn: Option<&mut Txn>,
        collection: CollectionHandle,
        keys: &[Key],
    ) -> Result<()> {
        for key in keys {
            self.db.put(txn.as_deref_mut(), collection, *key, None)?;
        }
        Ok(())
    }

    // ======================== reads ========================

    /// Batched document read serialized to one format
    ///
    /// Outputs mirror the substrate read: presence bitmap, fenced
    /// offsets, lengths with the missing sentinel, and one byte tape.
    /// A stored value that does not decode as a document reports its
    /// row as absent rather than failing the batch.
    pub fn read<'a>(
        &self,
        mut txn: Option<&mut Txn>,
        collection: CollectionHandle,
        keys: &[Key],
        format: DocFormat,
        options: Options,
        arena: &'a mut Arena,
    ) -> Result<DocReadOutput<'a>> {
        let mut rendered: Vec<Option<Vec<u8>>> = Vec::with_capacity(keys.len());
        for key in keys {
            let doc = match self.db.get_with(txn.as_deref_mut(), collection, *key, options)? {
                Some(bytes) => DocValue::decode(&bytes).ok(),
                None => None,
            };
            rendered.push(match doc {
                Some(doc) => Some(doc.serialize(format)?),
                None => None,
            });
        }

        arena.begin_call(options.dont_discard_arena());
        let arena = &*arena;
        let presences = arena.alloc_slice::<u8>(bits::bitmap_bytes(keys.len()))?;
        let lengths = arena.alloc_slice::<u32>(keys.len())?;
        let offsets = arena.alloc_slice::<u32>(keys.len() + 1)?;
        let total: usize = rendered.iter().flatten().map(|b| b.len()).sum();
        let values = arena.alloc_slice::<u8>(total)?;

        let mut cursor = 0usize;
        for (i, bytes) in rendered.iter().enumerate() {
            offsets[i] = cursor as u32;
            match bytes {
                Some(bytes) => {
                    bits::set(presences, i, true);
                    lengths[i] = bytes.len() as u32;
                    values[cursor..cursor + bytes.len()].copy_from_slice(bytes);
                    cursor += bytes.len();
                }
                None => lengths[i] = LENGTH_MISSING,
            }
        }
        offsets[keys.len()] = cursor as u32;

        Ok(DocReadOutput {
            presences,
            offsets,
            lengths,
            values,
        })
    }

    /// Read one whole document as a canonical tree
    pub fn read_doc(
        &self,
        mut txn: Option<&mut Txn>,
        collection: CollectionHandle,
        key: Key,
    ) -> Result<Option<DocValue>> {
        self.load(&mut txn, collection, key)
    }

    /// Read one pointed field cast to a scalar type
    ///
    /// Missing documents and missing fields come back with no value and
    /// no collision; present-but-uncastable fields set the collision
    /// bit, exactly like a gather cell would.
    pub fn read_field(
        &self,
        mut txn: Option<&mut Txn>,
        collection: CollectionHandle,
        key: Key,
        pointer: &Pointer,
        target: ScalarType,
    ) -> Result<FieldValue> {
        let absent = FieldValue {
            value: None,
            converted: false,
            collision: false,
        };
        let Some(doc) = self.load(&mut txn, collection, key)? else {
            return Ok(absent);
        };
        let Some(field) = doc.pointer_get(pointer) else {
            return Ok(absent);
        };
        Ok(match cast_scalar(field, target) {
            Some(casted) => FieldValue {
                value: Some(casted.value),
                converted: casted.converted,
                collision: false,
            },
            None => FieldValue {
                value: None,
                converted: false,
                collision: true,
            },
        })
    }

    /// Enumerate the sorted unique field paths of the selected documents
    ///
    /// Paths are JSON-Pointer expressions, NUL-terminated and
    /// concatenated in the arena.
    pub fn gist<'a>(
        &self,
        mut txn: Option<&mut Txn>,
        collection: CollectionHandle,
        keys: &[Key],
        options: Options,
        arena: &'a mut Arena,
    ) -> Result<GistOutput<'a>> {
        let mut paths: BTreeSet<String> = BTreeSet::new();
        for key in keys {
            if let Some(doc) = self.load(&mut txn, collection, *key)? {
                doc.leaf_pointers(&mut paths);
            }
        }

        arena.begin_call(options.dont_discard_arena());
        let arena = &*arena;
        let total: usize = paths.iter().map(|p| p.len() + 1).sum();
        let tape = arena.alloc_slice::<u8>(total)?;
        let mut cursor = 0usize;
        for path in &paths {
            tape[cursor..cursor + path.len()].copy_from_slice(path.as_bytes());
            cursor += path.len() + 1;
        }
        Ok(GistOutput {
            count: paths.len(),
            tape,
        })
    }

    /// Columnar export of pointed fields cast to requested types
    ///
    /// One column per (pointer, type) pair. Fixed-width columns carry a
    /// scalar buffer of `rows * cell_size` bytes; string and binary
    /// columns carry fenced offsets plus a row-major tape. Every column
    /// has validity, converted and collision bitset planes; invalid
    /// cells are zeroed.
    pub fn gather<'a>(
        &self,
        mut txn: Option<&mut Txn>,
        collection: CollectionHandle,
        keys: &[Key],
        columns: &[(Pointer, ScalarType)],
        options: Options,
        arena: &'a mut Arena,
    ) -> Result<GatherOutput<'a>> {
        let mut docs: Vec<Option<DocValue>> = Vec::with_capacity(keys.len());
        for key in keys {
            docs.push(self.load(&mut txn, collection, *key)?);
        }

        arena.begin_call(options.dont_discard_arena());
        let arena = &*arena;
        let rows = keys.len();
        let mut output = Vec::with_capacity(columns.len());

        for (pointer, target) in columns {
            let fields: Vec<Option<&DocValue>> = docs
                .iter()
                .map(|doc| doc.as_ref().and_then(|doc| doc.pointer_get(pointer)))
                .collect();
            let casts: Vec<Option<manifold_core::document::cast::Casted>> = fields
                .iter()
                .map(|field| field.and_then(|field| cast_scalar(field, *target)))
                .collect();

            let validity = arena.alloc_slice::<u8>(bits::bitmap_bytes(rows))?;
            let converted = arena.alloc_slice::<u8>(bits::bitmap_bytes(rows))?;
            let collisions = arena.alloc_slice::<u8>(bits::bitmap_bytes(rows))?;
            for row in 0..rows {
                match &casts[row] {
                    Some(casted) => {
                        bits::set(validity, row, true);
                        bits::set(converted, row, casted.converted);
                    }
                    None => {
                        // Present but uncastable is a collision; missing is not.
                        if fields[row].is_some() {
                            bits::set(collisions, row, true);
                        }
                    }
                }
            }

            let cells = if target.is_variable() {
                let offsets = arena.alloc_slice::<u32>(rows + 1)?;
                let total: usize = casts
                    .iter()
                    .map(|cast| match cast {
                        Some(casted) => variable_bytes(&casted.value).len(),
                        None => 0,
                    })
                    .sum();
                let tape = arena.alloc_slice::<u8>(total)?;
                let mut cursor = 0usize;
                for (row, cast) in casts.iter().enumerate() {
                    offsets[row] = cursor as u32;
                    if let Some(casted) = cast {
                        let bytes = variable_bytes(&casted.value);
                        tape[cursor..cursor + bytes.len()].copy_from_slice(bytes);
                        cursor += bytes.len();
                    }
                }
                offsets[rows] = cursor as u32;
                GatherCells::Variable { offsets, tape }
            } else {
                let cell = target.cell_size();
                let scalars = arena.alloc_slice::<u8>(rows * cell)?;
                for (row, cast) in casts.iter().enumerate() {
                    if let Some(casted) = cast {
                        write_cell(*target, &casted.value, &mut scalars[row * cell..(row + 1) * cell]);
                    }
                }
                GatherCells::Fixed { scalars }
            };

            output.push(GatherColumn {
                target: *target,
                cells,
                validity,
                converted,
                collisions,
            });
        }

        Ok(GatherOutput {
            rows,
            columns: output,
        })
    }
}

fn new_object() -> DocValue {
    DocValue::Object(Default::default())
}

fn variable_bytes(value: &CastScalar) -> &[u8] {
    match value {
        CastScalar::Str(s) => s.as_bytes(),
        CastScalar::Bytes(b) => b,
        _ => &[],
    }
}

/// Batched document read output
#[derive(Debug)]
pub struct DocReadOutput<'a> {
    /// Presence bitmap, one bit per key
    pub presences: &'a [u8],
    /// Byte offset of each document, plus the trailing total
    pub offsets: &'a [u32],
    /// Serialized lengths; the missing sentinel marks absent rows
    pub lengths: &'a [u32],
    /// Serialized documents, back to back
    pub values: &'a [u8],
}

impl<'a> DocReadOutput<'a> {
    /// Serialized bytes of row `i`, `None` when absent
    pub fn value(&self, i: usize) -> Option<&'a [u8]> {
        if !bits::get(self.presences, i) {
            return None;
        }
        let start = self.offsets[i] as usize;
        Some(&self.values[start..start + self.lengths[i] as usize])
    }
}

/// Sorted unique field paths, NUL-joined in the arena
#[derive(Debug)]
pub struct GistOutput<'a> {
    /// Number of distinct paths
    pub count: usize,
    /// NUL-terminated JSON-Pointer expressions, concatenated
    pub tape: &'a [u8],
}

impl<'a> GistOutput<'a> {
    /// Iterate the paths in sorted order
    pub fn iter(&self) -> impl Iterator<Item = &'a str> {
        self.tape
            .split(|b| *b == 0)
            .filter(|part| !part.is_empty())
            .map(|part| std::str::from_utf8(part).unwrap_or(""))
    }
}

/// One gather column's cell storage
#[derive(Debug)]
pub enum GatherCells<'a> {
    /// Fixed-width cells, `rows * cell_size` bytes, invalid cells zeroed
    Fixed {
        /// The packed scalar buffer
        scalars: &'a [u8],
    },
    /// Variable-width cells: fenced offsets plus a row-major tape
    Variable {
        /// Byte offset per row, plus the trailing total
        offsets: &'a [u32],
        /// Joined row payloads
        tape: &'a [u8],
    },
}

/// One gather column with its diagnostic planes
#[derive(Debug)]
pub struct GatherColumn<'a> {
    /// The requested scalar type
    pub target: ScalarType,
    /// Cell storage
    pub cells: GatherCells<'a>,
    /// Validity bitset: the cell holds a cast value
    pub validity: &'a [u8],
    /// Converted bitset: the cast was lossy or representation-changing
    pub converted: &'a [u8],
    /// Collision bitset: the field exists but cannot be cast
    pub collisions: &'a [u8],
}

impl<'a> GatherColumn<'a> {
    /// Fixed-width cell bytes of one row
    pub fn cell(&self, row: usize) -> Option<&'a [u8]> {
        match &self.cells {
            GatherCells::Fixed { scalars } => {
                let size = self.target.cell_size();
                Some(&scalars[row * size..(row + 1) * size])
            }
            GatherCells::Variable { .. } => None,
        }
    }

    /// Variable-width cell bytes of one row
    pub fn variable(&self, row: usize) -> Option<&'a [u8]> {
        match &self.cells {
            GatherCells::Variable { offsets, tape } => {
                Some(&tape[offsets[row] as usize..offsets[row + 1] as usize])
            }
            GatherCells::Fixed { .. } => None,
        }
    }
}

/// Columnar gather result
#[derive(Debug)]
pub struct GatherOutput<'a> {
    /// Row count (one row per requested key)
    pub rows: usize,
    /// One column per requested (pointer, type) pair, in request order
    pub columns: Vec<GatherColumn<'a>>,
}
