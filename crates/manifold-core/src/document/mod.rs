//! Canonical document representation
//!
//! Documents are stored as a tagged variant tree, [`DocValue`], that
//! round-trips losslessly with JSON for the scalar set {null, bool,
//! signed/unsigned 64-bit integers, 64-bit floats, binary, string}.
//! Inbound payloads arrive as JSON text, BSON or MessagePack and are
//! converted to this form on write; outbound reads serialize it back to
//! the requested format. The storage encoding is a compact bincode image
//! of the tree.
//!
//! Objects deduplicate keys and enumerate them in sorted order; arrays
//! preserve element order exactly.

pub mod cast;
pub mod patch;
pub mod pointer;

pub use cast::{cast_scalar, CastScalar, Casted, ScalarType};
pub use patch::{merge_patch, Patch, PatchOp};
pub use pointer::{escape, ArrayIndex, Pointer};

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Serialization formats a document can enter or leave the engine in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DocFormat {
    /// JSON text
    #[default]
    Json,
    /// Binary JSON (BSON); the top level must be an object
    Bson,
    /// MessagePack
    MsgPack,
}

impl DocFormat {
    /// Format name used in diagnostics
    pub fn name(self) -> &'static str {
        match self {
            DocFormat::Json => "JSON",
            DocFormat::Bson => "BSON",
            DocFormat::MsgPack => "MessagePack",
        }
    }
}

/// Canonical internal form of a hierarchical document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DocValue {
    /// Explicit null
    Null,
    /// Boolean
    Bool(bool),
    /// Signed integer up to 64 bits
    Int(i64),
    /// Unsigned integer that does not fit `i64`
    UInt(u64),
    /// Floating point up to 64 bits
    Float(f64),
    /// Raw binary
    Bytes(Vec<u8>),
    /// UTF-8 string
    Str(String),
    /// Ordered array
    Array(Vec<DocValue>),
    /// Object with unique, sorted keys
    Object(BTreeMap<String, DocValue>),
}

impl DocValue {
    /// Human-readable type tag used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            DocValue::Null => "null",
            DocValue::Bool(_) => "bool",
            DocValue::Int(_) => "int",
            DocValue::UInt(_) => "uint",
            DocValue::Float(_) => "float",
            DocValue::Bytes(_) => "bytes",
            DocValue::Str(_) => "string",
            DocValue::Array(_) => "array",
            DocValue::Object(_) => "object",
        }
    }

    /// Whether this node is an array or object
    pub fn is_container(&self) -> bool {
        matches!(self, DocValue::Array(_) | DocValue::Object(_))
    }

    // ======================== storage encoding ========================

    /// Encode to the compact storage form
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| EngineError::corrupted(e.to_string()))
    }

    /// Decode from the compact storage form
    pub fn decode(bytes: &[u8]) -> Result<DocValue> {
        bincode::deserialize(bytes).map_err(|e| {
            EngineError::wrong_modality(format!("stored value is not a document: {}", e))
        })
    }

    // ======================== format ingest/egress ========================

    /// Parse a payload in the given format
    pub fn parse(bytes: &[u8], format: DocFormat) -> Result<DocValue> {
        match format {
            DocFormat::Json => {
                let value: serde_json::Value =
                    serde_json::from_slice(bytes).map_err(|e| EngineError::InvalidDocument {
                        format: format.name(),
                        message: e.to_string(),
                    })?;
                Ok(DocValue::from_json_value(value))
            }
            DocFormat::Bson => {
                let mut reader = std::io::Cursor::new(bytes);
                let doc = bson::Document::from_reader(&mut reader).map_err(|e| {
                    EngineError::InvalidDocument {
                        format: format.name(),
                        message: e.to_string(),
                    }
                })?;
                DocValue::from_bson_value(bson::Bson::Document(doc))
            }
            DocFormat::MsgPack => {
                let mut reader = std::io::Cursor::new(bytes);
                let value = rmpv::decode::read_value(&mut reader).map_err(|e| {
                    EngineError::InvalidDocument {
                        format: format.name(),
                        message: e.to_string(),
                    }
                })?;
                DocValue::from_msgpack_value(value)
            }
        }
    }

    /// Serialize to the given format
    pub fn serialize(&self, format: DocFormat) -> Result<Vec<u8>> {
        match format {
            DocFormat::Json => serde_json::to_vec(&self.to_json_value())
                .map_err(|e| EngineError::internal(e.to_string())),
            DocFormat::Bson => {
                let bson = self.to_bson_value();
                let bson::Bson::Document(doc) = bson else {
                    return Err(EngineError::invalid_argument(
                        "BSON output requires a top-level object",
                    ));
                };
                let mut out = Vec::new();
                doc.to_writer(&mut out)
                    .map_err(|e| EngineError::internal(e.to_string()))?;
                Ok(out)
            }
            DocFormat::MsgPack => {
                let mut out = Vec::new();
                rmpv::encode::write_value(&mut out, &self.to_msgpack_value())
                    .map_err(|e| EngineError::internal(e.to_string()))?;
                Ok(out)
            }
        }
    }

    /// Build from a `serde_json` value
    pub fn from_json_value(value: serde_json::Value) -> DocValue {
        match value {
            serde_json::Value::Null => DocValue::Null,
            serde_json::Value::Bool(b) => DocValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    DocValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    DocValue::UInt(u)
                } else {
                    DocValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => DocValue::Str(s),
            serde_json::Value::Array(items) => {
                DocValue::Array(items.into_iter().map(DocValue::from_json_value).collect())
            }
            serde_json::Value::Object(map) => DocValue::Object(
                map.into_iter()
                    .map(|(k, v)| (k, DocValue::from_json_value(v)))
                    .collect(),
            ),
        }
    }

    /// Convert to a `serde_json` value
    ///
    /// Binary renders as an array of byte integers; non-finite floats
    /// render as null, since JSON cannot carry them.
    pub fn to_json_value(&self) -> serde_json::Value {
        match self {
            DocValue::Null => serde_json::Value::Null,
            DocValue::Bool(b) => serde_json::Value::Bool(*b),
            DocValue::Int(i) => serde_json::Value::Number((*i).into()),
            DocValue::UInt(u) => serde_json::Value::Number((*u).into()),
            DocValue::Float(f) => match serde_json::Number::from_f64(*f) {
                Some(n) => serde_json::Value::Number(n),
                None => serde_json::Value::Null,
            },
            DocValue::Bytes(bytes) => {
                serde_json::Value::Array(bytes.iter().map(|b| (*b as u64).into()).collect())
            }
            DocValue::Str(s) => serde_json::Value::String(s.clone()),
            DocValue::Array(items) => {
                serde_json::Value::Array(items.iter().map(DocValue::to_json_value).collect())
            }
            DocValue::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json_value()))
                    .collect(),
            ),
        }
    }

    /// JSON text rendering, used by string casts of containers
    pub fn to_json_string(&self) -> String {
        self.to_json_value().to_string()
    }

    /// Build from a MessagePack value
    pub fn from_msgpack_value(value: rmpv::Value) -> Result<DocValue> {
        Ok(match value {
            rmpv::Value::Nil => DocValue::Null,
            rmpv::Value::Boolean(b) => DocValue::Bool(b),
            rmpv::Value::Integer(i) => {
                if let Some(signed) = i.as_i64() {
                    DocValue::Int(signed)
                } else if let Some(unsigned) = i.as_u64() {
                    DocValue::UInt(unsigned)
                } else {
                    return Err(EngineError::InvalidDocument {
                        format: "MessagePack",
                        message: "integer outside the 64-bit range".to_string(),
                    });
                }
            }
            rmpv::Value::F32(f) => DocValue::Float(f as f64),
            rmpv::Value::F64(f) => DocValue::Float(f),
            rmpv::Value::String(s) => match s.into_str() {
                Some(text) => DocValue::Str(text),
                None => {
                    return Err(EngineError::InvalidDocument {
                        format: "MessagePack",
                        message: "string is not valid UTF-8".to_string(),
                    })
                }
            },
            rmpv::Value::Binary(bytes) => DocValue::Bytes(bytes),
            rmpv::Value::Array(items) => DocValue::Array(
                items
                    .into_iter()
                    .map(DocValue::from_msgpack_value)
                    .collect::<Result<_>>()?,
            ),
            rmpv::Value::Map(entries) => {
                let mut map = BTreeMap::new();
                for (key, value) in entries {
                    let rmpv::Value::String(key) = key else {
                        return Err(EngineError::InvalidDocument {
                            format: "MessagePack",
                            message: "object keys must be strings".to_string(),
                        });
                    };
                    let Some(key) = key.into_str() else {
                        return Err(EngineError::InvalidDocument {
                            format: "MessagePack",
                            message: "object key is not valid UTF-8".to_string(),
                        });
                    };
                    map.insert(key, DocValue::from_msgpack_value(value)?);
                }
                DocValue::Object(map)
            }
            rmpv::Value::Ext(_, _) => {
                return Err(EngineError::InvalidDocument {
                    format: "MessagePack",
                    message: "extension types are not supported".to_string(),
                })
            }
        })
    }

    /// Convert to a MessagePack value
    pub fn to_msgpack_value(&self) -> rmpv::Value {
        match self {
            DocValue::Null => rmpv::Value::Nil,
            DocValue::Bool(b) => rmpv::Value::Boolean(*b),
            DocValue::Int(i) => rmpv::Value::Integer((*i).into()),
            DocValue::UInt(u) => rmpv::Value::Integer((*u).into()),
            DocValue::Float(f) => rmpv::Value::F64(*f),
            DocValue::Bytes(bytes) => rmpv::Value::Binary(bytes.clone()),
            DocValue::Str(s) => rmpv::Value::String(s.as_str().into()),
            DocValue::Array(items) => {
                rmpv::Value::Array(items.iter().map(DocValue::to_msgpack_value).collect())
            }
            DocValue::Object(map) => rmpv::Value::Map(
                map.iter()
                    .map(|(k, v)| (rmpv::Value::String(k.as_str().into()), v.to_msgpack_value()))
                    .collect(),
            ),
        }
    }

    /// Build from a BSON value
    ///
    /// Supported element types map onto the canonical scalar set;
    /// ObjectIds become hex strings and datetimes become millisecond
    /// integers. Other BSON-only types are rejected.
    pub fn from_bson_value(value: bson::Bson) -> Result<DocValue> {
        Ok(match value {
            bson::Bson::Null => DocValue::Null,
            bson::Bson::Boolean(b) => DocValue::Bool(b),
            bson::Bson::Int32(i) => DocValue::Int(i as i64),
            bson::Bson::Int64(i) => DocValue::Int(i),
            bson::Bson::Double(f) => DocValue::Float(f),
            bson::Bson::String(s) => DocValue::Str(s),
            bson::Bson::Binary(bin) => DocValue::Bytes(bin.bytes),
            bson::Bson::ObjectId(oid) => DocValue::Str(oid.to_hex()),
            bson::Bson::DateTime(dt) => DocValue::Int(dt.timestamp_millis()),
            bson::Bson::Array(items) => DocValue::Array(
                items
                    .into_iter()
                    .map(DocValue::from_bson_value)
                    .collect::<Result<_>>()?,
            ),
            bson::Bson::Document(doc) => {
                let mut map = BTreeMap::new();
                for (key, value) in doc {
                    map.insert(key, DocValue::from_bson_value(value)?);
                }
                DocValue::Object(map)
            }
            other => {
                return Err(EngineError::InvalidDocument {
                    format: "BSON",
                    message: format!("unsupported element type: {:?}", other.element_type()),
                })
            }
        })
    }

    /// Convert to a BSON value
    ///
    /// Unsigned integers that fit `i64` become `Int64`; larger ones fall
    /// back to `Double`, which BSON can carry but loses precision on.
    pub fn to_bson_value(&self) -> bson::Bson {
        match self {
            DocValue::Null => bson::Bson::Null,
            DocValue::Bool(b) => bson::Bson::Boolean(*b),
            DocValue::Int(i) => bson::Bson::Int64(*i),
            DocValue::UInt(u) => {
                if *u <= i64::MAX as u64 {
                    bson::Bson::Int64(*u as i64)
                } else {
                    bson::Bson::Double(*u as f64)
                }
            }
            DocValue::Float(f) => bson::Bson::Double(*f),
            DocValue::Bytes(bytes) => bson::Bson::Binary(bson::Binary {
                subtype: bson::spec::BinarySubtype::Generic,
                bytes: bytes.clone(),
            }),
            DocValue::Str(s) => bson::Bson::String(s.clone()),
            DocValue::Array(items) => {
                bson::Bson::Array(items.iter().map(DocValue::to_bson_value).collect())
            }
            DocValue::Object(map) => {
                let mut doc = bson::Document::new();
                for (key, value) in map {
                    doc.insert(key.clone(), value.to_bson_value());
                }
                bson::Bson::Document(doc)
            }
        }
    }

    // ======================== pointer access ========================

    /// Resolve a pointer to a node, if it exists
    pub fn pointer_get(&self, ptr: &Pointer) -> Option<&DocValue> {
        let mut node = self;
        for token in ptr.tokens() {
            node = match node {
                DocValue::Object(map) => map.get(token)?,
                DocValue::Array(items) => match pointer::array_index(token, items.len())? {
                    ArrayIndex::At(i) => &items[i],
                    ArrayIndex::Append => return None,
                },
                _ => return None,
            };
        }
        Some(node)
    }

    /// Resolve a pointer to a mutable node, if it exists
    pub fn pointer_get_mut(&mut self, ptr: &Pointer) -> Option<&mut DocValue> {
        let mut node = self;
        for token in ptr.tokens() {
            node = match node {
                DocValue::Object(map) => map.get_mut(token)?,
                DocValue::Array(items) => {
                    let len = items.len();
                    match pointer::array_index(token, len)? {
                        ArrayIndex::At(i) => &mut items[i],
                        ArrayIndex::Append => return None,
                    }
                }
                _ => return None,
            };
        }
        Some(node)
    }

    /// Add a value at a pointer, RFC 6902 `add` style
    ///
    /// Objects insert or replace the member (the replaced value is
    /// returned); arrays insert at the index, shifting the tail, with
    /// `-` or index == len appending. The parent location must exist
    /// unless `create_parents` is set, in which case absent intermediate
    /// members are created as objects.
    pub fn pointer_add(
        &mut self,
        ptr: &Pointer,
        value: DocValue,
        create_parents: bool,
    ) -> Result<Option<DocValue>> {
        let Some((parent_ptr, last)) = ptr.split_last() else {
            return Ok(Some(std::mem::replace(self, value)));
        };

        let parent = if create_parents {
            self.materialize_parent(&parent_ptr, ptr)?
        } else {
            self.pointer_get_mut(&parent_ptr)
                .ok_or_else(|| EngineError::PathNotFound {
                    pointer: ptr.to_string(),
                })?
        };

        match parent {
            DocValue::Object(map) => Ok(map.insert(last.to_string(), value)),
            DocValue::Array(items) => {
                match pointer::array_index(last, items.len()).ok_or_else(|| {
                    EngineError::PathNotFound {
                        pointer: ptr.to_string(),
                    }
                })? {
                    ArrayIndex::At(i) => items.insert(i, value),
                    ArrayIndex::Append => items.push(value),
                }
                Ok(None)
            }
            _ => Err(EngineError::PathNotFound {
                pointer: ptr.to_string(),
            }),
        }
    }

    /// Replace the value at an existing pointer, returning the old value
    pub fn pointer_replace(&mut self, ptr: &Pointer, value: DocValue) -> Result<DocValue> {
        match self.pointer_get_mut(ptr) {
            Some(node) => Ok(std::mem::replace(node, value)),
            None => Err(EngineError::PathNotFound {
                pointer: ptr.to_string(),
            }),
        }
    }

    /// Remove and return the value at a pointer
    pub fn pointer_remove(&mut self, ptr: &Pointer) -> Result<DocValue> {
        let Some((parent_ptr, last)) = ptr.split_last() else {
            return Err(EngineError::invalid_argument(
                "cannot remove the document root",
            ));
        };
        let missing = || EngineError::PathNotFound {
            pointer: ptr.to_string(),
        };
        let parent = self.pointer_get_mut(&parent_ptr).ok_or_else(missing)?;
        match parent {
            DocValue::Object(map) => map.remove(last).ok_or_else(missing),
            DocValue::Array(items) => match pointer::array_index(last, items.len()) {
                Some(ArrayIndex::At(i)) => Ok(items.remove(i)),
                _ => Err(missing()),
            },
            _ => Err(missing()),
        }
    }

    /// Walk to the parent, creating absent object members along the way
    fn materialize_parent(&mut self, parent_ptr: &Pointer, whole: &Pointer) -> Result<&mut DocValue> {
        let mut node = self;
        for token in parent_ptr.tokens() {
            node = match node {
                DocValue::Object(map) => map
                    .entry(token.clone())
                    .or_insert_with(|| DocValue::Object(BTreeMap::new())),
                DocValue::Array(items) => {
                    let len = items.len();
                    match pointer::array_index(token, len) {
                        Some(ArrayIndex::At(i)) => &mut items[i],
                        Some(ArrayIndex::Append) => {
                            items.push(DocValue::Object(BTreeMap::new()));
                            items.last_mut().expect("just pushed")
                        }
                        None => {
                            return Err(EngineError::PathNotFound {
                                pointer: whole.to_string(),
                            })
                        }
                    }
                }
                _ => {
                    return Err(EngineError::PathNotFound {
                        pointer: whole.to_string(),
                    })
                }
            };
        }
        Ok(node)
    }

    // ======================== field enumeration ========================

    /// Collect the JSON-Pointer paths of every leaf field
    ///
    /// Empty containers contribute their own path; a scalar root
    /// contributes the empty pointer.
    pub fn leaf_pointers(&self, into: &mut BTreeSet<String>) {
        fn walk(node: &DocValue, prefix: &str, into: &mut BTreeSet<String>) {
            match node {
                DocValue::Object(map) if !map.is_empty() => {
                    for (key, value) in map {
                        walk(value, &format!("{}/{}", prefix, escape(key)), into);
                    }
                }
                DocValue::Array(items) if !items.is_empty() => {
                    for (i, value) in items.iter().enumerate() {
                        walk(value, &format!("{}/{}", prefix, i), into);
                    }
                }
                _ => {
                    into.insert(prefix.to_string());
                }
            }
        }
        walk(self, "", into);
    }
}
