//! Document modification syntaxes
//!
//! [`Patch`] implements RFC 6902 JSON Patch; [`merge_patch`] implements
//! RFC 7386 JSON Merge Patch. Both operate on the canonical [`DocValue`]
//! tree, so the same machinery serves JSON, BSON and MessagePack
//! payloads.

use super::pointer::Pointer;
use super::DocValue;
use crate::error::{EngineError, Result};

/// A single RFC 6902 operation
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOp {
    /// Insert or replace at `path`
    Add {
        /// Target location
        path: Pointer,
        /// Value to add
        value: DocValue,
    },
    /// Remove the value at `path`; the location must exist
    Remove {
        /// Target location
        path: Pointer,
    },
    /// Replace the value at `path`; the location must exist
    Replace {
        /// Target location
        path: Pointer,
        /// Replacement value
        value: DocValue,
    },
    /// Remove from `from` and add at `path`
    Move {
        /// Source location
        from: Pointer,
        /// Target location
        path: Pointer,
    },
    /// Copy the value at `from` to `path`
    Copy {
        /// Source location
        from: Pointer,
        /// Target location
        path: Pointer,
    },
    /// Assert that the value at `path` equals `value`
    Test {
        /// Location to check
        path: Pointer,
        /// Expected value
        value: DocValue,
    },
}

/// An ordered RFC 6902 patch
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Patch {
    ops: Vec<PatchOp>,
}

impl Patch {
    /// Parse a patch from its document form: an array of operation objects
    pub fn from_doc(doc: &DocValue) -> Result<Patch> {
        let DocValue::Array(items) = doc else {
            return Err(EngineError::invalid_argument(
                "a patch must be an array of operations",
            ));
        };
        let mut ops = Vec::with_capacity(items.len());
        for item in items {
            ops.push(parse_op(item)?);
        }
        Ok(Patch { ops })
    }

    /// Operations in application order
    pub fn ops(&self) -> &[PatchOp] {
        &self.ops
    }

    /// Apply every operation in order
    ///
    /// Stops at the first failing operation; `target` is left in the
    /// partially patched state, so callers apply patches to a scratch
    /// clone and store the result only on success.
    pub fn apply(&self, target: &mut DocValue) -> Result<()> {
        for op in &self.ops {
            apply_op(op, target)?;
        }
        Ok(())
    }
}

fn parse_op(item: &DocValue) -> Result<PatchOp> {
    let DocValue::Object(fields) = item else {
        return Err(EngineError::invalid_argument(
            "each patch operation must be an object",
        ));
    };
    let op_name = match fields.get("op") {
        Some(DocValue::Str(name)) => name.as_str(),
        _ => {
            return Err(EngineError::invalid_argument(
                "patch operation is missing its \"op\" member",
            ))
        }
    };
    let path = parse_pointer_field(fields, "path")?;
    Ok(match op_name {
        "add" => PatchOp::Add {
            path,
            value: required_value(fields)?,
        },
        "remove" => PatchOp::Remove { path },
        "replace" => PatchOp::Replace {
            path,
            value: required_value(fields)?,
        },
        "move" => PatchOp::Move {
            from: parse_pointer_field(fields, "from")?,
            path,
        },
        "copy" => PatchOp::Copy {
            from: parse_pointer_field(fields, "from")?,
            path,
        },
        "test" => PatchOp::Test {
            path,
            value: required_value(fields)?,
        },
        other => {
            return Err(EngineError::invalid_argument(format!(
                "unknown patch operation {:?}",
                other
            )))
        }
    })
}

fn parse_pointer_field(
    fields: &std::collections::BTreeMap<String, DocValue>,
    name: &str,
) -> Result<Pointer> {
    match fields.get(name) {
        Some(DocValue::Str(expr)) => Pointer::parse(expr),
        _ => Err(EngineError::invalid_argument(format!(
            "patch operation is missing its {:?} member",
            name
        ))),
    }
}

fn required_value(fields: &std::collections::BTreeMap<String, DocValue>) -> Result<DocValue> {
    fields.get("value").cloned().ok_or_else(|| {
        EngineError::invalid_argument("patch operation is missing its \"value\" member")
    })
}

fn apply_op(op: &PatchOp, target: &mut DocValue) -> Result<()> {
    match op {
        PatchOp::Add { path, value } => {
            target.pointer_add(path, value.clone(), false)?;
        }
        PatchOp::Remove { path } => {
            target.pointer_remove(path)?;
        }
        PatchOp::Replace { path, value } => {
            target.pointer_replace(path, value.clone())?;
        }
        PatchOp::Move { from, path } => {
            if is_prefix(from, path) {
                return Err(EngineError::invalid_argument(format!(
                    "cannot move {} into its own child {}",
                    from, path
                )));
            }
            let value = target.pointer_remove(from)?;
            target.pointer_add(path, value, false)?;
        }
        PatchOp::Copy { from, path } => {
            let value = target
                .pointer_get(from)
                .cloned()
                .ok_or_else(|| EngineError::PathNotFound {
                    pointer: from.to_string(),
                })?;
            target.pointer_add(path, value, false)?;
        }
        PatchOp::Test { path, value } => {
            let actual = target
                .pointer_get(path)
                .ok_or_else(|| EngineError::PathNotFound {
                    pointer: path.to_string(),
                })?;
            if actual != value {
                return Err(EngineError::invalid_argument(format!(
                    "patch test failed at {}",
                    path
                )));
            }
        }
    }
    Ok(())
}

fn is_prefix(prefix: &Pointer, of: &Pointer) -> bool {
    prefix.tokens().len() < of.tokens().len()
        && of.tokens()[..prefix.tokens().len()] == *prefix.tokens()
}

/// Apply an RFC 7386 merge patch
///
/// Object members merge recursively; a null member removes the target
/// member; any non-object patch replaces the target wholesale. Merge
/// patches are idempotent.
pub fn merge_patch(target: &mut DocValue, patch: &DocValue) {
    match patch {
        DocValue::Object(patch_map) => {
            if !matches!(target, DocValue::Object(_)) {
                *target = DocValue::Object(Default::default());
            }
            let DocValue::Object(target_map) = target else {
                unreachable!("target was just coerced to an object");
            };
            for (key, patch_value) in patch_map {
                match patch_value {
                    DocValue::Null => {
                        target_map.remove(key);
                    }
                    _ => {
                        let slot = target_map.entry(key.clone()).or_insert(DocValue::Null);
                        merge_patch(slot, patch_value);
                    }
                }
            }
        }
        _ => *target = patch.clone(),
    }
}
