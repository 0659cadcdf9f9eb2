//! Strided batch argument views
//!
//! Callers may pack batch arguments as one value repeated for every task
//! (stride zero) or as a slice with one element per task. [`Strided`] is
//! the typed view over both shapes; every batched engine call takes its
//! arguments through it, so there is a single code path regardless of how
//! the caller laid the batch out.

use crate::error::{EngineError, Result};
use crate::types::bits;

/// A batched argument: either one repeated value or a per-task slice
#[derive(Debug, Clone, Copy)]
pub enum Strided<'a, T: Copy> {
    /// Stride zero: the same value for every task
    Repeat(T),
    /// One element per task, in task order
    Slice(&'a [T]),
}

impl<'a, T: Copy> Strided<'a, T> {
    /// Fetch the value for task `index`
    ///
    /// Callers must have validated the length with [`Strided::check`]
    /// first; indexing a too-short slice panics like any slice access.
    pub fn get(&self, index: usize) -> T {
        match self {
            Strided::Repeat(value) => *value,
            Strided::Slice(items) => items[index],
        }
    }

    /// Validate that this view can serve `count` tasks
    pub fn check(&self, count: usize, what: &str) -> Result<()> {
        match self {
            Strided::Repeat(_) => Ok(()),
            Strided::Slice(items) if items.len() >= count => Ok(()),
            Strided::Slice(items) => Err(EngineError::invalid_argument(format!(
                "{} holds {} elements but the batch has {} tasks",
                what,
                items.len(),
                count
            ))),
        }
    }

    /// Iterate the first `count` task values
    pub fn iter(&self, count: usize) -> impl Iterator<Item = T> + '_ {
        (0..count).map(move |i| self.get(i))
    }
}

impl<'a, T: Copy> From<&'a [T]> for Strided<'a, T> {
    fn from(items: &'a [T]) -> Self {
        Strided::Slice(items)
    }
}

impl<'a, T: Copy, const N: usize> From<&'a [T; N]> for Strided<'a, T> {
    fn from(items: &'a [T; N]) -> Self {
        Strided::Slice(items.as_slice())
    }
}

/// Batched write payloads with the full value-description resolution
///
/// A write task's bytes may be described several redundant ways; the
/// resolution order is fixed:
///
/// 1. a `None` value denotes delete;
/// 2. a cleared presence bit denotes delete;
/// 3. an explicit length wins over everything else;
/// 4. otherwise adjacent offsets (`offsets[i + 1] - offsets[i]`) define
///    the length;
/// 5. with neither, the value is scanned up to its first NUL byte.
///
/// When offsets are supplied, the per-task value slice is treated as a
/// base tape indexed by the task's offset.
#[derive(Debug, Clone, Copy)]
pub struct Contents<'a> {
    /// Per-task payload; `None` is an explicit delete
    pub values: Strided<'a, Option<&'a [u8]>>,
    /// Optional packed presence bitmap, one bit per task
    pub presences: Option<&'a [u8]>,
    /// Optional byte offsets into each task's value slice
    pub offsets: Option<Strided<'a, u32>>,
    /// Optional explicit byte lengths
    pub lengths: Option<Strided<'a, u32>>,
}

impl<'a> Contents<'a> {
    /// Contents described by plain per-task optional slices
    pub fn from_values(values: &'a [Option<&'a [u8]>]) -> Self {
        Contents {
            values: Strided::Slice(values),
            presences: None,
            offsets: None,
            lengths: None,
        }
    }

    /// Validate argument lengths against the task count
    pub fn check(&self, count: usize) -> Result<()> {
        self.values.check(count, "values")?;
        if let Some(presences) = self.presences {
            if presences.len() < bits::bitmap_bytes(count) {
                return Err(EngineError::invalid_argument(
                    "presence bitmap shorter than the batch",
                ));
            }
        }
        if let Some(offsets) = &self.offsets {
            // Offsets are fenced: the resolution may look one past the end.
            offsets.check(count + 1, "offsets")?;
        }
        if let Some(lengths) = &self.lengths {
            lengths.check(count, "lengths")?;
        }
        Ok(())
    }

    /// Resolve task `index` into `Some(payload)` or `None` for delete
    pub fn resolve(&self, index: usize) -> Result<Option<&'a [u8]>> {
        let Some(value) = self.values.get(index) else {
            return Ok(None);
        };
        if let Some(presences) = self.presences {
            if !bits::get(presences, index) {
                return Ok(None);
            }
        }

        let start = match &self.offsets {
            Some(offsets) => offsets.get(index) as usize,
            None => 0,
        };
        let length = match (&self.lengths, &self.offsets) {
            (Some(lengths), _) => lengths.get(index) as usize,
            (None, Some(offsets)) => {
                let next = offsets.get(index + 1) as usize;
                next.checked_sub(start).ok_or_else(|| {
                    EngineError::invalid_argument("offsets are not monotonically non-decreasing")
                })?
            }
            (None, None) => value.iter().position(|b| *b == 0).unwrap_or(value.len()),
        };

        let end = start.checked_add(length).filter(|end| *end <= value.len());
        match end {
            Some(end) => Ok(Some(&value[start..end])),
            None => Err(EngineError::invalid_argument(format!(
                "value range {}..{} out of bounds for a {}-byte payload",
                start,
                start.saturating_add(length),
                value.len()
            ))),
        }
    }
}
