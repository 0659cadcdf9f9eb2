//! Foundational types shared by every layer
//!
//! Keys are 64-bit signed integers, unique within a collection.
//! Collections are addressed by opaque 64-bit handles; handle zero is the
//! unnamed default collection that exists from database open.
//! Generations are the monotonic version counter stamped on every write.

use serde::{Deserialize, Serialize};

/// Primary key within a collection
pub type Key = i64;

/// Monotonic version counter maintained by the database
pub type Generation = u64;

/// Reserved "unknown key" sentinel, used in edge emissions to mark absence
pub const KEY_UNKNOWN: Key = i64::MAX;

/// Missing-length sentinel reported for absent or tombstoned entries
pub const LENGTH_MISSING: u32 = u32::MAX;

/// Reserved edge-id for edges inserted without an explicit identity
pub const EDGE_ID_NONE: i64 = i64::MAX;

/// Sentinel degree reported for vertices that do not exist
pub const DEGREE_MISSING: u32 = u32::MAX;

/// Opaque handle of a collection within a database
///
/// Handles are stable for the lifetime of the database instance. They are
/// not portable across instances; names are.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct CollectionHandle(pub u64);

impl CollectionHandle {
    /// The unnamed default collection, present from open
    pub const DEFAULT: CollectionHandle = CollectionHandle(0);

    /// Whether this handle names the default collection
    pub fn is_default(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for CollectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_default() {
            write!(f, "<default>")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

impl From<u64> for CollectionHandle {
    fn from(raw: u64) -> Self {
        CollectionHandle(raw)
    }
}

/// Fully-qualified key: collection plus key
///
/// Ordering is (collection, key), which keeps transaction write sets
/// mergeable with ordered collection scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ColKey {
    /// Owning collection
    pub collection: CollectionHandle,
    /// Key within the collection
    pub key: Key,
}

impl ColKey {
    /// Pair up a collection and key
    pub fn new(collection: CollectionHandle, key: Key) -> Self {
        ColKey { collection, key }
    }
}

impl std::fmt::Display for ColKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection, self.key)
    }
}

/// Packed presence bitmaps, one bit per batch task
pub mod bits {
    /// Bytes needed to hold `n` bits
    pub fn bitmap_bytes(n: usize) -> usize {
        n.div_ceil(8)
    }

    /// Read bit `i`
    pub fn get(bits: &[u8], i: usize) -> bool {
        bits[i / 8] & (1u8 << (i % 8)) != 0
    }

    /// Write bit `i`
    pub fn set(bits: &mut [u8], i: usize, value: bool) {
        if value {
            bits[i / 8] |= 1u8 << (i % 8);
        } else {
            bits[i / 8] &= !(1u8 << (i % 8));
        }
    }
}
