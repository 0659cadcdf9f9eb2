//! Per-call option flags
//!
//! Every data-path call accepts an [`Options`] set. Flags compose with
//! the `|` operator:
//!
//! ```
//! use manifold_core::options::Options;
//!
//! let opts = Options::FLUSH_ON_WRITE | Options::DONT_WATCH;
//! assert!(opts.flush_on_write());
//! assert!(opts.dont_watch());
//! assert!(!opts.dont_discard_arena());
//! ```

/// Bit set of per-call options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Options(u32);

impl Options {
    /// No options
    pub const NONE: Options = Options(0);

    /// Synchronously persist collections to disk before returning
    pub const FLUSH_ON_WRITE: Options = Options(1 << 0);

    /// Do not register this read into the transaction's read set
    pub const DONT_WATCH: Options = Options(1 << 1);

    /// Append outputs to the arena instead of resetting it first
    pub const DONT_DISCARD_ARENA: Options = Options(1 << 2);

    /// Place outputs in memory mappable by other processes
    ///
    /// Recognized, but unsupported by this backend.
    pub const SHARED_MEMORY_OUTPUT: Options = Options(1 << 3);

    /// Check whether all bits of `other` are present
    pub fn contains(self, other: Options) -> bool {
        self.0 & other.0 == other.0
    }

    /// Raw bit representation
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Rebuild from raw bits; unknown bits are preserved but ignored
    pub fn from_bits(bits: u32) -> Options {
        Options(bits)
    }

    /// Whether the flush-on-write bit is set
    pub fn flush_on_write(self) -> bool {
        self.contains(Options::FLUSH_ON_WRITE)
    }

    /// Whether the do-not-watch bit is set
    pub fn dont_watch(self) -> bool {
        self.contains(Options::DONT_WATCH)
    }

    /// Whether the do-not-discard-arena bit is set
    pub fn dont_discard_arena(self) -> bool {
        self.contains(Options::DONT_DISCARD_ARENA)
    }

    /// Whether the shared-memory-output bit is set
    pub fn shared_memory_output(self) -> bool {
        self.contains(Options::SHARED_MEMORY_OUTPUT)
    }
}

impl std::ops::BitOr for Options {
    type Output = Options;

    fn bitor(self, rhs: Options) -> Options {
        Options(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Options {
    fn bitor_assign(&mut self, rhs: Options) {
        self.0 |= rhs.0;
    }
}
