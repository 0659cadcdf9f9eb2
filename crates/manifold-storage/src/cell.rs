//! Versioned value cells
//!
//! Every key maps to a [`ValueCell`]: a short chain of versions ordered
//! by generation, newest last. HEAD reads serve the newest version;
//! snapshot and transaction reads serve the newest version at or below
//! their captured generation. Deletes append tombstones rather than
//! erasing, so older snapshots stay serviceable; superseded versions are
//! pruned under the write lock once no snapshot pins them.

use manifold_core::types::Generation;

/// One version of a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionEntry {
    /// Generation this version was written at
    pub generation: Generation,
    /// Deletion marker; a tombstoned version is invisible to reads
    pub tombstone: bool,
    /// Payload; empty for tombstones and for zero-length live values
    pub bytes: Vec<u8>,
}

impl VersionEntry {
    /// Bytes visible through this version, `None` when tombstoned
    pub fn visible_bytes(&self) -> Option<&[u8]> {
        if self.tombstone {
            None
        } else {
            Some(&self.bytes)
        }
    }
}

/// A key's version chain
#[derive(Debug, Clone, Default)]
pub struct ValueCell {
    versions: Vec<VersionEntry>,
}

impl ValueCell {
    /// Cell born from a single version
    pub fn new(generation: Generation, bytes: Option<&[u8]>) -> ValueCell {
        let mut cell = ValueCell::default();
        cell.push(generation, bytes);
        cell
    }

    /// Append a version; `None` bytes append a tombstone
    ///
    /// Writing at the generation of the newest version replaces it in
    /// place, which is how a HEAD batch updates one key twice under a
    /// single generation.
    pub fn push(&mut self, generation: Generation, bytes: Option<&[u8]>) {
        let entry = VersionEntry {
            generation,
            tombstone: bytes.is_none(),
            bytes: bytes.map(|b| b.to_vec()).unwrap_or_default(),
        };
        match self.versions.last_mut() {
            Some(last) if last.generation == generation => *last = entry,
            Some(last) => {
                debug_assert!(last.generation < generation);
                self.versions.push(entry);
            }
            None => self.versions.push(entry),
        }
    }

    /// The newest version
    pub fn latest(&self) -> &VersionEntry {
        self.versions.last().expect("cells are never empty")
    }

    /// Generation of the newest version
    pub fn generation(&self) -> Generation {
        self.latest().generation
    }

    /// Whether the newest version is live
    pub fn is_live(&self) -> bool {
        !self.latest().tombstone
    }

    /// Newest version at or below `generation`
    pub fn visible_at(&self, generation: Generation) -> Option<&VersionEntry> {
        self.versions
            .iter()
            .rev()
            .find(|entry| entry.generation <= generation)
    }

    /// Bytes a reader pinned to `generation` sees, `None` when absent
    pub fn bytes_at(&self, generation: Generation) -> Option<&[u8]> {
        self.visible_at(generation).and_then(|e| e.visible_bytes())
    }

    /// Number of retained versions
    pub fn version_count(&self) -> usize {
        self.versions.len()
    }

    /// Drop versions no pinned snapshot can observe
    ///
    /// `pins` are the active snapshot generations, sorted ascending. A
    /// non-newest version survives only if some pin lands in its
    /// visibility window `[generation, next.generation)`. Returns true
    /// when the cell has collapsed to a single tombstone and may be
    /// removed from the collection outright.
    pub fn prune(&mut self, pins: &[Generation]) -> bool {
        if self.versions.len() > 1 {
            let mut kept = Vec::with_capacity(self.versions.len());
            for i in 0..self.versions.len() {
                let is_last = i + 1 == self.versions.len();
                if is_last || pinned_within(pins, self.versions[i].generation, self.versions[i + 1].generation)
                {
                    kept.push(self.versions[i].clone());
                }
            }
            self.versions = kept;
        }
        self.versions.len() == 1 && self.versions[0].tombstone
    }
}

/// Whether a sorted pin list contains a generation in `[low, high)`
fn pinned_within(pins: &[Generation], low: Generation, high: Generation) -> bool {
    let idx = pins.partition_point(|pin| *pin < low);
    pins.get(idx).is_some_and(|pin| *pin < high)
}
