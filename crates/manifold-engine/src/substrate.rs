//! Batched substrate calls
//!
//! The four operations every modality lowers onto: `read`, `write`,
//! `scan` and `size`. All of them take strided batch arguments, an
//! optional transaction, an option set and the caller's arena; all
//! variable-length outputs are arena tapes with fenced offsets so they
//! drop straight into columnar consumers.
//!
//! Reads run in two passes over the same merged view: the first sizes
//! the tape (and registers watched reads), the second fills it. Scans
//! interleave the transaction's buffered writes with the live keys in
//! sorted order and suppress its buffered deletes.

use crate::database::Database;
use crate::snapshot::Txn;
use manifold_concurrency::{Buffered, Transaction};
use manifold_core::arena::Arena;
use manifold_core::error::{EngineError, Result};
use manifold_core::options::Options;
use manifold_core::strided::{Contents, Strided};
use manifold_core::types::{bits, ColKey, CollectionHandle, Key, LENGTH_MISSING};
use manifold_storage::{persist, RangeStats, Store, ENTRY_OVERHEAD};

/// Batched (collection, key) addressing
#[derive(Debug, Clone, Copy)]
pub struct Places<'a> {
    /// Collection per task; stride zero repeats one collection
    pub collections: Strided<'a, CollectionHandle>,
    /// Key per task
    pub keys: Strided<'a, Key>,
    /// Task count
    pub count: usize,
}

impl<'a> Places<'a> {
    /// All keys in one collection
    pub fn in_collection(collection: CollectionHandle, keys: &'a [Key]) -> Places<'a> {
        Places {
            collections: Strided::Repeat(collection),
            keys: Strided::Slice(keys),
            count: keys.len(),
        }
    }

    fn check(&self) -> Result<()> {
        self.collections.check(self.count, "collections")?;
        self.keys.check(self.count, "keys")
    }

    fn at(&self, i: usize) -> ColKey {
        ColKey::new(self.collections.get(i), self.keys.get(i))
    }
}

/// Batched range-scan tasks
#[derive(Debug, Clone, Copy)]
pub struct ScanTasks<'a> {
    /// Collection per task
    pub collections: Strided<'a, CollectionHandle>,
    /// Inclusive range start per task
    pub start_keys: Strided<'a, Key>,
    /// Exclusive range end per task
    pub end_keys: Strided<'a, Key>,
    /// Maximum keys to emit per task
    pub limits: Strided<'a, u32>,
    /// Task count
    pub count: usize,
}

impl<'a> ScanTasks<'a> {
    /// One whole-collection scan task
    pub fn whole_collection(collection: CollectionHandle, limit: u32) -> ScanTasks<'a> {
        ScanTasks {
            collections: Strided::Repeat(collection),
            start_keys: Strided::Repeat(Key::MIN),
            end_keys: Strided::Repeat(Key::MAX),
            limits: Strided::Repeat(limit),
            count: 1,
        }
    }

    fn check(&self) -> Result<()> {
        self.collections.check(self.count, "collections")?;
        self.start_keys.check(self.count, "start keys")?;
        self.end_keys.check(self.count, "end keys")?;
        self.limits.check(self.count, "limits")
    }
}

/// Batched range-size tasks
#[derive(Debug, Clone, Copy)]
pub struct SizeTasks<'a> {
    /// Collection per task
    pub collections: Strided<'a, CollectionHandle>,
    /// Inclusive range start per task
    pub start_keys: Strided<'a, Key>,
    /// Exclusive range end per task
    pub end_keys: Strided<'a, Key>,
    /// Task count
    pub count: usize,
}

impl<'a> SizeTasks<'a> {
    fn check(&self) -> Result<()> {
        self.collections.check(self.count, "collections")?;
        self.start_keys.check(self.count, "start keys")?;
        self.end_keys.check(self.count, "end keys")
    }
}

/// Output of a batched read
#[derive(Debug)]
pub struct ReadOutput<'a> {
    /// Presence bitmap, one bit per task
    pub presences: &'a [u8],
    /// Byte offset of each value in the tape, plus the trailing total
    pub offsets: &'a [u32],
    /// Value lengths; the missing sentinel marks absent entries
    pub lengths: &'a [u32],
    /// All present values, back to back
    pub values: &'a [u8],
}

impl<'a> ReadOutput<'a> {
    /// Whether task `i` found a value
    pub fn present(&self, i: usize) -> bool {
        bits::get(self.presences, i)
    }

    /// Value bytes of task `i`, `None` when absent
    pub fn value(&self, i: usize) -> Option<&'a [u8]> {
        if !self.present(i) {
            return None;
        }
        let start = self.offsets[i] as usize;
        Some(&self.values[start..start + self.lengths[i] as usize])
    }
}

/// Output of a metadata-only read: presence and lengths, no tape
#[derive(Debug)]
pub struct ReadMeta<'a> {
    /// Presence bitmap, one bit per task
    pub presences: &'a [u8],
    /// Value lengths; the missing sentinel marks absent entries
    pub lengths: &'a [u32],
}

/// Output of a batched scan
#[derive(Debug)]
pub struct ScanOutput<'a> {
    /// Offset of each task's keys in the key tape, plus the trailing total
    pub offsets: &'a [u32],
    /// Keys emitted per task
    pub counts: &'a [u32],
    /// Ascending live keys, task after task
    pub keys: &'a [Key],
}

impl<'a> ScanOutput<'a> {
    /// Keys emitted for task `i`
    pub fn task_keys(&self, i: usize) -> &'a [Key] {
        let start = self.offsets[i] as usize;
        &self.keys[start..start + self.counts[i] as usize]
    }
}

/// Output of a batched size estimate
#[derive(Debug)]
pub struct SizeOutput<'a> {
    /// Lower bound on live entries per task
    pub min_cardinalities: &'a [u64],
    /// Upper bound on live entries per task
    pub max_cardinalities: &'a [u64],
    /// Lower bound on bytes of live values per task
    pub min_value_bytes: &'a [u64],
    /// Upper bound on bytes of live values per task
    pub max_value_bytes: &'a [u64],
    /// Lower bound on total footprint per task
    pub min_space_usages: &'a [u64],
    /// Upper bound on total footprint per task
    pub max_space_usages: &'a [u64],
}

/// Resolve the bytes one task observes through the merged view
fn resolve<'s>(
    store: &'s Store,
    txn: Option<&'s Transaction>,
    at: ColKey,
) -> Result<Option<&'s [u8]>> {
    match txn {
        Some(txn) => match txn.buffered(at) {
            Some(Buffered::Written(bytes)) => Ok(Some(bytes)),
            Some(Buffered::Deleted) => Ok(None),
            None => Ok(store
                .collection(at.collection)?
                .cell(at.key)
                .and_then(|cell| cell.bytes_at(txn.start_generation()))),
        },
        None => Ok(store
            .collection(at.collection)?
            .cell(at.key)
            .and_then(|cell| cell.latest().visible_bytes())),
    }
}

impl Database {
    fn reject_shared_memory(options: Options) -> Result<()> {
        if options.shared_memory_output() {
            Err(EngineError::unsupported(
                "shared-memory outputs are not available on this backend",
            ))
        } else {
            Ok(())
        }
    }

    /// Batched point read
    pub fn read<'a>(
        &self,
        mut txn: Option<&mut Txn>,
        places: &Places<'_>,
        options: Options,
        arena: &'a mut Arena,
    ) -> Result<ReadOutput<'a>> {
        Self::reject_shared_memory(options)?;
        places.check()?;
        if let Some(txn) = &txn {
            txn.inner.ensure_active()?;
        }
        arena.begin_call(options.dont_discard_arena());
        let arena = &*arena;

        let count = places.count;
        let presences = arena.alloc_slice::<u8>(bits::bitmap_bytes(count))?;
        let lengths = arena.alloc_slice::<u32>(count)?;
        let offsets = arena.alloc_slice::<u32>(count + 1)?;

        let store = self.inner.store.read();

        // First pass: presence and lengths; watched reads register here.
        let mut total = 0usize;
        for i in 0..count {
            let at = places.at(i);
            let length = match &mut txn {
                Some(txn) => match txn.inner.buffered(at) {
                    Some(Buffered::Written(bytes)) => Some(bytes.len()),
                    Some(Buffered::Deleted) => None,
                    None => {
                        let entry = store
                            .collection(at.collection)?
                            .cell(at.key)
                            .and_then(|cell| cell.visible_at(txn.inner.start_generation()));
                        let observed = entry.map(|e| e.generation).unwrap_or(0);
                        if !options.dont_watch() && !txn.inner.is_read_only() {
                            txn.inner.record_read(at, observed);
                        }
                        entry.and_then(|e| e.visible_bytes()).map(|b| b.len())
                    }
                },
                None => resolve(&store, None, at)?.map(|b| b.len()),
            };
            match length {
                Some(length) => {
                    bits::set(presences, i, true);
                    lengths[i] = length as u32;
                    total += length;
                }
                None => lengths[i] = LENGTH_MISSING,
            }
        }

        // Second pass: fill the tape through the same merged view.
        let values = arena.alloc_slice::<u8>(total)?;
        let txn_view: Option<&Transaction> = txn.as_ref().map(|t| &t.inner);
        let mut progress = 0usize;
        for i in 0..count {
            offsets[i] = progress as u32;
            if let Some(bytes) = resolve(&store, txn_view, places.at(i))? {
                values[progress..progress + bytes.len()].copy_from_slice(bytes);
                progress += bytes.len();
            }
        }
        offsets[count] = progress as u32;

        Ok(ReadOutput {
            presences,
            offsets,
            lengths,
            values,
        })
    }

    /// Batched presence and length read, skipping the value tape
    pub fn read_meta<'a>(
        &self,
        mut txn: Option<&mut Txn>,
        places: &Places<'_>,
        options: Options,
        arena: &'a mut Arena,
    ) -> Result<ReadMeta<'a>> {
        Self::reject_shared_memory(options)?;
        places.check()?;
        if let Some(txn) = &txn {
            txn.inner.ensure_active()?;
        }
        arena.begin_call(options.dont_discard_arena());
        let arena = &*arena;

        let count = places.count;
        let presences = arena.alloc_slice::<u8>(bits::bitmap_bytes(count))?;
        let lengths = arena.alloc_slice::<u32>(count)?;

        let store = self.inner.store.read();
        for i in 0..count {
            let at = places.at(i);
            let length = match &mut txn {
                Some(txn) => match txn.inner.buffered(at) {
                    Some(Buffered::Written(bytes)) => Some(bytes.len()),
                    Some(Buffered::Deleted) => None,
                    None => {
                        let entry = store
                            .collection(at.collection)?
                            .cell(at.key)
                            .and_then(|cell| cell.visible_at(txn.inner.start_generation()));
                        let observed = entry.map(|e| e.generation).unwrap_or(0);
                        if !options.dont_watch() && !txn.inner.is_read_only() {
                            txn.inner.record_read(at, observed);
                        }
                        entry.and_then(|e| e.visible_bytes()).map(|b| b.len())
                    }
                },
                None => resolve(&store, None, at)?.map(|b| b.len()),
            };
            match length {
                Some(length) => {
                    bits::set(presences, i, true);
                    lengths[i] = length as u32;
                }
                None => lengths[i] = LENGTH_MISSING,
            }
        }

        Ok(ReadMeta { presences, lengths })
    }

    /// Batched write; a resolved `None` payload deletes
    pub fn write(
        &self,
        txn: Option<&mut Txn>,
        places: &Places<'_>,
        contents: &Contents<'_>,
        options: Options,
    ) -> Result<()> {
        places.check()?;
        contents.check(places.count)?;

        match txn {
            Some(txn) => {
                txn.inner.ensure_active()?;
                for i in 0..places.count {
                    txn.inner.stage(places.at(i), contents.resolve(i)?)?;
                }
                Ok(())
            }
            None => {
                let pins = self.pins();
                let mut store = self.inner.store.write();
                for collection in places.collections.iter(places.count) {
                    store.collection(collection)?;
                }
                let generation = self.next_generation();
                for i in 0..places.count {
                    let at = places.at(i);
                    let bytes = contents.resolve(i)?;
                    let collection = store.collection_mut(at.collection)?;
                    collection.apply(at.key, generation, bytes);
                    collection.prune_key(at.key, &pins);
                }
                if options.flush_on_write() {
                    if let Some(directory) = self.inner.config.directory() {
                        persist::save_store(&store, u64::MAX, directory)?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Batched ordered scan of live keys
    ///
    /// Keys come out ascending within each task; buffered transaction
    /// writes interleave in sorted order and buffered deletes are
    /// suppressed. Scans do not register watched reads.
    pub fn scan<'a>(
        &self,
        txn: Option<&Txn>,
        tasks: &ScanTasks<'_>,
        options: Options,
        arena: &'a mut Arena,
    ) -> Result<ScanOutput<'a>> {
        Self::reject_shared_memory(options)?;
        tasks.check()?;
        if let Some(txn) = txn {
            txn.inner.ensure_active()?;
        }
        arena.begin_call(options.dont_discard_arena());
        let arena = &*arena;

        let count = tasks.count;
        let offsets = arena.alloc_slice::<u32>(count + 1)?;
        let counts = arena.alloc_slice::<u32>(count)?;
        let capacity: usize = tasks.limits.iter(count).map(|l| l as usize).sum();
        let keys = arena.alloc_slice::<Key>(capacity)?;

        let store = self.inner.store.read();
        let txn_view = txn.map(|t| &t.inner);

        let mut cursor = 0usize;
        for i in 0..count {
            offsets[i] = cursor as u32;
            let collection = tasks.collections.get(i);
            let start = tasks.start_keys.get(i);
            let end = tasks.end_keys.get(i);
            if start > end {
                return Err(EngineError::invalid_argument(format!(
                    "scan range {}..{} is inverted",
                    start, end
                )));
            }
            let limit = tasks.limits.get(i) as usize;
            let col = store.collection(collection)?;

            let mut emitted = 0usize;
            match txn_view {
                None => {
                    for (key, cell) in col.range(start, end) {
                        if emitted == limit {
                            break;
                        }
                        if cell.latest().visible_bytes().is_some() {
                            keys[cursor + emitted] = key;
                            emitted += 1;
                        }
                    }
                }
                Some(txn) => {
                    let generation = txn.start_generation();
                    let mut base = col
                        .range(start, end)
                        .filter(|(_, cell)| cell.bytes_at(generation).is_some())
                        .map(|(key, _)| key)
                        .peekable();
                    let mut staged = txn
                        .writes_in_range(collection, start, end)
                        .map(|(key, _)| key)
                        .peekable();

                    while emitted < limit {
                        let next = match (base.peek().copied(), staged.peek().copied()) {
                            (Some(live), Some(written)) => {
                                if written < live {
                                    staged.next();
                                    Some(written)
                                } else if written == live {
                                    base.next();
                                    staged.next();
                                    Some(written)
                                } else {
                                    base.next();
                                    if txn.is_deleted(ColKey::new(collection, live)) {
                                        continue;
                                    }
                                    Some(live)
                                }
                            }
                            (Some(live), None) => {
                                base.next();
                                if txn.is_deleted(ColKey::new(collection, live)) {
                                    continue;
                                }
                                Some(live)
                            }
                            (None, Some(written)) => {
                                staged.next();
                                Some(written)
                            }
                            (None, None) => None,
                        };
                        match next {
                            Some(key) => {
                                keys[cursor + emitted] = key;
                                emitted += 1;
                            }
                            None => break,
                        }
                    }
                }
            }
            counts[i] = emitted as u32;
            cursor += emitted;
        }
        offsets[count] = cursor as u32;

        Ok(ScanOutput {
            offsets,
            counts,
            keys: &keys[..cursor],
        })
    }

    /// Batched range-size estimates
    pub fn size<'a>(
        &self,
        txn: Option<&Txn>,
        tasks: &SizeTasks<'_>,
        options: Options,
        arena: &'a mut Arena,
    ) -> Result<SizeOutput<'a>> {
        Self::reject_shared_memory(options)?;
        tasks.check()?;
        arena.begin_call(options.dont_discard_arena());
        let arena = &*arena;

        let count = tasks.count;
        let min_cardinalities = arena.alloc_slice::<u64>(count)?;
        let max_cardinalities = arena.alloc_slice::<u64>(count)?;
        let min_value_bytes = arena.alloc_slice::<u64>(count)?;
        let max_value_bytes = arena.alloc_slice::<u64>(count)?;
        let min_space_usages = arena.alloc_slice::<u64>(count)?;
        let max_space_usages = arena.alloc_slice::<u64>(count)?;

        let store = self.inner.store.read();
        for i in 0..count {
            let collection = tasks.collections.get(i);
            let start = tasks.start_keys.get(i);
            let end = tasks.end_keys.get(i);
            if start > end {
                return Err(EngineError::invalid_argument(format!(
                    "size range {}..{} is inverted",
                    start, end
                )));
            }
            let stats: RangeStats = store.collection(collection)?.range_stats(start, end);

            let (staged_count, staged_bytes, staged_dead) = match txn {
                Some(txn) => {
                    let mut staged_count = 0u64;
                    let mut staged_bytes = 0u64;
                    for (_, bytes) in txn.inner.writes_in_range(collection, start, end) {
                        staged_count += 1;
                        staged_bytes += bytes.len() as u64;
                    }
                    let staged_dead = txn.inner.deletes_in_range(collection, start, end).count();
                    (staged_count, staged_bytes, staged_dead as u64)
                }
                None => (0, 0, 0),
            };

            min_cardinalities[i] = stats.live;
            max_cardinalities[i] = stats.live + staged_count;
            min_value_bytes[i] = stats.live_bytes;
            max_value_bytes[i] = stats.live_bytes + staged_bytes;
            min_space_usages[i] = stats.live * ENTRY_OVERHEAD + stats.live_bytes;
            max_space_usages[i] = (stats.live + staged_count + stats.dead + staged_dead)
                * ENTRY_OVERHEAD
                + stats.live_bytes
                + staged_bytes;
        }

        Ok(SizeOutput {
            min_cardinalities,
            max_cardinalities,
            min_value_bytes,
            max_value_bytes,
            min_space_usages,
            max_space_usages,
        })
    }
}
