//! The database handle
//!
//! A [`Database`] owns one [`Store`] behind the global readers-writer
//! lock, the atomic generation counter that versions every write, the
//! snapshot pin table, and the persistence configuration. Handles are
//! cheap clones of one shared instance; collections, transactions and
//! modality facades all borrow from it.
//!
//! ## Locking
//!
//! Reads take the lock shared; writes and commits take it exclusive.
//! The generation counter is atomic and may advance outside the lock.
//! Snapshot pins are kept in a side table so pruning under the write
//! lock never has to wait on readers.

use crate::config::DatabaseConfig;
use crate::modalities::{Blobs, Docs, Graph, Paths, Vectors};
use crate::snapshot::{PinRegistry, Txn};
use manifold_concurrency::{apply_transaction, validate_transaction, CommitOutcome};
use manifold_core::arena::Arena;
use manifold_core::error::{EngineError, Result};
use manifold_core::options::Options;
use manifold_core::types::{ColKey, CollectionHandle, Generation, Key};
use manifold_storage::{persist, CollectionConfig, DropMode, Store, VectorSpec};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) struct DatabaseInner {
    pub(crate) store: RwLock<Store>,
    pub(crate) generation: AtomicU64,
    pub(crate) pins: PinRegistry,
    pub(crate) config: DatabaseConfig,
}

impl DatabaseInner {
    pub(crate) fn current_generation(&self) -> Generation {
        self.generation.load(Ordering::SeqCst)
    }

    fn persist(&self) -> Result<()> {
        if let Some(directory) = self.config.directory() {
            let store = self.store.read();
            persist::save_store(&store, u64::MAX, directory)?;
        }
        Ok(())
    }
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        if self.config.directory().is_some() {
            if let Err(err) = self.persist() {
                warn!(error = %err, "failed to persist store on close");
            }
        }
    }
}

/// Handle to one open database
///
/// Clones share the same underlying state. The database persists itself
/// on close when a directory is configured.
#[derive(Clone)]
pub struct Database {
    pub(crate) inner: Arc<DatabaseInner>,
}

impl Database {
    /// Open a database with the given configuration
    ///
    /// With a configured directory, the directory is created when
    /// missing and any collection files in it are loaded; loaded cells
    /// carry generation zero.
    pub fn open(config: DatabaseConfig) -> Result<Database> {
        let store = match config.directory() {
            Some(directory) => {
                std::fs::create_dir_all(directory)?;
                let store = persist::load_store(directory)?;
                info!(directory = %directory.display(), "opened persistent database");
                store
            }
            None => Store::default(),
        };
        Ok(Database {
            inner: Arc::new(DatabaseInner {
                store: RwLock::new(store),
                generation: AtomicU64::new(0),
                pins: PinRegistry::default(),
                config,
            }),
        })
    }

    /// Open a purely in-memory database with default configuration
    pub fn in_memory() -> Database {
        Database::open(DatabaseConfig::default()).expect("in-memory open cannot fail")
    }

    /// This database's configuration
    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    /// The current generation
    pub fn generation(&self) -> Generation {
        self.inner.current_generation()
    }

    /// Assign the next generation
    pub(crate) fn next_generation(&self) -> Generation {
        self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Active snapshot pins, sorted ascending
    pub(crate) fn pins(&self) -> Vec<Generation> {
        self.inner.pins.sorted()
    }

    fn ensure_transactions_enabled(&self) -> Result<()> {
        if self.inner.config.transactions_enabled() {
            Ok(())
        } else {
            Err(EngineError::unsupported(
                "transactions are disabled on this database",
            ))
        }
    }

    // ======================== transactions ========================

    /// Begin an optimistic transaction at the current generation
    pub fn begin_transaction(&self) -> Result<Txn> {
        self.ensure_transactions_enabled()?;
        Ok(Txn::new(
            Arc::clone(&self.inner),
            self.inner.current_generation(),
            false,
        ))
    }

    /// Take a read-only snapshot of the current generation
    ///
    /// A snapshot is a transaction that rejects writes; it pins its
    /// generation so the versions it observes survive pruning until the
    /// handle is dropped.
    pub fn snapshot(&self) -> Result<Txn> {
        self.ensure_transactions_enabled()?;
        Ok(Txn::new(
            Arc::clone(&self.inner),
            self.inner.current_generation(),
            true,
        ))
    }

    /// Validate and apply a transaction
    ///
    /// On conflict the transaction stays active with its buffers intact,
    /// so the caller may retry the commit or [`Txn::reset`] first. After
    /// a successful commit the handle must be reset before reuse.
    pub fn commit(&self, txn: &mut Txn, options: Options) -> Result<CommitOutcome> {
        txn.inner.ensure_active()?;

        let pins = self.pins();
        let mut store = self.inner.store.write();

        let validation = validate_transaction(&txn.inner, &store);
        if let Some(conflict) = validation.first() {
            return Err(EngineError::Conflict {
                kind: conflict.kind,
                collection: conflict.at.collection,
                key: conflict.at.key,
                observed: conflict.observed,
                current: conflict.current,
            });
        }

        // Every staged collection must still exist before anything is
        // applied, or a half-applied batch could leak through.
        for at in txn
            .inner
            .write_set()
            .keys()
            .chain(txn.inner.delete_set().iter())
        {
            store.collection(at.collection)?;
        }

        let generation = self.next_generation();
        let outcome = apply_transaction(&txn.inner, &mut store, generation)?;

        for at in txn
            .inner
            .write_set()
            .keys()
            .chain(txn.inner.delete_set().iter())
        {
            if let Ok(collection) = store.collection_mut(at.collection) {
                collection.prune_key(at.key, &pins);
            }
        }
        txn.inner.mark_committed();

        if options.flush_on_write() {
            if let Some(directory) = self.inner.config.directory() {
                persist::save_store(&store, u64::MAX, directory)?;
            }
        }
        Ok(outcome)
    }

    /// Run a closure in a transaction, retrying on conflict
    ///
    /// The closure may run several times; it must not have side effects
    /// beyond the transaction it is handed. This is the path the graph
    /// modality uses for HEAD mutations.
    pub fn transaction<T>(&self, mut f: impl FnMut(&mut Txn) -> Result<T>) -> Result<T> {
        let mut txn = self.begin_transaction()?;
        let retries = self.inner.config.transaction_retries();
        let mut attempt = 0;
        loop {
            let result = f(&mut txn)
                .and_then(|value| self.commit(&mut txn, Options::NONE).map(|_| value));
            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_conflict() && attempt + 1 < retries => {
                    attempt += 1;
                    txn.reset();
                }
                Err(err) => return Err(err),
            }
        }
    }

    // ======================== point conveniences ========================

    /// Read one value; watched when inside a transaction
    pub fn get(
        &self,
        txn: Option<&mut Txn>,
        collection: CollectionHandle,
        key: Key,
    ) -> Result<Option<Vec<u8>>> {
        self.get_with(txn, collection, key, Options::NONE)
    }

    /// Read one value, honoring the do-not-watch option
    pub fn get_with(
        &self,
        txn: Option<&mut Txn>,
        collection: CollectionHandle,
        key: Key,
        options: Options,
    ) -> Result<Option<Vec<u8>>> {
        let at = ColKey::new(collection, key);
        match txn {
            Some(txn) => {
                txn.inner.ensure_active()?;
                if let Some(buffered) = txn.inner.buffered(at) {
                    return Ok(match buffered {
                        manifold_concurrency::Buffered::Written(bytes) => Some(bytes.to_vec()),
                        manifold_concurrency::Buffered::Deleted => None,
                    });
                }
                let (observed, value) = {
                    let store = self.inner.store.read();
                    let collection = store.collection(at.collection)?;
                    match collection
                        .cell(at.key)
                        .and_then(|cell| cell.visible_at(txn.inner.start_generation()))
                    {
                        Some(entry) => (
                            entry.generation,
                            entry.visible_bytes().map(|b| b.to_vec()),
                        ),
                        None => (0, None),
                    }
                };
                if !options.dont_watch() && !txn.inner.is_read_only() {
                    txn.inner.record_read(at, observed);
                }
                Ok(value)
            }
            None => {
                let store = self.inner.store.read();
                let collection = store.collection(at.collection)?;
                Ok(collection
                    .cell(at.key)
                    .and_then(|cell| cell.latest().visible_bytes())
                    .map(|b| b.to_vec()))
            }
        }
    }

    /// Read one value as visible at a pinned generation, unwatched
    pub(crate) fn read_at(
        &self,
        collection: CollectionHandle,
        key: Key,
        generation: Generation,
    ) -> Result<Option<Vec<u8>>> {
        let store = self.inner.store.read();
        Ok(store
            .collection(collection)?
            .cell(key)
            .and_then(|cell| cell.bytes_at(generation))
            .map(|b| b.to_vec()))
    }

    /// Write (`Some`) or delete (`None`) one value
    pub fn put(
        &self,
        txn: Option<&mut Txn>,
        collection: CollectionHandle,
        key: Key,
        value: Option<&[u8]>,
    ) -> Result<()> {
        let at = ColKey::new(collection, key);
        match txn {
            Some(txn) => txn.inner.stage(at, value),
            None => {
                let pins = self.pins();
                let mut store = self.inner.store.write();
                store.collection(collection)?;
                let generation = self.next_generation();
                let target = store.collection_mut(collection)?;
                target.apply(key, generation, value);
                target.prune_key(key, &pins);
                Ok(())
            }
        }
    }

    // ======================== collection registry ========================

    fn ensure_named_enabled(&self) -> Result<()> {
        if self.inner.config.named_collections_enabled() {
            Ok(())
        } else {
            Err(EngineError::unsupported(
                "named collections are disabled on this database",
            ))
        }
    }

    /// Create a named collection; fails if the name exists
    pub fn create_collection(
        &self,
        name: &str,
        config: CollectionConfig,
    ) -> Result<CollectionHandle> {
        self.ensure_named_enabled()?;
        self.inner.store.write().create(name, config)
    }

    /// Open a collection by name, creating it if absent
    ///
    /// The empty name resolves to the default collection.
    pub fn open_or_create_collection(
        &self,
        name: &str,
        config: CollectionConfig,
    ) -> Result<CollectionHandle> {
        if !name.is_empty() {
            self.ensure_named_enabled()?;
        }
        self.inner.store.write().open_or_create(name, config)
    }

    /// Look up a named collection without creating it
    pub fn collection_named(&self, name: &str) -> Option<CollectionHandle> {
        self.inner.store.read().handle_of(name)
    }

    /// A collection's declared configuration
    pub fn collection_config(&self, handle: CollectionHandle) -> Result<CollectionConfig> {
        Ok(*self.inner.store.read().collection(handle)?.config())
    }

    /// Fix a collection's vector shape
    ///
    /// Declaring the same shape again is a no-op; declaring a different
    /// one is an argument error.
    pub fn declare_vector_spec(&self, handle: CollectionHandle, spec: VectorSpec) -> Result<()> {
        let mut store = self.inner.store.write();
        let collection = store.collection_mut(handle)?;
        match collection.config().vector {
            None => {
                collection.config_mut().vector = Some(spec);
                Ok(())
            }
            Some(existing) if existing == spec => Ok(()),
            Some(existing) => Err(EngineError::invalid_argument(format!(
                "collection {} already declares {}x{:?}",
                handle, existing.dimensions, existing.dtype
            ))),
        }
    }

    /// Drop collection state per the requested mode
    pub fn drop_collection(&self, handle: CollectionHandle, mode: DropMode) -> Result<()> {
        let mut store = self.inner.store.write();
        let generation = self.next_generation();
        store.drop_collection(handle, mode, generation)
    }

    /// List named collections as (handle, name), sorted by name
    pub fn list_collections(&self) -> Vec<(CollectionHandle, String)> {
        self.inner
            .store
            .read()
            .list()
            .into_iter()
            .map(|(handle, name)| (handle, name.to_string()))
            .collect()
    }

    /// List named collections into an arena-backed tape
    ///
    /// Names are NUL-terminated and concatenated; `offsets` carries one
    /// entry per collection plus the trailing total.
    pub fn list_collections_in<'a>(&self, arena: &'a mut Arena) -> Result<CollectionListing<'a>> {
        arena.begin_call(false);
        let arena = &*arena;
        let store = self.inner.store.read();
        let listing = store.list();

        let handles = arena.alloc_slice::<u64>(listing.len())?;
        let offsets = arena.alloc_slice::<u32>(listing.len() + 1)?;
        let total: usize = listing.iter().map(|(_, name)| name.len() + 1).sum();
        let names = arena.alloc_slice::<u8>(total)?;

        let mut cursor = 0usize;
        for (i, (handle, name)) in listing.iter().enumerate() {
            handles[i] = handle.0;
            offsets[i] = cursor as u32;
            names[cursor..cursor + name.len()].copy_from_slice(name.as_bytes());
            // NUL terminator already zeroed by the arena.
            cursor += name.len() + 1;
        }
        offsets[listing.len()] = cursor as u32;

        Ok(CollectionListing {
            count: listing.len(),
            handles,
            offsets,
            names,
        })
    }

    // ======================== persistence ========================

    /// Synchronously persist every collection
    ///
    /// A no-op when no directory is configured.
    pub fn flush(&self) -> Result<()> {
        self.inner.persist()
    }

    /// Export the state a snapshot observes into a directory
    ///
    /// The exported directory uses the regular disk layout and is stable
    /// against HEAD mutations that happen after the snapshot was taken.
    pub fn export_snapshot(&self, snapshot: &Txn, directory: &std::path::Path) -> Result<()> {
        std::fs::create_dir_all(directory)?;
        let store = self.inner.store.read();
        persist::save_store(&store, snapshot.start_generation(), directory)?;
        info!(directory = %directory.display(), generation = snapshot.start_generation(), "exported snapshot");
        Ok(())
    }

    // ======================== modalities ========================

    /// The blob modality over this database
    pub fn blobs(&self) -> Blobs {
        Blobs::new(self.clone())
    }

    /// The graph modality over this database
    pub fn graph(&self) -> Graph {
        Graph::new(self.clone())
    }

    /// The document modality over this database
    pub fn docs(&self) -> Docs {
        Docs::new(self.clone())
    }

    /// The paths modality over this database
    pub fn paths(&self) -> Paths {
        Paths::new(self.clone())
    }

    /// The vectors modality over this database
    pub fn vectors(&self) -> Vectors {
        Vectors::new(self.clone())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("generation", &self.generation())
            .field("persistent", &self.inner.config.directory().is_some())
            .finish()
    }
}

/// Named collections listed into an arena
#[derive(Debug)]
pub struct CollectionListing<'a> {
    /// Number of named collections
    pub count: usize,
    /// Collection handles, parallel to the name offsets
    pub handles: &'a [u64],
    /// Byte offset of each name in the tape, plus the trailing total
    pub offsets: &'a [u32],
    /// NUL-terminated names, concatenated
    pub names: &'a [u8],
}

impl<'a> CollectionListing<'a> {
    /// The i-th collection name
    pub fn name(&self, i: usize) -> &'a str {
        let start = self.offsets[i] as usize;
        let end = self.offsets[i + 1] as usize - 1;
        std::str::from_utf8(&self.names[start..end]).unwrap_or("")
    }
}
