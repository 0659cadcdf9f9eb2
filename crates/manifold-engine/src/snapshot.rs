//! Transaction handles and snapshot epoch pins
//!
//! The engine-level [`Txn`] wraps the concurrency crate's transaction
//! context together with an epoch pin: a registration in the database's
//! pin table that blocks pruning of any version a reader at the pinned
//! generation could still observe. Snapshots are read-only transactions,
//! exactly as the call surface treats them; dropping either releases the
//! pin and all buffered state without touching the live store.

use crate::database::DatabaseInner;
use manifold_concurrency::{Transaction, TransactionStatus};
use manifold_core::types::Generation;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Reference-counted registry of pinned generations
#[derive(Debug, Default)]
pub(crate) struct PinRegistry {
    pins: Mutex<BTreeMap<Generation, usize>>,
}

impl PinRegistry {
    pub(crate) fn pin(&self, generation: Generation) {
        *self.pins.lock().entry(generation).or_insert(0) += 1;
    }

    pub(crate) fn unpin(&self, generation: Generation) {
        let mut pins = self.pins.lock();
        if let Some(count) = pins.get_mut(&generation) {
            *count -= 1;
            if *count == 0 {
                pins.remove(&generation);
            }
        }
    }

    /// Active pinned generations, ascending
    pub(crate) fn sorted(&self) -> Vec<Generation> {
        self.pins.lock().keys().copied().collect()
    }
}

/// Keeps one generation pinned for the lifetime of a reader
pub(crate) struct EpochPin {
    db: Arc<DatabaseInner>,
    generation: Generation,
}

impl EpochPin {
    pub(crate) fn new(db: Arc<DatabaseInner>, generation: Generation) -> EpochPin {
        db.pins.pin(generation);
        EpochPin { db, generation }
    }

    pub(crate) fn db(&self) -> &Arc<DatabaseInner> {
        &self.db
    }

    /// Move the pin to a new generation (transaction reset)
    pub(crate) fn repin(&mut self, generation: Generation) {
        self.db.pins.pin(generation);
        self.db.pins.unpin(self.generation);
        self.generation = generation;
    }
}

impl Drop for EpochPin {
    fn drop(&mut self) {
        self.db.pins.unpin(self.generation);
    }
}

/// An open transaction or snapshot
///
/// Obtained from [`crate::Database::begin_transaction`] or
/// [`crate::Database::snapshot`]; passed by mutable reference into every
/// data-path call that should buffer into it. Dropping the handle
/// abandons all buffered state.
pub struct Txn {
    pub(crate) inner: Transaction,
    pub(crate) pin: EpochPin,
}

impl Txn {
    pub(crate) fn new(db: Arc<DatabaseInner>, generation: Generation, read_only: bool) -> Txn {
        Txn {
            inner: Transaction::begin(generation, read_only),
            pin: EpochPin::new(db, generation),
        }
    }

    /// The generation this handle reads at
    pub fn start_generation(&self) -> Generation {
        self.inner.start_generation()
    }

    /// Whether this is a snapshot handle that rejects writes
    pub fn is_read_only(&self) -> bool {
        self.inner.is_read_only()
    }

    /// Current lifecycle state
    pub fn status(&self) -> TransactionStatus {
        self.inner.status()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Buffered write and delete counts, for diagnostics
    pub fn pending(&self) -> (usize, usize) {
        (self.inner.write_set().len(), self.inner.delete_set().len())
    }

    /// Clear all buffers and re-capture the current generation
    ///
    /// This is the only way to reuse a handle after a successful commit,
    /// and the way to base a conflicted transaction on fresh state.
    pub fn reset(&mut self) {
        let generation = self.pin.db().current_generation();
        self.inner.reset(generation);
        self.pin.repin(generation);
    }
}

impl std::fmt::Debug for Txn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Txn")
            .field("start_generation", &self.start_generation())
            .field("read_only", &self.is_read_only())
            .field("status", &self.status())
            .finish()
    }
}
