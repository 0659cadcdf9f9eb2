//! Transaction contexts for optimistic concurrency control
//!
//! A [`Transaction`] buffers every read, write and delete until commit.
//! Nothing it does is visible to other readers before then; at commit
//! the engine validates the buffers against the live store under the
//! exclusive lock and applies them at a fresh generation.
//!
//! ## Read-your-writes
//!
//! Reading a key inside a transaction consults, in order: the write set
//! (own uncommitted write), the delete set (own uncommitted delete reads
//! as absent), then the substrate at or before the transaction's start
//! generation.
//!
//! ## Watch policy
//!
//! Substrate reads register `(collection, key) → observed generation`
//! into the read set unless the call passed the do-not-watch option.
//! Watched reads are what commit-time validation defends; unwatched
//! reads trade that protection away for fewer conflicts.

use manifold_core::error::{EngineError, Result};
use manifold_core::types::{ColKey, CollectionHandle, Generation, Key};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Lifecycle state of a transaction
///
/// `Active → Committed` on a successful commit; a failed commit leaves
/// the transaction `Active` with its buffers intact so the caller may
/// retry or `reset`. There is no aborted state: abandoning a transaction
/// is dropping it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Executing; reads and writes are accepted
    Active,
    /// Commit succeeded; only `reset` revives the handle
    Committed,
}

impl TransactionStatus {
    /// State name used in diagnostics
    pub fn name(self) -> &'static str {
        match self {
            TransactionStatus::Active => "active",
            TransactionStatus::Committed => "committed",
        }
    }
}

/// What a transaction has buffered for one key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Buffered<'a> {
    /// The transaction wrote these bytes
    Written(&'a [u8]),
    /// The transaction deleted the key
    Deleted,
}

/// An optimistic transaction, or a read-only snapshot of one generation
pub struct Transaction {
    start_generation: Generation,
    read_only: bool,
    status: TransactionStatus,
    read_set: HashMap<ColKey, Generation>,
    write_set: BTreeMap<ColKey, Vec<u8>>,
    delete_set: BTreeSet<ColKey>,
}

impl Transaction {
    /// Begin a transaction at a captured generation
    pub fn begin(start_generation: Generation, read_only: bool) -> Transaction {
        Transaction {
            start_generation,
            read_only,
            status: TransactionStatus::Active,
            read_set: HashMap::new(),
            write_set: BTreeMap::new(),
            delete_set: BTreeSet::new(),
        }
    }

    /// The generation this transaction reads at
    pub fn start_generation(&self) -> Generation {
        self.start_generation
    }

    /// Whether this is a snapshot transaction that rejects writes
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Current lifecycle state
    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    /// Refuse operations on a transaction that already committed
    pub fn ensure_active(&self) -> Result<()> {
        match self.status {
            TransactionStatus::Active => Ok(()),
            TransactionStatus::Committed => Err(EngineError::TransactionState {
                state: self.status.name(),
                message: "reset the transaction before reusing it".to_string(),
            }),
        }
    }

    /// Buffer a write (`Some`) or delete (`None`) for one key
    ///
    /// Writing a key clears any buffered delete of it and vice versa;
    /// the two sets stay disjoint per key.
    pub fn stage(&mut self, at: ColKey, bytes: Option<&[u8]>) -> Result<()> {
        self.ensure_active()?;
        if self.read_only {
            return Err(EngineError::TransactionState {
                state: "read-only",
                message: "snapshot transactions reject writes".to_string(),
            });
        }
        match bytes {
            Some(bytes) => {
                self.delete_set.remove(&at);
                self.write_set.insert(at, bytes.to_vec());
            }
            None => {
                self.write_set.remove(&at);
                self.delete_set.insert(at);
            }
        }
        Ok(())
    }

    /// What this transaction has buffered for a key, if anything
    pub fn buffered(&self, at: ColKey) -> Option<Buffered<'_>> {
        if let Some(bytes) = self.write_set.get(&at) {
            return Some(Buffered::Written(bytes));
        }
        if self.delete_set.contains(&at) {
            return Some(Buffered::Deleted);
        }
        None
    }

    /// Register a watched read and its observed generation
    ///
    /// Re-reading a key keeps the first observation: generations seen
    /// through one transaction are monotonically non-decreasing, so the
    /// earliest is the strictest to validate against.
    pub fn record_read(&mut self, at: ColKey, observed: Generation) {
        self.read_set.entry(at).or_insert(observed);
    }

    /// Watched reads and their observed generations
    pub fn read_set(&self) -> &HashMap<ColKey, Generation> {
        &self.read_set
    }

    /// Buffered writes in (collection, key) order
    pub fn write_set(&self) -> &BTreeMap<ColKey, Vec<u8>> {
        &self.write_set
    }

    /// Buffered deletes in (collection, key) order
    pub fn delete_set(&self) -> &BTreeSet<ColKey> {
        &self.delete_set
    }

    /// Whether the transaction has nothing to commit
    pub fn is_empty(&self) -> bool {
        self.write_set.is_empty() && self.delete_set.is_empty()
    }

    /// Buffered writes within one collection's key range, in key order
    ///
    /// This is what scans merge with the substrate's live keys.
    pub fn writes_in_range(
        &self,
        collection: CollectionHandle,
        start: Key,
        end: Key,
    ) -> impl Iterator<Item = (Key, &[u8])> + '_ {
        self.write_set
            .range(ColKey::new(collection, start)..ColKey::new(collection, end))
            .map(|(at, bytes)| (at.key, bytes.as_slice()))
    }

    /// Whether the transaction buffered a delete of this key
    pub fn is_deleted(&self, at: ColKey) -> bool {
        self.delete_set.contains(&at)
    }

    /// Buffered deletes within one collection's key range, in key order
    pub fn deletes_in_range(
        &self,
        collection: CollectionHandle,
        start: Key,
        end: Key,
    ) -> impl Iterator<Item = Key> + '_ {
        self.delete_set
            .range(ColKey::new(collection, start)..ColKey::new(collection, end))
            .map(|at| at.key)
    }

    /// Mark the transaction committed
    pub fn mark_committed(&mut self) {
        self.status = TransactionStatus::Committed;
    }

    /// Clear all buffers and re-arm at a new start generation
    pub fn reset(&mut self, start_generation: Generation) {
        self.start_generation = start_generation;
        self.status = TransactionStatus::Active;
        self.read_set.clear();
        self.write_set.clear();
        self.delete_set.clear();
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("start_generation", &self.start_generation)
            .field("read_only", &self.read_only)
            .field("status", &self.status)
            .field("reads", &self.read_set.len())
            .field("writes", &self.write_set.len())
            .field("deletes", &self.delete_set.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(key: Key) -> ColKey {
        ColKey::new(CollectionHandle::DEFAULT, key)
    }

    #[test]
    fn write_and_delete_sets_stay_disjoint() {
        let mut txn = Transaction::begin(10, false);
        txn.stage(at(1), Some(b"x")).unwrap();
        txn.stage(at(1), None).unwrap();
        assert_eq!(txn.buffered(at(1)), Some(Buffered::Deleted));
        txn.stage(at(1), Some(b"y")).unwrap();
        assert_eq!(txn.buffered(at(1)), Some(Buffered::Written(b"y")));
        assert!(!txn.is_deleted(at(1)));
    }

    #[test]
    fn read_only_rejects_writes() {
        let mut txn = Transaction::begin(10, true);
        let err = txn.stage(at(1), Some(b"x")).unwrap_err();
        assert!(matches!(err, EngineError::TransactionState { .. }));
    }

    #[test]
    fn first_observation_wins() {
        let mut txn = Transaction::begin(10, false);
        txn.record_read(at(1), 4);
        txn.record_read(at(1), 8);
        assert_eq!(txn.read_set()[&at(1)], 4);
    }

    #[test]
    fn committed_transactions_demand_reset() {
        let mut txn = Transaction::begin(10, false);
        txn.stage(at(1), Some(b"x")).unwrap();
        txn.mark_committed();
        assert!(txn.ensure_active().is_err());
        assert!(txn.stage(at(2), Some(b"y")).is_err());
        txn.reset(20);
        assert_eq!(txn.start_generation(), 20);
        assert!(txn.is_empty());
        txn.stage(at(2), Some(b"y")).unwrap();
    }

    #[test]
    fn writes_in_range_are_scoped_and_sorted() {
        let other = CollectionHandle(9);
        let mut txn = Transaction::begin(10, false);
        txn.stage(at(5), Some(b"a")).unwrap();
        txn.stage(at(1), Some(b"b")).unwrap();
        txn.stage(at(9), Some(b"c")).unwrap();
        txn.stage(ColKey::new(other, 2), Some(b"z")).unwrap();

        let keys: Vec<Key> = txn
            .writes_in_range(CollectionHandle::DEFAULT, 1, 9)
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![1, 5]);
    }
}
