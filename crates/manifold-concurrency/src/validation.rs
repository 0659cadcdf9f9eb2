//! Commit-time validation
//!
//! Runs under the database's exclusive lock, immediately before a
//! transaction's buffers are applied. Two rules:
//!
//! 1. every watched read must still observe the generation it saw —
//!    otherwise a **read conflict**;
//! 2. every buffered write or delete must target a cell that has not
//!    advanced past the transaction's start generation — otherwise a
//!    **write conflict**.
//!
//! Blind writes to keys the transaction never read conflict only under
//! rule 2, which is what gives watched reads their stricter
//! serializability property.

use crate::transaction::Transaction;
use manifold_core::error::ConflictKind;
use manifold_core::types::{ColKey, Generation};
use manifold_storage::Store;

/// One detected conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conflict {
    /// Read or write diagnosis
    pub kind: ConflictKind,
    /// The contested entry
    pub at: ColKey,
    /// Generation the transaction based itself on
    pub observed: Generation,
    /// Generation found live at validation time
    pub current: Generation,
}

/// Accumulated validation outcome
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// Every conflict found, read conflicts first
    pub conflicts: Vec<Conflict>,
}

impl ValidationResult {
    /// Whether the transaction may commit
    pub fn is_valid(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Merge another phase's findings
    pub fn merge(&mut self, other: ValidationResult) {
        self.conflicts.extend(other.conflicts);
    }

    /// The first conflict, if any
    pub fn first(&self) -> Option<&Conflict> {
        self.conflicts.first()
    }
}

/// Generation of the live cell at `at`, zero when absent
///
/// A concurrently dropped collection reads as generation zero: its
/// entries are gone, which for validation is the same as never written.
fn live_generation(store: &Store, at: ColKey) -> Generation {
    store
        .collection(at.collection)
        .ok()
        .and_then(|col| col.cell(at.key))
        .map(|cell| cell.generation())
        .unwrap_or(0)
}

/// Validate the watched read set
pub fn validate_read_set(txn: &Transaction, store: &Store) -> ValidationResult {
    let mut result = ValidationResult::default();
    for (at, observed) in txn.read_set() {
        let current = live_generation(store, *at);
        if current > *observed {
            result.conflicts.push(Conflict {
                kind: ConflictKind::Read,
                at: *at,
                observed: *observed,
                current,
            });
        }
    }
    result
}

/// Validate the write and delete sets against the start generation
pub fn validate_write_set(txn: &Transaction, store: &Store) -> ValidationResult {
    let mut result = ValidationResult::default();
    let start = txn.start_generation();
    let staged = txn
        .write_set()
        .keys()
        .copied()
        .chain(txn.delete_set().iter().copied());
    for at in staged {
        let current = live_generation(store, at);
        if current > start {
            result.conflicts.push(Conflict {
                kind: ConflictKind::Write,
                at,
                observed: start,
                current,
            });
        }
    }
    result
}

/// Validate a whole transaction
///
/// Watched reads are defended even when nothing is staged: committing a
/// transaction asserts that everything it observed still holds.
pub fn validate_transaction(txn: &Transaction, store: &Store) -> ValidationResult {
    let mut result = validate_read_set(txn, store);
    result.merge(validate_write_set(txn, store));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use manifold_core::types::CollectionHandle;

    fn at(key: i64) -> ColKey {
        ColKey::new(CollectionHandle::DEFAULT, key)
    }

    fn store_with(key: i64, generation: Generation) -> Store {
        let mut store = Store::default();
        store
            .collection_mut(CollectionHandle::DEFAULT)
            .unwrap()
            .apply(key, generation, Some(b"v"));
        store
    }

    #[test]
    fn unchanged_reads_pass() {
        let store = store_with(1, 5);
        let mut txn = Transaction::begin(5, false);
        txn.record_read(at(1), 5);
        txn.stage(at(2), Some(b"w")).unwrap();
        assert!(validate_transaction(&txn, &store).is_valid());
    }

    #[test]
    fn stale_read_is_a_read_conflict() {
        let store = store_with(1, 9);
        let mut txn = Transaction::begin(5, false);
        txn.record_read(at(1), 5);
        txn.stage(at(2), Some(b"w")).unwrap();
        let result = validate_transaction(&txn, &store);
        let conflict = result.first().unwrap();
        assert_eq!(conflict.kind, ConflictKind::Read);
        assert_eq!(conflict.current, 9);
    }

    #[test]
    fn read_of_absent_key_conflicts_when_it_appears() {
        let store = store_with(1, 9);
        let mut txn = Transaction::begin(5, false);
        txn.record_read(at(1), 0);
        txn.stage(at(1), Some(b"w")).unwrap();
        let result = validate_transaction(&txn, &store);
        assert!(!result.is_valid());
    }

    #[test]
    fn overwritten_target_is_a_write_conflict() {
        let store = store_with(1, 9);
        let mut txn = Transaction::begin(5, false);
        txn.stage(at(1), Some(b"w")).unwrap();
        let result = validate_transaction(&txn, &store);
        let conflict = result.first().unwrap();
        assert_eq!(conflict.kind, ConflictKind::Write);

        let mut deleter = Transaction::begin(5, false);
        deleter.stage(at(1), None).unwrap();
        assert!(!validate_transaction(&deleter, &store).is_valid());
    }

    #[test]
    fn blind_write_to_untouched_key_passes() {
        let store = store_with(1, 3);
        let mut txn = Transaction::begin(5, false);
        txn.stage(at(1), Some(b"w")).unwrap();
        assert!(validate_transaction(&txn, &store).is_valid());
    }

    #[test]
    fn watched_reads_are_defended_even_without_writes() {
        let store = store_with(1, 9);
        let mut txn = Transaction::begin(5, false);
        txn.record_read(at(1), 5);
        let result = validate_transaction(&txn, &store);
        assert_eq!(result.first().unwrap().kind, ConflictKind::Read);

        let mut unwatched = Transaction::begin(5, false);
        let _ = &unwatched; // reads issued with do-not-watch never register
        assert!(validate_transaction(&unwatched, &store).is_valid());
    }
}
