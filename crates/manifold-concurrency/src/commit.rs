//! Applying validated transactions
//!
//! Runs under the exclusive lock after validation passed. Every write
//! and delete in the transaction lands at the same freshly assigned
//! generation, which is what makes a commit atomic from the perspective
//! of any later reader or snapshot.

use crate::transaction::Transaction;
use manifold_core::error::Result;
use manifold_core::types::Generation;
use manifold_storage::Store;
use tracing::debug;

/// Summary of an applied commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Generation assigned to every write and delete
    pub generation: Generation,
    /// Writes applied
    pub writes_applied: usize,
    /// Deletes applied
    pub deletes_applied: usize,
}

/// Apply a validated transaction's buffers at `generation`
///
/// Writes insert or overwrite; deletes tombstone. The caller assigned
/// `generation` from the database counter and holds the write lock.
pub fn apply_transaction(
    txn: &Transaction,
    store: &mut Store,
    generation: Generation,
) -> Result<CommitOutcome> {
    for (at, bytes) in txn.write_set() {
        store
            .collection_mut(at.collection)?
            .apply(at.key, generation, Some(bytes));
    }
    for at in txn.delete_set() {
        store
            .collection_mut(at.collection)?
            .apply(at.key, generation, None);
    }
    let outcome = CommitOutcome {
        generation,
        writes_applied: txn.write_set().len(),
        deletes_applied: txn.delete_set().len(),
    };
    debug!(
        generation,
        writes = outcome.writes_applied,
        deletes = outcome.deletes_applied,
        "applied transaction"
    );
    Ok(outcome)
}
