//! Transaction and snapshot semantics
//!
//! Deterministic interleavings: isolation, read-your-writes, optimistic
//! validation with read/write diagnosis, retry after reset, snapshot
//! stability under pruning pressure, and the closure helper.

use manifold_core::options::Options;
use manifold_core::types::CollectionHandle;
use manifold_core::{ConflictKind, EngineError};
use manifold_engine::{Database, DatabaseConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Barrier;

const COL: CollectionHandle = CollectionHandle::DEFAULT;

// ============================================================================
// Isolation
// ============================================================================

#[test]
fn buffered_writes_are_invisible_until_commit() {
    let db = Database::in_memory();
    let mut txn = db.begin_transaction().unwrap();

    db.put(Some(&mut txn), COL, 42, Some(b"X")).unwrap();
    assert_eq!(db.get(Some(&mut txn), COL, 42).unwrap(), Some(b"X".to_vec()));
    assert_eq!(db.get(None, COL, 42).unwrap(), None);

    db.commit(&mut txn, Options::NONE).unwrap();
    assert_eq!(db.get(None, COL, 42).unwrap(), Some(b"X".to_vec()));
}

#[test]
fn transactions_read_at_their_start_generation() {
    let db = Database::in_memory();
    db.put(None, COL, 1, Some(b"before")).unwrap();

    let mut txn = db.begin_transaction().unwrap();
    db.put(None, COL, 1, Some(b"after")).unwrap();

    // The external overwrite happened after begin; the old version serves.
    assert_eq!(
        db.get(Some(&mut txn), COL, 1).unwrap(),
        Some(b"before".to_vec())
    );
}

#[test]
fn read_your_deletes() {
    let db = Database::in_memory();
    db.put(None, COL, 1, Some(b"live")).unwrap();

    let mut txn = db.begin_transaction().unwrap();
    db.put(Some(&mut txn), COL, 1, None).unwrap();
    assert_eq!(db.get(Some(&mut txn), COL, 1).unwrap(), None);
    // HEAD still sees it.
    assert_eq!(db.get(None, COL, 1).unwrap(), Some(b"live".to_vec()));
}

// ============================================================================
// Conflict detection
// ============================================================================

#[test]
fn watched_read_conflicts_with_external_writer() {
    let db = Database::in_memory();
    db.put(None, COL, 7, Some(b"v1")).unwrap();

    let mut txn = db.begin_transaction().unwrap();
    let _ = db.get(Some(&mut txn), COL, 7).unwrap();
    db.put(Some(&mut txn), COL, 8, Some(b"w")).unwrap();

    db.put(None, COL, 7, Some(b"v2")).unwrap();

    let err = db.commit(&mut txn, Options::NONE).unwrap_err();
    match err {
        EngineError::Conflict { kind, key, .. } => {
            assert_eq!(kind, ConflictKind::Read);
            assert_eq!(key, 7);
        }
        other => panic!("expected a read conflict, got {other}"),
    }
    // HEAD kept the external writer's value.
    assert_eq!(db.get(None, COL, 7).unwrap(), Some(b"v2".to_vec()));
}

#[test]
fn unwatched_read_does_not_conflict() {
    let db = Database::in_memory();
    db.put(None, COL, 7, Some(b"v1")).unwrap();

    let mut txn = db.begin_transaction().unwrap();
    let _ = db
        .get_with(Some(&mut txn), COL, 7, Options::DONT_WATCH)
        .unwrap();
    db.put(Some(&mut txn), COL, 8, Some(b"w")).unwrap();

    db.put(None, COL, 7, Some(b"v2")).unwrap();
    db.commit(&mut txn, Options::NONE).unwrap();
}

#[test]
fn blind_write_conflicts_when_target_moved() {
    let db = Database::in_memory();

    let mut txn = db.begin_transaction().unwrap();
    db.put(Some(&mut txn), COL, 5, Some(b"mine")).unwrap();

    db.put(None, COL, 5, Some(b"theirs")).unwrap();

    let err = db.commit(&mut txn, Options::NONE).unwrap_err();
    match err {
        EngineError::Conflict { kind, .. } => assert_eq!(kind, ConflictKind::Write),
        other => panic!("expected a write conflict, got {other}"),
    }
}

#[test]
fn conflicted_transaction_keeps_buffers_and_commits_after_reset() {
    let db = Database::in_memory();
    db.put(None, COL, 1, Some(b"v1")).unwrap();

    let mut txn = db.begin_transaction().unwrap();
    let _ = db.get(Some(&mut txn), COL, 1).unwrap();
    db.put(Some(&mut txn), COL, 2, Some(b"w")).unwrap();
    db.put(None, COL, 1, Some(b"v2")).unwrap();

    assert!(db.commit(&mut txn, Options::NONE).is_err());
    // Buffers survived the conflict.
    assert_eq!(txn.pending(), (1, 0));

    // Reset re-captures the generation; the stale read is gone, but so
    // is the buffered write, so the caller re-stages.
    txn.reset();
    db.put(Some(&mut txn), COL, 2, Some(b"w")).unwrap();
    db.commit(&mut txn, Options::NONE).unwrap();
    assert_eq!(db.get(None, COL, 2).unwrap(), Some(b"w".to_vec()));
}

#[test]
fn committing_twice_without_reset_is_refused() {
    let db = Database::in_memory();
    let mut txn = db.begin_transaction().unwrap();
    db.put(Some(&mut txn), COL, 1, Some(b"x")).unwrap();
    db.commit(&mut txn, Options::NONE).unwrap();

    let err = db.commit(&mut txn, Options::NONE).unwrap_err();
    assert!(matches!(err, EngineError::TransactionState { .. }));
}

#[test]
fn exactly_one_of_two_racing_writers_commits() {
    let db = Database::in_memory();
    db.put(None, COL, 100, Some(b"base")).unwrap();

    let winners = AtomicUsize::new(0);
    let losers = AtomicUsize::new(0);
    let barrier = Barrier::new(2);

    std::thread::scope(|scope| {
        for value in [b"left", b"rght"] {
            let (db, winners, losers, barrier) = (&db, &winners, &losers, &barrier);
            scope.spawn(move || {
                let mut txn = db.begin_transaction().unwrap();
                let _ = db.get(Some(&mut txn), COL, 100).unwrap();
                db.put(Some(&mut txn), COL, 100, Some(value)).unwrap();
                barrier.wait();
                match db.commit(&mut txn, Options::NONE) {
                    Ok(_) => winners.fetch_add(1, Ordering::SeqCst),
                    Err(err) => {
                        assert!(err.is_conflict());
                        losers.fetch_add(1, Ordering::SeqCst)
                    }
                };
            });
        }
    });

    assert_eq!(winners.load(Ordering::SeqCst), 1);
    assert_eq!(losers.load(Ordering::SeqCst), 1);
    let head = db.get(None, COL, 100).unwrap().unwrap();
    assert!(head == b"left" || head == b"rght");
}

// ============================================================================
// Snapshots
// ============================================================================

#[test]
fn snapshots_reject_writes() {
    let db = Database::in_memory();
    let mut snapshot = db.snapshot().unwrap();
    let err = db.put(Some(&mut snapshot), COL, 1, Some(b"x")).unwrap_err();
    assert!(matches!(err, EngineError::TransactionState { .. }));
}

#[test]
fn snapshot_serves_its_generation_through_overwrites_and_deletes() {
    let db = Database::in_memory();
    db.put(None, COL, 1, Some(b"v1")).unwrap();
    db.put(None, COL, 2, Some(b"will die")).unwrap();

    let mut snapshot = db.snapshot().unwrap();

    // Overwrite repeatedly and delete; each write prunes unpinned
    // versions, so surviving these proves the pin works.
    for round in 0..5u8 {
        db.put(None, COL, 1, Some(&[round])).unwrap();
    }
    db.put(None, COL, 2, None).unwrap();

    assert_eq!(
        db.get(Some(&mut snapshot), COL, 1).unwrap(),
        Some(b"v1".to_vec())
    );
    assert_eq!(
        db.get(Some(&mut snapshot), COL, 2).unwrap(),
        Some(b"will die".to_vec())
    );

    // A fresh snapshot sees the new world.
    let mut fresh = db.snapshot().unwrap();
    assert_eq!(db.get(Some(&mut fresh), COL, 2).unwrap(), None);
}

#[test]
fn snapshot_taken_before_key_existed_sees_absence() {
    let db = Database::in_memory();
    let mut snapshot = db.snapshot().unwrap();
    db.put(None, COL, 9, Some(b"new")).unwrap();
    assert_eq!(db.get(Some(&mut snapshot), COL, 9).unwrap(), None);
}

// ============================================================================
// Policy and helpers
// ============================================================================

#[test]
fn transactions_can_be_disabled_by_policy() {
    let db = Database::open(DatabaseConfig::default().without_transactions()).unwrap();
    assert!(db.begin_transaction().is_err());
    assert!(db.snapshot().is_err());
    // HEAD writes still work.
    db.put(None, COL, 1, Some(b"x")).unwrap();
}

#[test]
fn closure_helper_retries_conflicts() {
    let db = Database::in_memory();
    db.put(None, COL, 1, Some(&0i64.to_le_bytes())).unwrap();

    // Two threads increment the same counter through the helper; retries
    // must make both increments land.
    std::thread::scope(|scope| {
        for _ in 0..2 {
            scope.spawn(|| {
                db.transaction(|txn| {
                    let current = db
                        .get(Some(&mut *txn), COL, 1)?
                        .map(|b| i64::from_le_bytes(b.try_into().unwrap()))
                        .unwrap_or(0);
                    db.put(Some(&mut *txn), COL, 1, Some(&(current + 1).to_le_bytes()))
                })
                .unwrap();
            });
        }
    });

    let counter = db.get(None, COL, 1).unwrap().unwrap();
    assert_eq!(i64::from_le_bytes(counter.try_into().unwrap()), 2);
}
