//! Substrate call-surface tests
//!
//! Batched read/write/scan/size against HEAD and inside transactions,
//! with strided arguments and arena outputs.

use manifold_core::arena::Arena;
use manifold_core::options::Options;
use manifold_core::strided::{Contents, Strided};
use manifold_core::types::{bits, CollectionHandle, Key, LENGTH_MISSING};
use manifold_engine::{Database, DatabaseConfig, DropMode, Places, ScanTasks, SizeTasks};
use tempfile::TempDir;

fn write_values(db: &Database, collection: CollectionHandle, entries: &[(Key, &[u8])]) {
    let keys: Vec<Key> = entries.iter().map(|(k, _)| *k).collect();
    let values: Vec<Option<&[u8]>> = entries.iter().map(|(_, v)| Some(*v)).collect();
    db.write(
        None,
        &Places::in_collection(collection, &keys),
        &Contents::from_values(&values),
        Options::NONE,
    )
    .unwrap();
}

// ============================================================================
// Point reads and writes
// ============================================================================

#[test]
fn batched_read_reports_presence_offsets_lengths_and_tape() {
    let db = Database::in_memory();
    write_values(&db, CollectionHandle::DEFAULT, &[(1, b"aa"), (3, b"cccc")]);

    let mut arena = Arena::new();
    let keys = [1i64, 2, 3];
    let out = db
        .read(
            None,
            &Places::in_collection(CollectionHandle::DEFAULT, &keys),
            Options::NONE,
            &mut arena,
        )
        .unwrap();

    assert!(out.present(0));
    assert!(!out.present(1));
    assert!(out.present(2));
    assert_eq!(out.lengths, &[2, LENGTH_MISSING, 4]);
    assert_eq!(out.offsets, &[0, 2, 2, 6]);
    assert_eq!(out.values, b"aacccc");
    assert_eq!(out.value(0), Some(&b"aa"[..]));
    assert_eq!(out.value(1), None);
    assert_eq!(out.value(2), Some(&b"cccc"[..]));
}

#[test]
fn empty_value_is_present_with_zero_length() {
    let db = Database::in_memory();
    write_values(&db, CollectionHandle::DEFAULT, &[(7, b"")]);

    let mut arena = Arena::new();
    let keys = [7i64];
    let out = db
        .read(
            None,
            &Places::in_collection(CollectionHandle::DEFAULT, &keys),
            Options::NONE,
            &mut arena,
        )
        .unwrap();
    assert!(out.present(0));
    assert_eq!(out.lengths[0], 0);
    assert_eq!(out.value(0), Some(&b""[..]));
}

#[test]
fn null_payload_deletes() {
    let db = Database::in_memory();
    write_values(&db, CollectionHandle::DEFAULT, &[(5, b"gone soon")]);

    let keys = [5i64];
    let values: Vec<Option<&[u8]>> = vec![None];
    db.write(
        None,
        &Places::in_collection(CollectionHandle::DEFAULT, &keys),
        &Contents::from_values(&values),
        Options::NONE,
    )
    .unwrap();

    assert_eq!(db.get(None, CollectionHandle::DEFAULT, 5).unwrap(), None);
}

#[test]
fn repeated_collection_stride_addresses_many_keys() {
    let db = Database::in_memory();
    let keys: Vec<Key> = (0..10).collect();
    let payload = b"same";
    let values: Vec<Option<&[u8]>> = keys.iter().map(|_| Some(&payload[..])).collect();
    db.write(
        None,
        &Places {
            collections: Strided::Repeat(CollectionHandle::DEFAULT),
            keys: Strided::Slice(&keys),
            count: keys.len(),
        },
        &Contents::from_values(&values),
        Options::NONE,
    )
    .unwrap();

    for key in keys {
        assert_eq!(
            db.get(None, CollectionHandle::DEFAULT, key).unwrap(),
            Some(payload.to_vec())
        );
    }
}

#[test]
fn shared_memory_option_is_unsupported() {
    let db = Database::in_memory();
    let mut arena = Arena::new();
    let keys = [1i64];
    let err = db
        .read(
            None,
            &Places::in_collection(CollectionHandle::DEFAULT, &keys),
            Options::SHARED_MEMORY_OUTPUT,
            &mut arena,
        )
        .unwrap_err();
    assert!(matches!(err, manifold_core::EngineError::Unsupported { .. }));
}

#[test]
fn dont_discard_arena_appends_outputs() {
    let db = Database::in_memory();
    write_values(&db, CollectionHandle::DEFAULT, &[(1, b"x")]);

    let mut arena = Arena::new();
    let keys = [1i64];
    let places = Places::in_collection(CollectionHandle::DEFAULT, &keys);
    db.read(None, &places, Options::NONE, &mut arena).unwrap();
    let used_once = arena.used();

    db.read(None, &places, Options::DONT_DISCARD_ARENA, &mut arena)
        .unwrap();
    assert!(arena.used() > used_once);

    db.read(None, &places, Options::NONE, &mut arena).unwrap();
    assert_eq!(arena.used(), used_once);
}

// ============================================================================
// Scans
// ============================================================================

#[test]
fn scan_emits_live_keys_ascending_within_bounds() {
    let db = Database::in_memory();
    write_values(
        &db,
        CollectionHandle::DEFAULT,
        &[(9, b"i"), (1, b"a"), (5, b"e"), (3, b"c")],
    );
    db.put(None, CollectionHandle::DEFAULT, 5, None).unwrap();

    let mut arena = Arena::new();
    let tasks = ScanTasks {
        collections: Strided::Repeat(CollectionHandle::DEFAULT),
        start_keys: Strided::Repeat(1),
        end_keys: Strided::Repeat(9),
        limits: Strided::Repeat(10),
        count: 1,
    };
    let out = db.scan(None, &tasks, Options::NONE, &mut arena).unwrap();
    assert_eq!(out.task_keys(0), &[1, 3]);
    assert_eq!(out.counts, &[2]);
}

#[test]
fn scan_honors_per_task_limits() {
    let db = Database::in_memory();
    let entries: Vec<(Key, &[u8])> = (0..20).map(|k| (k, &b"v"[..])).collect();
    write_values(&db, CollectionHandle::DEFAULT, &entries);

    let mut arena = Arena::new();
    let out = db
        .scan(
            None,
            &ScanTasks::whole_collection(CollectionHandle::DEFAULT, 7),
            Options::NONE,
            &mut arena,
        )
        .unwrap();
    assert_eq!(out.counts, &[7]);
    assert_eq!(out.task_keys(0), &[0, 1, 2, 3, 4, 5, 6]);
}

#[test]
fn scan_merges_transaction_writes_and_suppresses_deletes() {
    let db = Database::in_memory();
    write_values(&db, CollectionHandle::DEFAULT, &[(2, b"b"), (4, b"d"), (6, b"f")]);

    let mut txn = db.begin_transaction().unwrap();
    db.put(Some(&mut txn), CollectionHandle::DEFAULT, 3, Some(b"c"))
        .unwrap();
    db.put(Some(&mut txn), CollectionHandle::DEFAULT, 4, Some(b"D"))
        .unwrap();
    db.put(Some(&mut txn), CollectionHandle::DEFAULT, 6, None).unwrap();
    db.put(Some(&mut txn), CollectionHandle::DEFAULT, 9, Some(b"j"))
        .unwrap();

    let mut arena = Arena::new();
    let out = db
        .scan(
            Some(&txn),
            &ScanTasks::whole_collection(CollectionHandle::DEFAULT, 100),
            Options::NONE,
            &mut arena,
        )
        .unwrap();
    // 3 and 9 interleave, 4 stays (overwritten, not duplicated), 6 is gone.
    assert_eq!(out.task_keys(0), &[2, 3, 4, 9]);
}

// ============================================================================
// Size estimates
// ============================================================================

#[test]
fn size_bounds_cover_live_state_and_transaction_extras() {
    let db = Database::in_memory();
    write_values(&db, CollectionHandle::DEFAULT, &[(1, b"aaaa"), (2, b"bb")]);

    let mut txn = db.begin_transaction().unwrap();
    db.put(Some(&mut txn), CollectionHandle::DEFAULT, 3, Some(b"ccc"))
        .unwrap();

    let mut arena = Arena::new();
    let tasks = SizeTasks {
        collections: Strided::Repeat(CollectionHandle::DEFAULT),
        start_keys: Strided::Repeat(Key::MIN),
        end_keys: Strided::Repeat(Key::MAX),
        count: 1,
    };
    let out = db.size(Some(&txn), &tasks, Options::NONE, &mut arena).unwrap();
    assert_eq!(out.min_cardinalities[0], 2);
    assert_eq!(out.max_cardinalities[0], 3);
    assert_eq!(out.min_value_bytes[0], 6);
    assert_eq!(out.max_value_bytes[0], 9);
    assert!(out.min_space_usages[0] >= 6);
    assert!(out.max_space_usages[0] >= out.min_space_usages[0]);
}

// ============================================================================
// Collections
// ============================================================================

#[test]
fn collections_isolate_key_spaces() {
    let db = Database::in_memory();
    let left = db.create_collection("left", Default::default()).unwrap();
    let right = db.create_collection("right", Default::default()).unwrap();

    db.put(None, left, 1, Some(b"left")).unwrap();
    db.put(None, right, 1, Some(b"right")).unwrap();

    assert_eq!(db.get(None, left, 1).unwrap(), Some(b"left".to_vec()));
    assert_eq!(db.get(None, right, 1).unwrap(), Some(b"right".to_vec()));
    assert_eq!(db.get(None, CollectionHandle::DEFAULT, 1).unwrap(), None);
}

#[test]
fn drop_modes_behave_distinctly() {
    let db = Database::in_memory();
    let col = db.create_collection("tmp", Default::default()).unwrap();
    db.put(None, col, 1, Some(b"x")).unwrap();

    db.drop_collection(col, DropMode::ValuesOnly).unwrap();
    assert_eq!(db.get(None, col, 1).unwrap(), None);

    db.put(None, col, 2, Some(b"y")).unwrap();
    db.drop_collection(col, DropMode::KeysAndValues).unwrap();
    assert_eq!(db.get(None, col, 2).unwrap(), None);

    db.drop_collection(col, DropMode::HandleAndContents).unwrap();
    assert!(db.get(None, col, 1).is_err());
    assert!(db.collection_named("tmp").is_none());
}

#[test]
fn collection_listing_packs_names_into_the_arena() {
    let db = Database::in_memory();
    db.create_collection("graph", Default::default()).unwrap();
    db.create_collection("docs", Default::default()).unwrap();

    let mut arena = Arena::new();
    let listing = db.list_collections_in(&mut arena).unwrap();
    assert_eq!(listing.count, 2);
    assert_eq!(listing.name(0), "docs");
    assert_eq!(listing.name(1), "graph");
    assert_eq!(listing.offsets.len(), 3);
    // Names are NUL-terminated on the tape.
    assert_eq!(listing.names[listing.offsets[1] as usize - 1], 0);
}

#[test]
fn named_collections_can_be_disabled_by_policy() {
    let db = Database::open(DatabaseConfig::default().without_named_collections()).unwrap();
    assert!(db.create_collection("nope", Default::default()).is_err());
    assert!(db
        .open_or_create_collection("", Default::default())
        .is_ok());
}

// ============================================================================
// Persistence
// ============================================================================

#[test]
fn database_reloads_its_disk_image() {
    let dir = TempDir::new().unwrap();
    {
        let db = Database::open(DatabaseConfig::default().with_directory(dir.path())).unwrap();
        let named = db.create_collection("kept", Default::default()).unwrap();
        db.put(None, CollectionHandle::DEFAULT, 1, Some(b"default"))
            .unwrap();
        db.put(None, named, 2, Some(b"named")).unwrap();
        db.flush().unwrap();
    }

    let db = Database::open(DatabaseConfig::default().with_directory(dir.path())).unwrap();
    assert_eq!(
        db.get(None, CollectionHandle::DEFAULT, 1).unwrap(),
        Some(b"default".to_vec())
    );
    let named = db.collection_named("kept").unwrap();
    assert_eq!(db.get(None, named, 2).unwrap(), Some(b"named".to_vec()));
}

#[test]
fn close_persists_without_an_explicit_flush() {
    let dir = TempDir::new().unwrap();
    {
        let db = Database::open(DatabaseConfig::default().with_directory(dir.path())).unwrap();
        db.put(None, CollectionHandle::DEFAULT, 42, Some(b"kept"))
            .unwrap();
    }
    let db = Database::open(DatabaseConfig::default().with_directory(dir.path())).unwrap();
    assert_eq!(
        db.get(None, CollectionHandle::DEFAULT, 42).unwrap(),
        Some(b"kept".to_vec())
    );
}

#[test]
fn flush_on_write_persists_synchronously() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(DatabaseConfig::default().with_directory(dir.path())).unwrap();
    let keys = [9i64];
    let values: Vec<Option<&[u8]>> = vec![Some(b"durable")];
    db.write(
        None,
        &Places::in_collection(CollectionHandle::DEFAULT, &keys),
        &Contents::from_values(&values),
        Options::FLUSH_ON_WRITE,
    )
    .unwrap();
    assert!(dir.path().join(".default.mfd").exists());
}

#[test]
fn snapshot_export_is_stable_against_later_writes() {
    let dir = TempDir::new().unwrap();
    let export = dir.path().join("export");
    let db = Database::in_memory();
    db.put(None, CollectionHandle::DEFAULT, 1, Some(b"old")).unwrap();

    let snapshot = db.snapshot().unwrap();
    db.put(None, CollectionHandle::DEFAULT, 1, Some(b"new")).unwrap();
    db.put(None, CollectionHandle::DEFAULT, 2, Some(b"extra")).unwrap();
    db.export_snapshot(&snapshot, &export).unwrap();

    let restored = Database::open(DatabaseConfig::default().with_directory(&export)).unwrap();
    assert_eq!(
        restored.get(None, CollectionHandle::DEFAULT, 1).unwrap(),
        Some(b"old".to_vec())
    );
    assert_eq!(restored.get(None, CollectionHandle::DEFAULT, 2).unwrap(), None);
}

// ============================================================================
// Presence bitmaps
// ============================================================================

#[test]
fn read_meta_skips_the_value_tape() {
    let db = Database::in_memory();
    write_values(&db, CollectionHandle::DEFAULT, &[(1, b"abc")]);

    let mut arena = Arena::new();
    let keys = [1i64, 2];
    let meta = db
        .read_meta(
            None,
            &Places::in_collection(CollectionHandle::DEFAULT, &keys),
            Options::NONE,
            &mut arena,
        )
        .unwrap();
    assert!(bits::get(meta.presences, 0));
    assert!(!bits::get(meta.presences, 1));
    assert_eq!(meta.lengths, &[3, LENGTH_MISSING]);
}
