//! Engine-level property checks
//!
//! The contractual properties every backend must hold, exercised
//! through the public facade: round trips, absence, deletion, scan
//! order, isolation, snapshot stability, graph run consistency,
//! cascades, patch algebra, gather validity, prefix enumeration and
//! conflict detection.

use manifold::{
    Arena, CollectionHandle, Database, DocFormat, DocModification, Edge, MatchTask, Options,
    Places, Pointer, Role, ScalarType, ScanTasks, Strided, LENGTH_MISSING,
};

const COL: CollectionHandle = CollectionHandle::DEFAULT;

// ============================================================================
// P1-P3: point round trips
// ============================================================================

#[test]
fn point_round_trip_across_value_shapes() {
    let db = Database::in_memory();
    let cases: Vec<(i64, Vec<u8>)> = vec![
        (0, b"plain".to_vec()),
        (-1, Vec::new()),
        (i64::MIN, vec![0u8; 1024]),
        (i64::MAX - 1, vec![0xFF; 3]),
        (7, b"\0embedded\0nuls\0".to_vec()),
    ];
    for (key, value) in &cases {
        db.put(None, COL, *key, Some(value)).unwrap();
    }

    let keys: Vec<i64> = cases.iter().map(|(k, _)| *k).collect();
    let mut arena = Arena::new();
    let out = db
        .read(None, &Places::in_collection(COL, &keys), Options::NONE, &mut arena)
        .unwrap();
    for (i, (_, value)) in cases.iter().enumerate() {
        assert!(out.present(i));
        assert_eq!(out.lengths[i] as usize, value.len());
        assert_eq!(out.value(i), Some(value.as_slice()));
    }
}

#[test]
fn absent_keys_report_the_missing_sentinel() {
    let db = Database::in_memory();
    let keys = [99i64];
    let mut arena = Arena::new();
    let out = db
        .read(None, &Places::in_collection(COL, &keys), Options::NONE, &mut arena)
        .unwrap();
    assert!(!out.present(0));
    assert_eq!(out.lengths[0], LENGTH_MISSING);
    assert!(out.values.is_empty());
}

#[test]
fn deleted_keys_vanish_from_reads_and_scans() {
    let db = Database::in_memory();
    db.put(None, COL, 10, Some(b"v")).unwrap();
    db.put(None, COL, 10, None).unwrap();

    assert_eq!(db.get(None, COL, 10).unwrap(), None);

    let mut arena = Arena::new();
    let out = db
        .scan(
            None,
            &ScanTasks::whole_collection(COL, 100),
            Options::NONE,
            &mut arena,
        )
        .unwrap();
    assert_eq!(out.counts, &[0]);
}

// ============================================================================
// P4: scan order
// ============================================================================

#[test]
fn scans_return_inserted_sets_in_ascending_order() {
    let db = Database::in_memory();
    let inserted = [44i64, -7, 0, 13, 92, -100, 57];
    for key in inserted {
        db.put(None, COL, key, Some(b"x")).unwrap();
    }

    let mut sorted = inserted.to_vec();
    sorted.sort_unstable();

    let mut arena = Arena::new();
    let tasks = ScanTasks {
        collections: Strided::Repeat(COL),
        start_keys: Strided::Repeat(-100),
        end_keys: Strided::Repeat(93),
        limits: Strided::Repeat(inserted.len() as u32),
        count: 1,
    };
    let out = db.scan(None, &tasks, Options::NONE, &mut arena).unwrap();
    assert_eq!(out.task_keys(0), sorted.as_slice());
}

// ============================================================================
// P5-P6: isolation and snapshot stability
// ============================================================================

#[test]
fn transactions_see_pre_write_state_until_the_writer_commits() {
    let db = Database::in_memory();
    db.put(None, COL, 1, Some(b"old")).unwrap();

    let mut txn = db.begin_transaction().unwrap();
    assert_eq!(db.get(Some(&mut txn), COL, 1).unwrap(), Some(b"old".to_vec()));

    db.put(None, COL, 1, Some(b"new")).unwrap();
    // Still the captured state inside the transaction.
    assert_eq!(db.get(Some(&mut txn), COL, 1).unwrap(), Some(b"old".to_vec()));

    // The watched read makes the commit fail.
    db.put(Some(&mut txn), COL, 2, Some(b"w")).unwrap();
    assert!(db.commit(&mut txn, Options::NONE).unwrap_err().is_conflict());
}

#[test]
fn snapshots_return_the_largest_generation_at_or_below_theirs() {
    let db = Database::in_memory();
    db.put(None, COL, 1, Some(b"g1")).unwrap();
    db.put(None, COL, 1, Some(b"g2")).unwrap();

    let mut snapshot = db.snapshot().unwrap();

    db.put(None, COL, 1, Some(b"g3")).unwrap();
    db.put(None, COL, 1, None).unwrap();
    db.put(None, COL, 1, Some(b"g5")).unwrap();

    // The snapshot still observes the largest generation <= its own.
    assert_eq!(
        db.get(Some(&mut snapshot), COL, 1).unwrap(),
        Some(b"g2".to_vec())
    );
    assert_eq!(db.get(None, COL, 1).unwrap(), Some(b"g5".to_vec()));
}

// ============================================================================
// P7-P8: graph consistency and cascade
// ============================================================================

#[test]
fn every_edge_lands_once_per_run_and_self_loops_once_per_side() {
    let db = Database::in_memory();
    let graph = db.graph();

    graph
        .upsert_edges(
            None,
            COL,
            &[
                Edge::new(1, 2, 9),
                Edge::new(1, 2, 9), // duplicate: no-op
                Edge::new(1, 2, 10), // parallel edge with its own id
                Edge::new(5, 5, 77), // self-loop
            ],
        )
        .unwrap();

    let from_source = graph
        .edges_containing(None, COL, &[1], Role::Source)
        .unwrap();
    assert_eq!(from_source, vec![Edge::new(1, 2, 9), Edge::new(1, 2, 10)]);

    let from_target = graph
        .edges_containing(None, COL, &[2], Role::Target)
        .unwrap();
    assert_eq!(from_target, vec![Edge::new(1, 2, 9), Edge::new(1, 2, 10)]);

    let mut arena = Arena::new();
    let loop_degree = graph
        .degrees(None, COL, &[5], Role::Any, Options::NONE, &mut arena)
        .unwrap();
    assert_eq!(loop_degree, &[2]); // one pair in each run

    let loop_edges = graph.edges_containing(None, COL, &[5], Role::Any).unwrap();
    assert_eq!(loop_edges, vec![Edge::new(5, 5, 77)]);
}

#[test]
fn vertex_removal_leaves_no_dangling_pairs_anywhere() {
    let db = Database::in_memory();
    let graph = db.graph();

    let star: Vec<Edge> = (1..=6)
        .map(|other| {
            if other % 2 == 0 {
                Edge::new(0, other, other)
            } else {
                Edge::new(other, 0, other)
            }
        })
        .collect();
    graph.upsert_edges(None, COL, &star).unwrap();

    graph.remove_vertices(None, COL, &[0], Role::Any).unwrap();

    let mut arena = Arena::new();
    let contains = graph
        .contains(None, COL, &[0], Options::NONE, &mut arena)
        .unwrap();
    assert!(!manifold::bits::get(contains, 0));

    for other in 1..=6 {
        let edges = graph
            .edges_containing(None, COL, &[other], Role::Any)
            .unwrap();
        assert!(
            edges.iter().all(|e| e.source != 0 && e.target != 0),
            "vertex {} still references the removed vertex",
            other
        );
    }
}

#[test]
fn whole_graph_edge_stream_emits_each_edge_once_from_source_views() {
    let db = Database::in_memory();
    let graph = db.graph();
    let edges = [Edge::new(1, 2, 5), Edge::new(2, 3, 6), Edge::new(3, 1, 7)];
    graph.upsert_edges(None, COL, &edges).unwrap();

    let mut streamed: Vec<Edge> = graph
        .edges(COL, Role::Source)
        .collect::<manifold::Result<Vec<_>>>()
        .unwrap();
    streamed.sort_unstable();
    assert_eq!(streamed, edges.to_vec());

    // Role::Any sees both endpoint views of every edge.
    let doubled = graph
        .edges(COL, Role::Any)
        .collect::<manifold::Result<Vec<_>>>()
        .unwrap();
    assert_eq!(doubled.len(), 2 * edges.len());
}

#[test]
fn explicit_edge_id_removal_verifies_the_whole_triple() {
    let db = Database::in_memory();
    let graph = db.graph();
    graph
        .upsert_edges(None, COL, &[Edge::new(1, 2, 9), Edge::new(1, 2, 10)])
        .unwrap();

    // Wrong id: not found, nothing removed.
    let found = graph
        .remove_edges(None, COL, &[Edge::new(1, 2, 99)])
        .unwrap();
    assert_eq!(found, vec![false]);
    assert_eq!(graph.edges_between(None, COL, 1, 2).unwrap().len(), 2);

    // Sentinel id: removes every parallel edge.
    let found = graph
        .remove_edges(None, COL, &[Edge::unlabeled(1, 2)])
        .unwrap();
    assert_eq!(found, vec![true]);
    assert!(graph.edges_between(None, COL, 1, 2).unwrap().is_empty());
}

// ============================================================================
// P9: patch algebra
// ============================================================================

#[test]
fn test_carrying_patches_fail_on_reapplication_but_merge_is_idempotent() {
    let db = Database::in_memory();
    let docs = db.docs();

    docs.write(
        None,
        COL,
        1,
        br#"{"counter":1}"#,
        DocFormat::Json,
        DocModification::Upsert,
        None,
    )
    .unwrap();

    let patch = br#"[
        {"op":"test","path":"/counter","value":1},
        {"op":"replace","path":"/counter","value":2}
    ]"#;
    docs.write(
        None,
        COL,
        1,
        patch,
        DocFormat::Json,
        DocModification::Patch,
        None,
    )
    .unwrap();

    // The test op now fails, and the document is untouched.
    assert!(docs
        .write(
            None,
            COL,
            1,
            patch,
            DocFormat::Json,
            DocModification::Patch,
            None
        )
        .is_err());
    let counter = docs
        .read_field(None, COL, 1, &Pointer::parse("/counter").unwrap(), ScalarType::I64)
        .unwrap();
    assert_eq!(counter.value, Some(manifold::CastScalar::Int(2)));

    // Merge-patch applied twice converges to the same document.
    let merge = br#"{"counter":null,"name":"fixed"}"#;
    for _ in 0..2 {
        docs.write(
            None,
            COL,
            1,
            merge,
            DocFormat::Json,
            DocModification::Merge,
            None,
        )
        .unwrap();
    }
    let doc = docs.read_doc(None, COL, 1).unwrap().unwrap();
    assert_eq!(
        doc,
        manifold::DocValue::parse(br#"{"name":"fixed"}"#, DocFormat::Json).unwrap()
    );
}

// ============================================================================
// P10: gather validity
// ============================================================================

#[test]
fn gather_cells_are_valid_castable_and_zeroed_when_missing() {
    let db = Database::in_memory();
    let docs = db.docs();

    docs.write(
        None,
        COL,
        1,
        br#"{"n":5,"s":"text"}"#,
        DocFormat::Json,
        DocModification::Upsert,
        None,
    )
    .unwrap();
    docs.write(
        None,
        COL,
        2,
        br#"{"s":"other"}"#,
        DocFormat::Json,
        DocModification::Upsert,
        None,
    )
    .unwrap();

    let mut arena = Arena::new();
    let n = Pointer::parse("/n").unwrap();
    let s = Pointer::parse("/s").unwrap();
    let gathered = docs
        .gather(
            None,
            COL,
            &[1, 2],
            &[(n, ScalarType::I64), (s.clone(), ScalarType::I64)],
            Options::NONE,
            &mut arena,
        )
        .unwrap();

    let n_col = &gathered.columns[0];
    // Row 1 has the field: valid, exact cast.
    assert!(manifold::bits::get(n_col.validity, 0));
    assert_eq!(n_col.cell(0), Some(&5i64.to_le_bytes()[..]));
    // Row 2 misses the field: invalid, zeroed, no collision.
    assert!(!manifold::bits::get(n_col.validity, 1));
    assert!(!manifold::bits::get(n_col.collisions, 1));
    assert_eq!(n_col.cell(1), Some(&0i64.to_le_bytes()[..]));

    let s_col = &gathered.columns[1];
    // "text" cannot become an integer: collision, invalid.
    assert!(!manifold::bits::get(s_col.validity, 0));
    assert!(manifold::bits::get(s_col.collisions, 0));
}

// ============================================================================
// P11: prefix enumeration across cursors
// ============================================================================

#[test]
fn literal_prefix_enumerates_every_match_exactly_once() {
    let db = Database::in_memory();
    let paths = db.paths();

    let stored: Vec<String> = (0..40).map(|i| format!("prefix/{:02}", i)).collect();
    let decoys: Vec<String> = (0..10).map(|i| format!("other/{:02}", i)).collect();
    let payload = [0u8];
    let entries: Vec<(&str, Option<&[u8]>)> = stored
        .iter()
        .chain(decoys.iter())
        .map(|p| (p.as_str(), Some(&payload[..])))
        .collect();
    paths.write(None, COL, &entries, Some(b'/')).unwrap();

    let mut arena = Arena::new();
    let mut collected: Vec<String> = Vec::new();
    let mut cursor = None;
    loop {
        let out = paths
            .matches(
                None,
                COL,
                &[MatchTask {
                    pattern: "prefix/",
                    limit: 7,
                    cursor,
                }],
                Options::NONE,
                &mut arena,
            )
            .unwrap();
        collected.extend(out.task_paths(0).map(|p| p.to_string()));
        match out.next_cursor(0) {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    collected.sort_unstable();
    let mut expected = stored.clone();
    expected.sort_unstable();
    assert_eq!(collected, expected);
}

// ============================================================================
// P12: conflict detection between concurrent writers
// ============================================================================

#[test]
fn concurrent_same_key_writers_resolve_to_one_winner() {
    let db = Database::in_memory();
    db.put(None, COL, 1, Some(b"base")).unwrap();

    let mut left = db.begin_transaction().unwrap();
    let mut right = db.begin_transaction().unwrap();
    let _ = db.get(Some(&mut left), COL, 1).unwrap();
    let _ = db.get(Some(&mut right), COL, 1).unwrap();
    db.put(Some(&mut left), COL, 1, Some(b"from-left")).unwrap();
    db.put(Some(&mut right), COL, 1, Some(b"from-right")).unwrap();

    db.commit(&mut left, Options::NONE).unwrap();
    let err = db.commit(&mut right, Options::NONE).unwrap_err();
    assert!(err.is_conflict());

    assert_eq!(db.get(None, COL, 1).unwrap(), Some(b"from-left".to_vec()));
}

// ============================================================================
// Cross-format documents
// ============================================================================

#[test]
fn documents_survive_format_conversion() {
    let db = Database::in_memory();
    let docs = db.docs();

    docs.write(
        None,
        COL,
        1,
        br#"{"name":"conv","n":12}"#,
        DocFormat::Json,
        DocModification::Upsert,
        None,
    )
    .unwrap();

    let mut arena = Arena::new();
    let msgpack = docs
        .read(None, COL, &[1], DocFormat::MsgPack, Options::NONE, &mut arena)
        .unwrap();
    let packed = msgpack.value(0).unwrap().to_vec();

    // Write the MessagePack rendition under another key; the canonical
    // trees must be identical.
    docs.write(
        None,
        COL,
        2,
        &packed,
        DocFormat::MsgPack,
        DocModification::Upsert,
        None,
    )
    .unwrap();
    assert_eq!(
        docs.read_doc(None, COL, 1).unwrap(),
        docs.read_doc(None, COL, 2).unwrap()
    );
}
