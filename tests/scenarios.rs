//! End-to-end scenarios across the whole call surface
//!
//! Each test drives one workflow through the public facade exactly as a
//! binding would: open, touch several modalities, verify the observable
//! state.

use manifold::{
    Arena, CollectionHandle, Contents, Database, DocFormat, DocModification, Edge, MatchTask,
    Metric, Options, Places, Pointer, Role, ScalarType, VectorDtype,
};

const COL: CollectionHandle = CollectionHandle::DEFAULT;

// ============================================================================
// S1: blob triplet
// ============================================================================

#[test]
fn blob_triplet_round_trip_and_erase() {
    let db = Database::in_memory();
    let blobs = db.blobs();
    let keys = [b'a' as i64, b'b' as i64, b'c' as i64];
    let payloads: Vec<Option<&[u8]>> = vec![Some(b"\x41"), Some(b"\x42"), Some(b"\x43")];

    blobs
        .write_values(None, COL, &keys, &payloads, Options::NONE)
        .unwrap();

    let mut arena = Arena::new();
    let out = blobs
        .read(None, &Places::in_collection(COL, &keys), Options::NONE, &mut arena)
        .unwrap();
    assert_eq!(out.value(0), Some(&b"\x41"[..]));
    assert_eq!(out.value(1), Some(&b"\x42"[..]));
    assert_eq!(out.value(2), Some(&b"\x43"[..]));
    assert_eq!(out.lengths, &[1, 1, 1]);

    let erased: Vec<Option<&[u8]>> = vec![None, None, None];
    blobs
        .write_values(None, COL, &keys, &erased, Options::NONE)
        .unwrap();
    let out = blobs
        .read(None, &Places::in_collection(COL, &keys), Options::NONE, &mut arena)
        .unwrap();
    for i in 0..3 {
        assert!(!out.present(i));
    }
}

// ============================================================================
// S2: transaction read-committed
// ============================================================================

#[test]
fn transaction_is_read_committed_to_outsiders() {
    let db = Database::in_memory();
    let mut txn = db.begin_transaction().unwrap();

    db.put(Some(&mut txn), COL, 42, Some(b"X")).unwrap();
    assert_eq!(db.get(Some(&mut txn), COL, 42).unwrap(), Some(b"X".to_vec()));
    assert_eq!(db.get(None, COL, 42).unwrap(), None);

    db.commit(&mut txn, Options::NONE).unwrap();
    assert_eq!(db.get(None, COL, 42).unwrap(), Some(b"X".to_vec()));
}

// ============================================================================
// S3: graph triangle
// ============================================================================

#[test]
fn graph_triangle_with_vertex_removal() {
    let db = Database::in_memory();
    let graph = db.graph();
    let mut arena = Arena::new();

    graph
        .upsert_edges(
            None,
            COL,
            &[Edge::new(1, 2, 9), Edge::new(2, 3, 10), Edge::new(3, 1, 11)],
        )
        .unwrap();

    let degrees = graph
        .degrees(None, COL, &[1, 2, 3], Role::Any, Options::NONE, &mut arena)
        .unwrap();
    assert_eq!(degrees, &[2, 2, 2]);

    let between = graph.edges_between(None, COL, 1, 2).unwrap();
    assert_eq!(between, vec![Edge::new(1, 2, 9)]);

    graph.remove_vertices(None, COL, &[2], Role::Any).unwrap();

    let degrees = graph
        .degrees(None, COL, &[1], Role::Any, Options::NONE, &mut arena)
        .unwrap();
    assert_eq!(degrees, &[1]);
    assert!(graph.edges_between(None, COL, 1, 2).unwrap().is_empty());

    let contains = graph
        .contains(None, COL, &[2], Options::NONE, &mut arena)
        .unwrap();
    assert!(!manifold::bits::get(contains, 0));
}

// ============================================================================
// S4: document field round-trip
// ============================================================================

#[test]
fn document_field_reads_and_gather_diagnostics() {
    let db = Database::in_memory();
    let docs = db.docs();

    docs.write(
        None,
        COL,
        1,
        br#"{"person":"Alice","age":27}"#,
        DocFormat::Json,
        DocModification::Upsert,
        None,
    )
    .unwrap();

    let person = docs
        .read_field(None, COL, 1, &Pointer::parse("/person").unwrap(), ScalarType::Str)
        .unwrap();
    assert_eq!(
        person.value,
        Some(manifold::CastScalar::Str("Alice".to_string()))
    );
    assert!(!person.collision);

    let age = docs
        .read_field(None, COL, 1, &Pointer::parse("/age").unwrap(), ScalarType::I32)
        .unwrap();
    assert_eq!(age.value, Some(manifold::CastScalar::Int(27)));
    assert!(!age.converted);

    let mut arena = Arena::new();
    let age_ptr = Pointer::parse("/age").unwrap();
    let gathered = docs
        .gather(
            None,
            COL,
            &[1],
            &[
                (age_ptr.clone(), ScalarType::I32),
                (age_ptr, ScalarType::Str),
            ],
            Options::NONE,
            &mut arena,
        )
        .unwrap();

    let as_i32 = &gathered.columns[0];
    assert!(manifold::bits::get(as_i32.validity, 0));
    assert!(!manifold::bits::get(as_i32.converted, 0));
    assert_eq!(as_i32.cell(0), Some(&27i32.to_le_bytes()[..]));

    let as_str = &gathered.columns[1];
    assert!(manifold::bits::get(as_str.validity, 0));
    assert!(manifold::bits::get(as_str.converted, 0));
    assert_eq!(as_str.variable(0), Some(&b"27"[..]));
}

// ============================================================================
// S5: paths regex and cursor continuation
// ============================================================================

#[test]
fn path_patterns_and_cursors() {
    let db = Database::in_memory();
    let paths = db.paths();

    let companies = [
        "Apple", "Amazon", "Adobe", "Netflix", "Nvidia", "Google", "Facebook",
    ];
    let tags: Vec<[u8; 1]> = (0..companies.len() as u8).map(|i| [i]).collect();
    let entries: Vec<(&str, Option<&[u8]>)> = companies
        .iter()
        .zip(tags.iter())
        .map(|(name, tag)| (*name, Some(&tag[..])))
        .collect();
    paths.write(None, COL, &entries, Some(b'/')).unwrap();

    let mut arena = Arena::new();
    let out = paths
        .matches(
            None,
            COL,
            &[MatchTask {
                pattern: "A.*e",
                limit: 10,
                cursor: None,
            }],
            Options::NONE,
            &mut arena,
        )
        .unwrap();
    let mut found: Vec<&str> = out.task_paths(0).collect();
    found.sort_unstable();
    assert_eq!(found, vec!["Adobe", "Apple"]);
    assert_eq!(out.next_cursor(0), None);

    // Prefix "N", one at a time across two cursor steps.
    let mut collected: Vec<String> = Vec::new();
    let mut cursor = None;
    loop {
        let out = paths
            .matches(
                None,
                COL,
                &[MatchTask {
                    pattern: "N",
                    limit: 1,
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
    assert_eq!(collected, vec!["Netflix", "Nvidia"]);
}

// ============================================================================
// S6: vectors cosine search
// ============================================================================

#[test]
fn cosine_search_orders_by_similarity() {
    let db = Database::in_memory();
    let vectors = db.vectors();
    vectors.declare(COL, 3, VectorDtype::F32).unwrap();

    let keys = [b'a' as i64, b'b' as i64, b'c' as i64];
    #[rustfmt::skip]
    let data = [
        0.3, 0.1, 0.2,
        0.35, 0.1, 0.2,
        -0.1, 0.2, 0.5,
    ];
    vectors.write(None, COL, &keys, &data).unwrap();

    let mut arena = Arena::new();
    let out = vectors
        .search(
            None,
            COL,
            &[0.3, 0.1, 0.2],
            2,
            Metric::Cosine,
            None,
            Options::NONE,
            &mut arena,
        )
        .unwrap();
    assert_eq!(out.counts, &[2]);
    let matches: Vec<(i64, f32)> = out.matches(0).collect();
    assert_eq!(matches[0].0, b'a' as i64);
    assert_eq!(matches[1].0, b'b' as i64);
    assert!(matches[0].1 >= matches[1].1);
}

// ============================================================================
// Cross-modality atomicity
// ============================================================================

#[test]
fn one_transaction_spans_blobs_documents_and_edges() {
    let db = Database::in_memory();
    let graph_col = db.create_collection("graph", Default::default()).unwrap();
    let docs_col = db.create_collection("docs", Default::default()).unwrap();

    let mut txn = db.begin_transaction().unwrap();
    db.put(Some(&mut txn), COL, 1, Some(b"raw")).unwrap();
    db.docs()
        .write(
            Some(&mut txn),
            docs_col,
            1,
            br#"{"kind":"node"}"#,
            DocFormat::Json,
            DocModification::Upsert,
            None,
        )
        .unwrap();
    db.graph()
        .upsert_edges(Some(&mut txn), graph_col, &[Edge::new(1, 2, 7)])
        .unwrap();

    // Nothing is visible before commit.
    assert_eq!(db.get(None, COL, 1).unwrap(), None);
    assert!(db.docs().read_doc(None, docs_col, 1).unwrap().is_none());

    db.commit(&mut txn, Options::NONE).unwrap();

    assert_eq!(db.get(None, COL, 1).unwrap(), Some(b"raw".to_vec()));
    assert!(db.docs().read_doc(None, docs_col, 1).unwrap().is_some());
    assert_eq!(
        db.graph().edges_between(None, graph_col, 1, 2).unwrap(),
        vec![Edge::new(1, 2, 7)]
    );
}

// ============================================================================
// Strided write resolution
// ============================================================================

#[test]
fn offsets_describe_a_shared_tape() {
    let db = Database::in_memory();
    let tape: &[u8] = b"onetwothree";
    let keys = [1i64, 2, 3];
    let values: Vec<Option<&[u8]>> = vec![Some(tape); 3];
    let offsets = [0u32, 3, 6, 11];
    db.write(
        None,
        &Places::in_collection(COL, &keys),
        &Contents {
            values: manifold::Strided::Slice(&values),
            presences: None,
            offsets: Some(manifold::Strided::Slice(&offsets)),
            lengths: None,
        },
        Options::NONE,
    )
    .unwrap();

    assert_eq!(db.get(None, COL, 1).unwrap(), Some(b"one".to_vec()));
    assert_eq!(db.get(None, COL, 2).unwrap(), Some(b"two".to_vec()));
    assert_eq!(db.get(None, COL, 3).unwrap(), Some(b"three".to_vec()));
}
