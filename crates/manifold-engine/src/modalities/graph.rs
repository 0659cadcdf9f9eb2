//! Graph modality
//!
//! Each vertex is one substrate value holding two sorted adjacency runs:
//!
//! ```text
//! [u32 out_count][u32 in_count][(i64 neighbor, i64 edge_id) out pairs][in pairs]
//! ```
//!
//! An edge (s, t, e) appears once in s's outgoing run and once in t's
//! incoming run; a self-loop appears once in each run of the same
//! vertex. Every mutation is a multi-key read-modify-write: it joins the
//! caller's transaction when one is passed, and otherwise runs in an
//! internal transaction retried on conflict, so partial failure can
//! never leave a dangling half-edge.

use crate::database::Database;
use crate::snapshot::Txn;
use crate::substrate::ScanTasks;
use manifold_core::arena::Arena;
use manifold_core::error::{EngineError, Result};
use manifold_core::options::Options;
use manifold_core::types::{bits, CollectionHandle, Key, DEGREE_MISSING, EDGE_ID_NONE};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Which of a vertex's runs an operation touches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Outgoing run only
    Source,
    /// Incoming run only
    Target,
    /// Both runs
    Any,
}

impl Role {
    fn covers_source(self) -> bool {
        matches!(self, Role::Source | Role::Any)
    }

    fn covers_target(self) -> bool {
        matches!(self, Role::Target | Role::Any)
    }
}

/// A directed edge with an optional identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Edge {
    /// Source vertex
    pub source: Key,
    /// Target vertex
    pub target: Key,
    /// Edge identity; [`EDGE_ID_NONE`] when the caller did not label it
    pub id: i64,
}

impl Edge {
    /// An edge with an explicit identity
    pub fn new(source: Key, target: Key, id: i64) -> Edge {
        Edge { source, target, id }
    }

    /// An edge without an identity; the reserved sentinel is stored
    pub fn unlabeled(source: Key, target: Key) -> Edge {
        Edge {
            source,
            target,
            id: EDGE_ID_NONE,
        }
    }
}

const PAIR_BYTES: usize = 16;
const HEADER_BYTES: usize = 8;

/// Decoded vertex value: two sorted (neighbor, edge-id) runs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VertexRecord {
    /// Outgoing run, sorted by (neighbor, edge-id)
    pub outs: Vec<(Key, i64)>,
    /// Incoming run, sorted by (neighbor, edge-id)
    pub ins: Vec<(Key, i64)>,
}

impl VertexRecord {
    /// Decode a stored vertex value
    ///
    /// An empty value decodes as a vertex with no edges; anything else
    /// must carry a full header and exactly the pairs it declares.
    pub fn decode(bytes: &[u8]) -> Result<VertexRecord> {
        if bytes.is_empty() {
            return Ok(VertexRecord::default());
        }
        if bytes.len() < HEADER_BYTES {
            return Err(EngineError::wrong_modality(
                "vertex value shorter than its header",
            ));
        }
        let out_count = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let in_count = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let expected = HEADER_BYTES + (out_count + in_count) * PAIR_BYTES;
        if bytes.len() != expected {
            return Err(EngineError::wrong_modality(format!(
                "vertex value is {} bytes, header declares {}",
                bytes.len(),
                expected
            )));
        }

        let mut read_pair = |index: usize| {
            let base = HEADER_BYTES + index * PAIR_BYTES;
            let neighbor = i64::from_le_bytes(bytes[base..base + 8].try_into().expect("sized"));
            let id = i64::from_le_bytes(bytes[base + 8..base + 16].try_into().expect("sized"));
            (neighbor, id)
        };
        let outs: Vec<(Key, i64)> = (0..out_count).map(&mut read_pair).collect();
        let ins: Vec<(Key, i64)> = (out_count..out_count + in_count).map(&mut read_pair).collect();
        Ok(VertexRecord { outs, ins })
    }

    /// Encode into the stored layout
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes =
            Vec::with_capacity(HEADER_BYTES + (self.outs.len() + self.ins.len()) * PAIR_BYTES);
        bytes.extend_from_slice(&(self.outs.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.ins.len() as u32).to_le_bytes());
        for (neighbor, id) in self.outs.iter().chain(self.ins.iter()) {
            bytes.extend_from_slice(&neighbor.to_le_bytes());
            bytes.extend_from_slice(&id.to_le_bytes());
        }
        bytes
    }

    /// Insert a pair at its sorted position; false when already present
    pub fn insert_pair(run: &mut Vec<(Key, i64)>, pair: (Key, i64)) -> bool {
        match run.binary_search(&pair) {
            Ok(_) => false,
            Err(position) => {
                run.insert(position, pair);
                true
            }
        }
    }

    /// Remove an exact pair; false when absent
    pub fn remove_pair(run: &mut Vec<(Key, i64)>, pair: (Key, i64)) -> bool {
        match run.binary_search(&pair) {
            Ok(position) => {
                run.remove(position);
                true
            }
            Err(_) => false,
        }
    }

    /// Remove every pair with the given neighbor, any edge-id
    pub fn remove_neighbor(run: &mut Vec<(Key, i64)>, neighbor: Key) -> usize {
        let before = run.len();
        run.retain(|(n, _)| *n != neighbor);
        before - run.len()
    }
}

fn load_record(
    db: &Database,
    txn: &mut Txn,
    collection: CollectionHandle,
    key: Key,
) -> Result<Option<VertexRecord>> {
    match db.get(Some(txn), collection, key)? {
        Some(bytes) => Ok(Some(VertexRecord::decode(&bytes)?)),
        None => Ok(None),
    }
}

fn load_cached<'c>(
    cache: &'c mut BTreeMap<Key, VertexRecord>,
    db: &Database,
    txn: &mut Txn,
    collection: CollectionHandle,
    key: Key,
) -> Result<&'c mut VertexRecord> {
    if !cache.contains_key(&key) {
        let record = load_record(db, txn, collection, key)?.unwrap_or_default();
        cache.insert(key, record);
    }
    Ok(cache.get_mut(&key).expect("just inserted"))
}

/// Labeled directed multi-graphs over the substrate
#[derive(Clone)]
pub struct Graph {
    db: Database,
}

impl Graph {
    /// Create the facade
    pub fn new(db: Database) -> Graph {
        Graph { db }
    }

    /// Join the caller's transaction or run an internal retried one
    fn with_txn<T>(
        &self,
        txn: Option<&mut Txn>,
        mut f: impl FnMut(&Database, &mut Txn) -> Result<T>,
    ) -> Result<T> {
        match txn {
            Some(txn) => f(&self.db, txn),
            None => self.db.transaction(|txn| f(&self.db, txn)),
        }
    }

    // ======================== mutations ========================

    /// Create empty vertex values where absent; no-op where present
    pub fn upsert_vertices(
        &self,
        txn: Option<&mut Txn>,
        collection: CollectionHandle,
        keys: &[Key],
    ) -> Result<()> {
        self.with_txn(txn, |db, txn| {
            for key in keys {
                if load_record(db, txn, collection, *key)?.is_none() {
                    db.put(
                        Some(&mut *txn),
                        collection,
                        *key,
                        Some(&VertexRecord::default().encode()),
                    )?;
                }
            }
            Ok(())
        })
    }

    /// Insert edges, creating endpoint vertices as needed
    ///
    /// Re-inserting an existing (target, edge-id) pair is a no-op;
    /// distinct edge-ids between the same endpoints coexist.
    pub fn upsert_edges(
        &self,
        txn: Option<&mut Txn>,
        collection: CollectionHandle,
        edges: &[Edge],
    ) -> Result<()> {
        self.with_txn(txn, |db, txn| {
            let mut cache: BTreeMap<Key, VertexRecord> = BTreeMap::new();
            let mut dirty: BTreeSet<Key> = BTreeSet::new();
            for edge in edges {
                let source = load_cached(&mut cache, db, txn, collection, edge.source)?;
                let inserted = VertexRecord::insert_pair(&mut source.outs, (edge.target, edge.id));
                let target = load_cached(&mut cache, db, txn, collection, edge.target)?;
                VertexRecord::insert_pair(&mut target.ins, (edge.source, edge.id));
                if inserted {
                    dirty.insert(edge.source);
                    dirty.insert(edge.target);
                }
            }
            // Vertices touched only by duplicate edges still get created.
            for edge in edges {
                dirty.insert(edge.source);
                dirty.insert(edge.target);
            }
            for key in &dirty {
                let record = cache.get(key).expect("dirty keys were cached");
                db.put(Some(&mut *txn), collection, *key, Some(&record.encode()))?;
            }
            Ok(())
        })
    }

    /// Remove edges; returns one found-bit per requested edge
    ///
    /// The sentinel edge-id removes every parallel edge between the
    /// endpoints. An explicit edge-id verifies the whole (source,
    /// target, edge-id) triple; a miss reports false for that edge and
    /// removes nothing.
    pub fn remove_edges(
        &self,
        txn: Option<&mut Txn>,
        collection: CollectionHandle,
        edges: &[Edge],
    ) -> Result<Vec<bool>> {
        self.with_txn(txn, |db, txn| {
            let mut cache: BTreeMap<Key, VertexRecord> = BTreeMap::new();
            let mut dirty: BTreeSet<Key> = BTreeSet::new();
            let mut found = vec![false; edges.len()];
            for (i, edge) in edges.iter().enumerate() {
                if edge.id == EDGE_ID_NONE {
                    let source = load_cached(&mut cache, db, txn, collection, edge.source)?;
                    let removed_out = VertexRecord::remove_neighbor(&mut source.outs, edge.target);
                    let target = load_cached(&mut cache, db, txn, collection, edge.target)?;
                    VertexRecord::remove_neighbor(&mut target.ins, edge.source);
                    if removed_out > 0 {
                        found[i] = true;
                        dirty.insert(edge.source);
                        dirty.insert(edge.target);
                    }
                } else {
                    let source = load_cached(&mut cache, db, txn, collection, edge.source)?;
                    let removed_out =
                        VertexRecord::remove_pair(&mut source.outs, (edge.target, edge.id));
                    if !removed_out {
                        continue;
                    }
                    let target = load_cached(&mut cache, db, txn, collection, edge.target)?;
                    VertexRecord::remove_pair(&mut target.ins, (edge.source, edge.id));
                    found[i] = true;
                    dirty.insert(edge.source);
                    dirty.insert(edge.target);
                }
            }
            for key in &dirty {
                let record = cache.get(key).expect("dirty keys were cached");
                db.put(Some(&mut *txn), collection, *key, Some(&record.encode()))?;
            }
            Ok(found)
        })
    }

    /// Remove vertices and cascade their edges away
    ///
    /// For every removed vertex, the runs selected by `role` drive the
    /// cascade: each listed neighbor loses every pair that names the
    /// doomed vertex in its opposite run. The vertex value itself is
    /// deleted last. Restricting the role is how bipartite callers skip
    /// runs they know are empty.
    pub fn remove_vertices(
        &self,
        txn: Option<&mut Txn>,
        collection: CollectionHandle,
        keys: &[Key],
        role: Role,
    ) -> Result<()> {
        self.with_txn(txn, |db, txn| {
            let mut cache: BTreeMap<Key, VertexRecord> = BTreeMap::new();
            let mut dirty: BTreeSet<Key> = BTreeSet::new();
            let mut doomed: BTreeSet<Key> = BTreeSet::new();

            for key in keys {
                let record = match cache.remove(key) {
                    Some(record) => Some(record),
                    None => load_record(db, txn, collection, *key)?,
                };
                let Some(record) = record else {
                    continue;
                };
                if role.covers_source() {
                    for (neighbor, _) in &record.outs {
                        if *neighbor == *key {
                            continue;
                        }
                        let other = load_cached(&mut cache, db, txn, collection, *neighbor)?;
                        if VertexRecord::remove_neighbor(&mut other.ins, *key) > 0 {
                            dirty.insert(*neighbor);
                        }
                    }
                }
                if role.covers_target() {
                    for (neighbor, _) in &record.ins {
                        if *neighbor == *key {
                            continue;
                        }
                        let other = load_cached(&mut cache, db, txn, collection, *neighbor)?;
                        if VertexRecord::remove_neighbor(&mut other.outs, *key) > 0 {
                            dirty.insert(*neighbor);
                        }
                    }
                }
                doomed.insert(*key);
            }

            for key in &dirty {
                if doomed.contains(key) {
                    continue;
                }
                let record = cache.get(key).expect("dirty keys were cached");
                db.put(Some(&mut *txn), collection, *key, Some(&record.encode()))?;
            }
            for key in &doomed {
                db.put(Some(&mut *txn), collection, *key, None)?;
            }
            Ok(())
        })
    }

    // ======================== queries ========================

    /// Which of the given vertices exist, as an arena bitset
    pub fn contains<'a>(
        &self,
        mut txn: Option<&mut Txn>,
        collection: CollectionHandle,
        keys: &[Key],
        options: Options,
        arena: &'a mut Arena,
    ) -> Result<&'a [u8]> {
        arena.begin_call(options.dont_discard_arena());
        let arena = &*arena;
        let bitmap = arena.alloc_slice::<u8>(bits::bitmap_bytes(keys.len()))?;
        for (i, key) in keys.iter().enumerate() {
            let present = self
                .db
                .get_with(txn.as_deref_mut(), collection, *key, options)?
                .is_some();
            bits::set(bitmap, i, present);
        }
        Ok(bitmap)
    }

    /// Degrees per vertex under a role; the missing sentinel for absent
    pub fn degrees<'a>(
        &self,
        mut txn: Option<&mut Txn>,
        collection: CollectionHandle,
        keys: &[Key],
        role: Role,
        options: Options,
        arena: &'a mut Arena,
    ) -> Result<&'a [u32]> {
        arena.begin_call(options.dont_discard_arena());
        let arena = &*arena;
        let degrees = arena.alloc_slice::<u32>(keys.len())?;
        for (i, key) in keys.iter().enumerate() {
            degrees[i] = match self
                .db
                .get_with(txn.as_deref_mut(), collection, *key, options)?
            {
                Some(bytes) => {
                    let record = VertexRecord::decode(&bytes)?;
                    let mut degree = 0usize;
                    if role.covers_source() {
                        degree += record.outs.len();
                    }
                    if role.covers_target() {
                        degree += record.ins.len();
                    }
                    degree as u32
                }
                None => DEGREE_MISSING,
            };
        }
        Ok(degrees)
    }

    /// Sorted, deduplicated neighbor keys per vertex
    pub fn neighbors<'a>(
        &self,
        mut txn: Option<&mut Txn>,
        collection: CollectionHandle,
        keys: &[Key],
        role: Role,
        options: Options,
        arena: &'a mut Arena,
    ) -> Result<NeighborsOutput<'a>> {
        let mut per_vertex: Vec<Vec<Key>> = Vec::with_capacity(keys.len());
        for key in keys {
            let mut neighbors: Vec<Key> = Vec::new();
            if let Some(bytes) = self
                .db
                .get_with(txn.as_deref_mut(), collection, *key, options)?
            {
                let record = VertexRecord::decode(&bytes)?;
                if role.covers_source() {
                    neighbors.extend(record.outs.iter().map(|(n, _)| *n));
                }
                if role.covers_target() {
                    neighbors.extend(record.ins.iter().map(|(n, _)| *n));
                }
                neighbors.sort_unstable();
                neighbors.dedup();
            }
            per_vertex.push(neighbors);
        }

        arena.begin_call(options.dont_discard_arena());
        let arena = &*arena;
        let offsets = arena.alloc_slice::<u32>(keys.len() + 1)?;
        let total: usize = per_vertex.iter().map(|n| n.len()).sum();
        let neighbors = arena.alloc_slice::<Key>(total)?;
        let mut cursor = 0usize;
        for (i, list) in per_vertex.iter().enumerate() {
            offsets[i] = cursor as u32;
            neighbors[cursor..cursor + list.len()].copy_from_slice(list);
            cursor += list.len();
        }
        offsets[keys.len()] = cursor as u32;
        Ok(NeighborsOutput { offsets, neighbors })
    }

    /// Sorted, deduplicated edges touching the given vertices
    pub fn edges_containing(
        &self,
        mut txn: Option<&mut Txn>,
        collection: CollectionHandle,
        keys: &[Key],
        role: Role,
    ) -> Result<Vec<Edge>> {
        let mut edges: Vec<Edge> = Vec::new();
        for key in keys {
            if let Some(bytes) = self.db.get(txn.as_deref_mut(), collection, *key)? {
                let record = VertexRecord::decode(&bytes)?;
                if role.covers_source() {
                    edges.extend(record.outs.iter().map(|(n, e)| Edge::new(*key, *n, *e)));
                }
                if role.covers_target() {
                    edges.extend(record.ins.iter().map(|(n, e)| Edge::new(*n, *key, *e)));
                }
            }
        }
        edges.sort_unstable();
        edges.dedup();
        Ok(edges)
    }

    /// Every edge between two endpoints, sorted by edge-id
    pub fn edges_between(
        &self,
        txn: Option<&mut Txn>,
        collection: CollectionHandle,
        source: Key,
        target: Key,
    ) -> Result<Vec<Edge>> {
        let mut edges: Vec<Edge> = Vec::new();
        if let Some(bytes) = self.db.get(txn, collection, source)? {
            let record = VertexRecord::decode(&bytes)?;
            edges.extend(
                record
                    .outs
                    .iter()
                    .filter(|(n, _)| *n == target)
                    .map(|(n, e)| Edge::new(source, *n, *e)),
            );
        }
        Ok(edges)
    }

    /// Lazily stream every edge in the collection at HEAD
    ///
    /// `Role::Source` yields each edge exactly once (its source view);
    /// `Role::Any` yields each edge twice, once per endpoint view. The
    /// iterator is finite and non-restartable, fetches vertices in key
    /// batches, and may be dropped early to short-circuit.
    pub fn edges(&self, collection: CollectionHandle, role: Role) -> EdgeScan {
        EdgeScan {
            db: self.db.clone(),
            collection,
            role,
            next_start: Some(Key::MIN),
            buffer: VecDeque::new(),
            arena: Arena::new(),
        }
    }
}

/// Neighbor lists packed into the arena
#[derive(Debug)]
pub struct NeighborsOutput<'a> {
    /// Offset of each vertex's neighbors, plus the trailing total
    pub offsets: &'a [u32],
    /// Neighbor keys, vertex after vertex, each list sorted and unique
    pub neighbors: &'a [Key],
}

impl<'a> NeighborsOutput<'a> {
    /// Neighbors of the i-th queried vertex
    pub fn of(&self, i: usize) -> &'a [Key] {
        &self.neighbors[self.offsets[i] as usize..self.offsets[i + 1] as usize]
    }
}

const EDGE_SCAN_BATCH: u32 = 256;

/// Lazy whole-graph edge stream
pub struct EdgeScan {
    db: Database,
    collection: CollectionHandle,
    role: Role,
    next_start: Option<Key>,
    buffer: VecDeque<Edge>,
    arena: Arena,
}

impl EdgeScan {
    fn refill(&mut self) -> Result<()> {
        while self.buffer.is_empty() {
            let Some(start) = self.next_start else {
                return Ok(());
            };
            let tasks = ScanTasks {
                collections: manifold_core::strided::Strided::Repeat(self.collection),
                start_keys: manifold_core::strided::Strided::Repeat(start),
                end_keys: manifold_core::strided::Strided::Repeat(Key::MAX),
                limits: manifold_core::strided::Strided::Repeat(EDGE_SCAN_BATCH),
                count: 1,
            };
            let batch: Vec<Key> = {
                let scan = self.db.scan(None, &tasks, Options::NONE, &mut self.arena)?;
                scan.task_keys(0).to_vec()
            };
            self.next_start = match batch.last() {
                Some(last) if batch.len() == EDGE_SCAN_BATCH as usize => last.checked_add(1),
                _ => None,
            };
            for key in batch {
                let Some(bytes) = self.db.get(None, self.collection, key)? else {
                    continue;
                };
                let record = VertexRecord::decode(&bytes)?;
                if self.role.covers_source() {
                    self.buffer
                        .extend(record.outs.iter().map(|(n, e)| Edge::new(key, *n, *e)));
                }
                if self.role.covers_target() {
                    self.buffer
                        .extend(record.ins.iter().map(|(n, e)| Edge::new(*n, key, *e)));
                }
            }
            if self.next_start.is_none() {
                return Ok(());
            }
        }
        Ok(())
    }
}

impl Iterator for EdgeScan {
    type Item = Result<Edge>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() {
            if let Err(err) = self.refill() {
                self.next_start = None;
                return Some(Err(err));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
