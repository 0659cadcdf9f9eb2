//! Vectors modality
//!
//! Fixed-dimension numeric vectors keyed by the main key space. A
//! collection declares its dimension and element type once; rows are
//! stored as little-endian scalars of that type and move through the
//! API as `f32`, the working precision of the similarity kernels.
//! Search is exact brute force over the live rows: every stored vector
//! is scored against every query and the top k survive, which is the
//! contract an approximate index would have to honor too.

use crate::database::Database;
use crate::snapshot::Txn;
use crate::substrate::ScanTasks;
use half::f16;
use manifold_core::arena::Arena;
use manifold_core::error::{EngineError, Result};
use manifold_core::options::Options;
use manifold_core::strided::Strided;
use manifold_core::types::{bits, CollectionHandle, Key};
use manifold_storage::{VectorDtype, VectorSpec};

/// Similarity metric for vector search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Cosine of the angle between vectors; higher is closer
    Cosine,
    /// Inner product; higher is closer
    Dot,
    /// Euclidean distance; lower is closer
    L2,
}

impl Metric {
    /// Whether larger metric values mean closer matches
    fn higher_is_better(self) -> bool {
        !matches!(self, Metric::L2)
    }

    /// Score one candidate against one query
    fn score(self, query: &[f32], candidate: &[f32]) -> f32 {
        match self {
            Metric::Cosine => cosine(query, candidate),
            Metric::Dot => dot(query, candidate),
            Metric::L2 => l2_distance(query, candidate),
        }
    }

    /// Whether a score passes an optional threshold
    fn passes(self, score: f32, threshold: Option<f32>) -> bool {
        match threshold {
            None => true,
            Some(threshold) if self.higher_is_better() => score >= threshold,
            Some(threshold) => score <= threshold,
        }
    }
}

/// Dot product of two equally sized vectors
fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Cosine similarity; zero when either vector has zero norm
fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = dot(a, a).sqrt();
    let norm_b = dot(b, b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot(a, b) / (norm_a * norm_b)
    }
}

/// Euclidean distance
fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

fn encode_row(row: &[f32], dtype: VectorDtype) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(row.len() * dtype.scalar_size());
    for value in row {
        match dtype {
            VectorDtype::F32 => bytes.extend_from_slice(&value.to_le_bytes()),
            VectorDtype::F64 => bytes.extend_from_slice(&(*value as f64).to_le_bytes()),
            VectorDtype::F16 => bytes.extend_from_slice(&f16::from_f32(*value).to_le_bytes()),
            VectorDtype::I8 => bytes.push((value.round().clamp(-128.0, 127.0) as i8) as u8),
        }
    }
    bytes
}

fn decode_row(bytes: &[u8], spec: &VectorSpec) -> Result<Vec<f32>> {
    if bytes.len() != spec.vector_size() {
        return Err(EngineError::wrong_modality(format!(
            "stored vector is {} bytes, the collection shape needs {}",
            bytes.len(),
            spec.vector_size()
        )));
    }
    let scalar = spec.dtype.scalar_size();
    let mut row = Vec::with_capacity(spec.dimensions);
    for chunk in bytes.chunks_exact(scalar) {
        row.push(match spec.dtype {
            VectorDtype::F32 => f32::from_le_bytes(chunk.try_into().expect("sized")),
            VectorDtype::F64 => f64::from_le_bytes(chunk.try_into().expect("sized")) as f32,
            VectorDtype::F16 => f16::from_le_bytes(chunk.try_into().expect("sized")).to_f32(),
            VectorDtype::I8 => chunk[0] as i8 as f32,
        });
    }
    Ok(row)
}

/// Fixed-dimension vectors over the substrate
#[derive(Clone)]
pub struct Vectors {
    db: Database,
}

impl Vectors {
    /// Create the facade
    pub fn new(db: Database) -> Vectors {
        Vectors { db }
    }

    /// Declare (or re-affirm) a collection's vector shape
    pub fn declare(
        &self,
        collection: CollectionHandle,
        dimensions: usize,
        dtype: VectorDtype,
    ) -> Result<()> {
        if dimensions == 0 {
            return Err(EngineError::invalid_argument(
                "vector dimension must be positive",
            ));
        }
        self.db
            .declare_vector_spec(collection, VectorSpec { dimensions, dtype })
    }

    fn spec(&self, collection: CollectionHandle) -> Result<VectorSpec> {
        self.db
            .collection_config(collection)?
            .vector
            .ok_or_else(|| {
                EngineError::invalid_argument(format!(
                    "collection {} has no declared vector shape",
                    collection
                ))
            })
    }

    // ======================== writes ========================

    /// Insert row-major dense vectors under the given keys
    ///
    /// `data` must hold `keys.len() * dimensions` scalars.
    pub fn write(
        &self,
        mut txn: Option<&mut Txn>,
        collection: CollectionHandle,
        keys: &[Key],
        data: &[f32],
    ) -> Result<()> {
        let spec = self.spec(collection)?;
        let expected = keys.len() * spec.dimensions;
        if data.len() != expected {
            return Err(EngineError::DimensionMismatch {
                expected,
                got: data.len(),
            });
        }
        for (i, key) in keys.iter().enumerate() {
            let row = &data[i * spec.dimensions..(i + 1) * spec.dimensions];
            self.db.put(
                txn.as_deref_mut(),
                collection,
                *key,
                Some(&encode_row(row, spec.dtype)),
            )?;
        }
        Ok(())
    }

    /// Delete vectors
    pub fn remove(
        &self,
        mut txn: Option<&mut Txn>,
        collection: CollectionHandle,
        keys: &[Key],
    ) -> Result<()> {
        for key in keys {
            self.db.put(txn.as_deref_mut(), collection, *key, None)?;
        }
        Ok(())
    }

    // ======================== reads ========================

    /// Pack selected vectors into a row-major dense output
    ///
    /// Missing rows read as zeroes with their presence bit clear.
    pub fn read<'a>(
        &self,
        mut txn: Option<&mut Txn>,
        collection: CollectionHandle,
        keys: &[Key],
        options: Options,
        arena: &'a mut Arena,
    ) -> Result<VectorReadOutput<'a>> {
        let spec = self.spec(collection)?;
        let mut rows: Vec<Option<Vec<f32>>> = Vec::with_capacity(keys.len());
        for key in keys {
            rows.push(
                match self
                    .db
                    .get_with(txn.as_deref_mut(), collection, *key, options)?
                {
                    Some(bytes) => Some(decode_row(&bytes, &spec)?),
                    None => None,
                },
            );
        }

        arena.begin_call(options.dont_discard_arena());
        let arena = &*arena;
        let presences = arena.alloc_slice::<u8>(bits::bitmap_bytes(keys.len()))?;
        let vectors = arena.alloc_slice::<f32>(keys.len() * spec.dimensions)?;
        for (i, row) in rows.iter().enumerate() {
            if let Some(row) = row {
                bits::set(presences, i, true);
                vectors[i * spec.dimensions..(i + 1) * spec.dimensions].copy_from_slice(row);
            }
        }
        Ok(VectorReadOutput {
            dimensions: spec.dimensions,
            presences,
            vectors,
        })
    }

    /// Exact k-nearest-neighbor search for a batch of queries
    ///
    /// `queries` holds `query_count * dimensions` scalars. Results per
    /// query are ordered best match first; ties in the metric break
    /// toward the ascending key. The optional threshold keeps only
    /// scores at least (cosine, dot) or at most (L2) its value.
    pub fn search<'a>(
        &self,
        txn: Option<&Txn>,
        collection: CollectionHandle,
        queries: &[f32],
        k: usize,
        metric: Metric,
        threshold: Option<f32>,
        options: Options,
        arena: &'a mut Arena,
    ) -> Result<SearchOutput<'a>> {
        let spec = self.spec(collection)?;
        if queries.is_empty() || queries.len() % spec.dimensions != 0 {
            return Err(EngineError::DimensionMismatch {
                expected: spec.dimensions,
                got: queries.len(),
            });
        }
        let query_count = queries.len() / spec.dimensions;
        let candidates = self.collect_candidates(txn, collection, &spec)?;

        let mut per_query: Vec<Vec<(f32, Key)>> = Vec::with_capacity(query_count);
        for q in 0..query_count {
            let query = &queries[q * spec.dimensions..(q + 1) * spec.dimensions];
            let mut scored: Vec<(f32, Key)> = candidates
                .iter()
                .map(|(key, row)| (metric.score(query, row), *key))
                .filter(|(score, _)| metric.passes(*score, threshold))
                .collect();
            scored.sort_by(|(score_a, key_a), (score_b, key_b)| {
                let ordering = if metric.higher_is_better() {
                    score_b.partial_cmp(score_a)
                } else {
                    score_a.partial_cmp(score_b)
                };
                ordering
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(key_a.cmp(key_b))
            });
            scored.truncate(k);
            per_query.push(scored);
        }

        arena.begin_call(options.dont_discard_arena());
        let arena = &*arena;
        let counts = arena.alloc_slice::<u32>(query_count)?;
        let offsets = arena.alloc_slice::<u32>(query_count + 1)?;
        let total: usize = per_query.iter().map(|m| m.len()).sum();
        let keys = arena.alloc_slice::<Key>(total)?;
        let scores = arena.alloc_slice::<f32>(total)?;

        let mut cursor = 0usize;
        for (q, matches) in per_query.iter().enumerate() {
            counts[q] = matches.len() as u32;
            offsets[q] = cursor as u32;
            for (score, key) in matches {
                keys[cursor] = *key;
                scores[cursor] = *score;
                cursor += 1;
            }
        }
        offsets[query_count] = cursor as u32;

        Ok(SearchOutput {
            counts,
            offsets,
            keys,
            scores,
        })
    }

    /// Gather every live (key, row) pair visible to the caller
    fn collect_candidates(
        &self,
        txn: Option<&Txn>,
        collection: CollectionHandle,
        spec: &VectorSpec,
    ) -> Result<Vec<(Key, Vec<f32>)>> {
        let mut candidates = Vec::new();
        let mut arena = Arena::new();
        let mut start = Key::MIN;
        const BATCH: u32 = 512;

        loop {
            let tasks = ScanTasks {
                collections: Strided::Repeat(collection),
                start_keys: Strided::Repeat(start),
                end_keys: Strided::Repeat(Key::MAX),
                limits: Strided::Repeat(BATCH),
                count: 1,
            };
            let keys: Vec<Key> = {
                let scan = self.db.scan(txn, &tasks, Options::NONE, &mut arena)?;
                scan.task_keys(0).to_vec()
            };
            let Some(last) = keys.last().copied() else {
                break;
            };
            for key in &keys {
                let bytes = match txn {
                    Some(txn) => {
                        use manifold_concurrency::Buffered;
                        let at = manifold_core::types::ColKey::new(collection, *key);
                        match txn.inner.buffered(at) {
                            Some(Buffered::Written(bytes)) => Some(bytes.to_vec()),
                            Some(Buffered::Deleted) => None,
                            None => self.db.read_at(collection, *key, txn.start_generation())?,
                        }
                    }
                    None => self.db.get(None, collection, *key)?,
                };
                if let Some(bytes) = bytes {
                    candidates.push((*key, decode_row(&bytes, spec)?));
                }
            }
            if keys.len() < BATCH as usize {
                break;
            }
            start = match last.checked_add(1) {
                Some(next) => next,
                None => break,
            };
        }
        Ok(candidates)
    }
}

/// Packed row-major vector read output
#[derive(Debug)]
pub struct VectorReadOutput<'a> {
    /// Scalars per row
    pub dimensions: usize,
    /// Presence bitmap, one bit per key
    pub presences: &'a [u8],
    /// Row-major dense rows; missing rows are zeroed
    pub vectors: &'a [f32],
}

impl<'a> VectorReadOutput<'a> {
    /// Row `i`, `None` when the key was absent
    pub fn row(&self, i: usize) -> Option<&'a [f32]> {
        if !bits::get(self.presences, i) {
            return None;
        }
        Some(&self.vectors[i * self.dimensions..(i + 1) * self.dimensions])
    }
}

/// Batched k-nearest-neighbor output: four parallel columns
#[derive(Debug)]
pub struct SearchOutput<'a> {
    /// Matches per query
    pub counts: &'a [u32],
    /// Offset of each query's matches, plus the trailing total
    pub offsets: &'a [u32],
    /// Matched keys, best first per query
    pub keys: &'a [Key],
    /// Metric values, parallel to `keys`
    pub scores: &'a [f32],
}

impl<'a> SearchOutput<'a> {
    /// The (key, score) matches of one query
    pub fn matches(&self, q: usize) -> impl Iterator<Item = (Key, f32)> + 'a {
        let start = self.offsets[q] as usize;
        let end = self.offsets[q + 1] as usize;
        self.keys[start..end]
            .iter()
            .copied()
            .zip(self.scores[start..end].iter().copied())
    }
}
