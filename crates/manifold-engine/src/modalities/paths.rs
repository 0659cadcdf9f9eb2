//! Paths modality
//!
//! Variable-length string paths over the fixed integer key space. The
//! surrogate key is the xxh3 hash of the path bytes; the stored record
//! keeps the original path in front of the payload so collisions can be
//! told apart and patterns can be tested:
//!
//! ```text
//! [u32 path_length][path bytes][payload]
//! ```
//!
//! Hash collisions are resolved by probing successive keys and
//! comparing the stored path. Pattern enumeration walks the collection
//! in key (hash) order, which makes continuation cursors cheap: a
//! cursor is simply the next candidate key.

use crate::database::Database;
use crate::snapshot::Txn;
use manifold_core::arena::Arena;
use manifold_core::error::{EngineError, Result};
use manifold_core::options::Options;
use manifold_core::types::{bits, CollectionHandle, Key, KEY_UNKNOWN, LENGTH_MISSING};
use regex::Regex;
use xxhash_rust::xxh3::xxh3_64;

const MAX_PROBES: i64 = 64;

/// Surrogate key of a path
pub fn surrogate(path: &str) -> Key {
    xxh3_64(path.as_bytes()) as Key
}

fn encode_record(path: &str, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(4 + path.len() + payload.len());
    bytes.extend_from_slice(&(path.len() as u32).to_le_bytes());
    bytes.extend_from_slice(path.as_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

fn decode_record(bytes: &[u8]) -> Result<(&str, &[u8])> {
    if bytes.len() < 4 {
        return Err(EngineError::wrong_modality(
            "path record shorter than its header",
        ));
    }
    let path_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let rest = &bytes[4..];
    if rest.len() < path_len {
        return Err(EngineError::wrong_modality(
            "path record shorter than its declared path",
        ));
    }
    let path = std::str::from_utf8(&rest[..path_len])
        .map_err(|_| EngineError::wrong_modality("stored path is not valid UTF-8"))?;
    Ok((path, &rest[path_len..]))
}

/// Whether a pattern is a plain literal prefix
///
/// Any regex metacharacter turns the pattern into an anchored regular
/// expression instead.
fn is_literal(pattern: &str) -> bool {
    !pattern
        .chars()
        .any(|c| matches!(c, '.' | '^' | '$' | '*' | '+' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '|' | '\\'))
}

enum CompiledPattern {
    Prefix(String),
    Anchored(Regex),
}

impl CompiledPattern {
    fn compile(pattern: &str) -> Result<CompiledPattern> {
        if is_literal(pattern) {
            Ok(CompiledPattern::Prefix(pattern.to_string()))
        } else {
            let anchored = format!("^(?:{})", pattern);
            Regex::new(&anchored)
                .map(CompiledPattern::Anchored)
                .map_err(|e| EngineError::InvalidPattern {
                    pattern: pattern.to_string(),
                    message: e.to_string(),
                })
        }
    }

    fn matches(&self, path: &str) -> bool {
        match self {
            CompiledPattern::Prefix(prefix) => path.starts_with(prefix.as_str()),
            CompiledPattern::Anchored(regex) => regex.is_match(path),
        }
    }
}

/// String-keyed values over the hashed key space
#[derive(Clone)]
pub struct Paths {
    db: Database,
}

impl Paths {
    /// Create the facade
    pub fn new(db: Database) -> Paths {
        Paths { db }
    }

    /// Find the key holding `path`, or the first free probe slot
    ///
    /// Returns `(found_key, free_key)`; probing stops at the first
    /// absent slot, so at most one of the two is `Some` and the free
    /// slot is where a new record belongs.
    fn probe(
        &self,
        txn: &mut Option<&mut Txn>,
        collection: CollectionHandle,
        path: &str,
    ) -> Result<(Option<Key>, Option<Key>)> {
        let base = surrogate(path);
        for step in 0..MAX_PROBES {
            let key = base.wrapping_add(step);
            match self.db.get(txn.as_deref_mut(), collection, key)? {
                None => return Ok((None, Some(key))),
                Some(bytes) => {
                    let (stored, _) = decode_record(&bytes)?;
                    if stored == path {
                        return Ok((Some(key), None));
                    }
                }
            }
        }
        Err(EngineError::internal(format!(
            "probe chain exhausted after {} slots for path {:?}",
            MAX_PROBES, path
        )))
    }

    // ======================== writes ========================

    /// Write or delete path-keyed values
    ///
    /// A `None` payload deletes the record. The optional separator byte
    /// is accepted for callers that build compound paths; the modality
    /// attaches no semantics to it.
    pub fn write(
        &self,
        mut txn: Option<&mut Txn>,
        collection: CollectionHandle,
        entries: &[(&str, Option<&[u8]>)],
        _separator: Option<u8>,
    ) -> Result<()> {
        for (path, payload) in entries {
            let (found, free) = self.probe(&mut txn, collection, path)?;
            match payload {
                Some(payload) => {
                    let key = found.or(free).ok_or_else(|| {
                        EngineError::internal("probe returned neither a slot nor a match")
                    })?;
                    self.db.put(
                        txn.as_deref_mut(),
                        collection,
                        key,
                        Some(&encode_record(path, payload)),
                    )?;
                }
                None => {
                    if let Some(key) = found {
                        self.db.put(txn.as_deref_mut(), collection, key, None)?;
                    }
                }
            }
        }
        Ok(())
    }

    // ======================== reads ========================

    /// Batched exact read of path payloads
    pub fn read<'a>(
        &self,
        mut txn: Option<&mut Txn>,
        collection: CollectionHandle,
        paths: &[&str],
        options: Options,
        arena: &'a mut Arena,
    ) -> Result<PathReadOutput<'a>> {
        let mut payloads: Vec<Option<Vec<u8>>> = Vec::with_capacity(paths.len());
        for path in paths {
            let (found, _) = self.probe(&mut txn, collection, path)?;
            payloads.push(match found {
                Some(key) => self
                    .db
                    .get_with(txn.as_deref_mut(), collection, key, options)?
                    .map(|bytes| {
                        decode_record(&bytes).map(|(_, payload)| payload.to_vec())
                    })
                    .transpose()?,
                None => None,
            });
        }

        arena.begin_call(options.dont_discard_arena());
        let arena = &*arena;
        let presences = arena.alloc_slice::<u8>(bits::bitmap_bytes(paths.len()))?;
        let lengths = arena.alloc_slice::<u32>(paths.len())?;
        let offsets = arena.alloc_slice::<u32>(paths.len() + 1)?;
        let total: usize = payloads.iter().flatten().map(|p| p.len()).sum();
        let values = arena.alloc_slice::<u8>(total)?;

        let mut cursor = 0usize;
        for (i, payload) in payloads.iter().enumerate() {
            offsets[i] = cursor as u32;
            match payload {
                Some(payload) => {
                    bits::set(presences, i, true);
                    lengths[i] = payload.len() as u32;
                    values[cursor..cursor + payload.len()].copy_from_slice(payload);
                    cursor += payload.len();
                }
                None => lengths[i] = LENGTH_MISSING,
            }
        }
        offsets[paths.len()] = cursor as u32;

        Ok(PathReadOutput {
            presences,
            offsets,
            lengths,
            values,
        })
    }

    /// Enumerate stored paths matching patterns, with continuation
    ///
    /// A metacharacter-free pattern is a literal prefix; anything else
    /// is an anchored regular expression. Each task walks candidates in
    /// key order starting at its cursor (or the beginning), collects up
    /// to `limit` matching paths, and reports the next candidate key —
    /// [`KEY_UNKNOWN`] once the collection is exhausted. A pattern that
    /// matches nothing is a count of zero, not an error.
    pub fn matches<'a>(
        &self,
        txn: Option<&Txn>,
        collection: CollectionHandle,
        tasks: &[MatchTask<'_>],
        options: Options,
        arena: &'a mut Arena,
    ) -> Result<MatchOutput<'a>> {
        let mut all_matches: Vec<Vec<String>> = Vec::with_capacity(tasks.len());
        let mut next_cursors: Vec<Key> = Vec::with_capacity(tasks.len());

        for task in tasks {
            let pattern = CompiledPattern::compile(task.pattern)?;
            let mut found: Vec<String> = Vec::new();
            let mut cursor = task.cursor.unwrap_or(Key::MIN);
            let mut exhausted = true;

            'walk: loop {
                let batch = self.scan_records(txn, collection, cursor, 256)?;
                let Some((last_key, records)) = batch else {
                    break 'walk;
                };
                for (key, path) in records {
                    if found.len() == task.limit as usize {
                        cursor = key;
                        exhausted = false;
                        break 'walk;
                    }
                    if pattern.matches(&path) {
                        found.push(path);
                    }
                    cursor = match key.checked_add(1) {
                        Some(next) => next,
                        None => break 'walk,
                    };
                }
                match last_key.checked_add(1) {
                    Some(next) => cursor = next,
                    None => break 'walk,
                }
            }

            next_cursors.push(if exhausted { KEY_UNKNOWN } else { cursor });
            all_matches.push(found);
        }

        arena.begin_call(options.dont_discard_arena());
        let arena = &*arena;
        let counts = arena.alloc_slice::<u32>(tasks.len())?;
        let offsets = arena.alloc_slice::<u32>(tasks.len() + 1)?;
        let cursors = arena.copy_slice(&next_cursors)?;
        let total: usize = all_matches
            .iter()
            .flatten()
            .map(|path| path.len() + 1)
            .sum();
        let paths = arena.alloc_slice::<u8>(total)?;

        let mut cursor = 0usize;
        for (i, matches) in all_matches.iter().enumerate() {
            counts[i] = matches.len() as u32;
            offsets[i] = cursor as u32;
            for path in matches {
                paths[cursor..cursor + path.len()].copy_from_slice(path.as_bytes());
                cursor += path.len() + 1;
            }
        }
        offsets[tasks.len()] = cursor as u32;

        Ok(MatchOutput {
            counts,
            offsets,
            paths,
            cursors,
        })
    }

    /// Fetch one batch of live path records starting at `start`
    ///
    /// Returns the last examined key and the decoded records, or `None`
    /// when nothing lives at or above `start`.
    #[allow(clippy::type_complexity)]
    fn scan_records(
        &self,
        txn: Option<&Txn>,
        collection: CollectionHandle,
        start: Key,
        limit: u32,
    ) -> Result<Option<(Key, Vec<(Key, String)>)>> {
        use crate::substrate::ScanTasks;
        use manifold_core::strided::Strided;

        let mut arena = Arena::new();
        let tasks = ScanTasks {
            collections: Strided::Repeat(collection),
            start_keys: Strided::Repeat(start),
            end_keys: Strided::Repeat(Key::MAX),
            limits: Strided::Repeat(limit),
            count: 1,
        };
        let keys: Vec<Key> = {
            let scan = self.db.scan(txn, &tasks, Options::NONE, &mut arena)?;
            scan.task_keys(0).to_vec()
        };
        let Some(last) = keys.last().copied() else {
            return Ok(None);
        };

        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            // The scan and this read race only on HEAD; a vanished cell
            // simply drops out of the candidate set.
            let Some(bytes) = self.read_raw(txn, collection, key)? else {
                continue;
            };
            let (path, _) = decode_record(&bytes)?;
            records.push((key, path.to_string()));
        }
        Ok(Some((last, records)))
    }

    fn read_raw(
        &self,
        txn: Option<&Txn>,
        collection: CollectionHandle,
        key: Key,
    ) -> Result<Option<Vec<u8>>> {
        // Pattern walks never register watched reads; candidate sets are
        // far too wide to defend at commit time.
        match txn {
            Some(txn) => {
                use manifold_concurrency::Buffered;
                let at = manifold_core::types::ColKey::new(collection, key);
                match txn.inner.buffered(at) {
                    Some(Buffered::Written(bytes)) => Ok(Some(bytes.to_vec())),
                    Some(Buffered::Deleted) => Ok(None),
                    None => self.db.read_at(collection, key, txn.start_generation()),
                }
            }
            None => self.db.get(None, collection, key),
        }
    }
}

/// One pattern-match task
#[derive(Debug, Clone, Copy)]
pub struct MatchTask<'a> {
    /// Literal prefix or anchored regular expression
    pub pattern: &'a str,
    /// Maximum matches to return in this call
    pub limit: u32,
    /// Continuation cursor from a previous call
    pub cursor: Option<Key>,
}

/// Batched exact path read output
#[derive(Debug)]
pub struct PathReadOutput<'a> {
    /// Presence bitmap, one bit per path
    pub presences: &'a [u8],
    /// Byte offset of each payload, plus the trailing total
    pub offsets: &'a [u32],
    /// Payload lengths; the missing sentinel marks absent paths
    pub lengths: &'a [u32],
    /// Payloads, back to back
    pub values: &'a [u8],
}

impl<'a> PathReadOutput<'a> {
    /// Payload of path `i`, `None` when absent
    pub fn value(&self, i: usize) -> Option<&'a [u8]> {
        if !bits::get(self.presences, i) {
            return None;
        }
        let start = self.offsets[i] as usize;
        Some(&self.values[start..start + self.lengths[i] as usize])
    }
}

/// Pattern enumeration output
#[derive(Debug)]
pub struct MatchOutput<'a> {
    /// Matches found per task in this call
    pub counts: &'a [u32],
    /// Byte offset of each task's paths in the tape, plus the total
    pub offsets: &'a [u32],
    /// NUL-terminated matched paths, task after task
    pub paths: &'a [u8],
    /// Next candidate key per task; [`KEY_UNKNOWN`] when exhausted
    pub cursors: &'a [Key],
}

impl<'a> MatchOutput<'a> {
    /// Iterate the matched paths of one task
    pub fn task_paths(&self, i: usize) -> impl Iterator<Item = &'a str> {
        let start = self.offsets[i] as usize;
        let end = self.offsets[i + 1] as usize;
        self.paths[start..end]
            .split(|b| *b == 0)
            .filter(|part| !part.is_empty())
            .map(|part| std::str::from_utf8(part).unwrap_or(""))
    }

    /// Continuation cursor of one task, `None` when exhausted
    pub fn next_cursor(&self, i: usize) -> Option<Key> {
        match self.cursors[i] {
            KEY_UNKNOWN => None,
            key => Some(key),
        }
    }
}
