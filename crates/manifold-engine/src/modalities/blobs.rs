//! Blob modality
//!
//! The thinnest view: batched binary values addressed by key, passed
//! straight through to the substrate with the strided argument
//! packaging. Exists so callers working with raw payloads get the same
//! facade shape as the richer modalities.

use crate::database::Database;
use crate::snapshot::Txn;
use crate::substrate::{Places, ReadMeta, ReadOutput};
use manifold_core::arena::Arena;
use manifold_core::error::Result;
use manifold_core::options::Options;
use manifold_core::strided::Contents;
use manifold_core::types::{bits, CollectionHandle, Key};

/// Batched binary values over the substrate
#[derive(Clone)]
pub struct Blobs {
    db: Database,
}

impl Blobs {
    /// Create the facade
    pub fn new(db: Database) -> Blobs {
        Blobs { db }
    }

    /// Batched read: presence bitmap, offsets, lengths and value tape
    pub fn read<'a>(
        &self,
        txn: Option<&mut Txn>,
        places: &Places<'_>,
        options: Options,
        arena: &'a mut Arena,
    ) -> Result<ReadOutput<'a>> {
        self.db.read(txn, places, options, arena)
    }

    /// Batched presence and length read without the value tape
    pub fn meta<'a>(
        &self,
        txn: Option<&mut Txn>,
        places: &Places<'_>,
        options: Options,
        arena: &'a mut Arena,
    ) -> Result<ReadMeta<'a>> {
        self.db.read_meta(txn, places, options, arena)
    }

    /// Batched write with the full value-description resolution
    pub fn write(
        &self,
        txn: Option<&mut Txn>,
        places: &Places<'_>,
        contents: &Contents<'_>,
        options: Options,
    ) -> Result<()> {
        self.db.write(txn, places, contents, options)
    }

    /// Write plain per-task payloads into one collection
    pub fn write_values(
        &self,
        txn: Option<&mut Txn>,
        collection: CollectionHandle,
        keys: &[Key],
        values: &[Option<&[u8]>],
        options: Options,
    ) -> Result<()> {
        self.db.write(
            txn,
            &Places::in_collection(collection, keys),
            &Contents::from_values(values),
            options,
        )
    }

    /// Batched existence check
    pub fn contains(
        &self,
        txn: Option<&mut Txn>,
        collection: CollectionHandle,
        keys: &[Key],
        arena: &mut Arena,
    ) -> Result<Vec<bool>> {
        let meta = self.db.read_meta(
            txn,
            &Places::in_collection(collection, keys),
            Options::NONE,
            arena,
        )?;
        Ok((0..keys.len()).map(|i| bits::get(meta.presences, i)).collect())
    }
}
