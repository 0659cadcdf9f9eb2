//! Disk image of a store
//!
//! When a database is configured with a directory, every collection is
//! persisted as one file: `<name>.mfd` for named collections and the
//! reserved `.default.mfd` for the unnamed default. Each file is
//!
//! ```text
//! [u32 count] ([i64 key][u32 length][length bytes])*
//! ```
//!
//! little-endian, tombstones omitted. Loading populates value cells at
//! generation zero. Snapshot export writes the same layout from a pinned
//! generation, so the exported directory is stable against later HEAD
//! mutations.

use crate::collection::{Collection, CollectionConfig};
use crate::store::Store;
use manifold_core::error::{EngineError, Result};
use manifold_core::types::Generation;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File extension of persisted collections
pub const FILE_EXTENSION: &str = ".mfd";

/// Reserved file name of the default collection
pub const DEFAULT_FILE: &str = ".default.mfd";

fn file_name_for(collection: &Collection) -> String {
    match collection.name() {
        Some(name) => format!("{}{}", name, FILE_EXTENSION),
        None => DEFAULT_FILE.to_string(),
    }
}

/// Write one collection as visible at `generation`
pub fn save_collection(collection: &Collection, generation: Generation, path: &Path) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);

    let live: Vec<(i64, &[u8])> = collection
        .iter()
        .filter_map(|(key, cell)| cell.bytes_at(generation).map(|bytes| (key, bytes)))
        .collect();

    let count = u32::try_from(live.len())
        .map_err(|_| EngineError::invalid_argument("collection too large for the disk image"))?;
    writer.write_all(&count.to_le_bytes())?;

    for (key, bytes) in live {
        writer.write_all(&key.to_le_bytes())?;
        let length = u32::try_from(bytes.len())
            .map_err(|_| EngineError::invalid_argument("value too large for the disk image"))?;
        writer.write_all(&length.to_le_bytes())?;
        writer.write_all(bytes)?;
    }
    writer.flush()?;
    debug!(path = %path.display(), entries = count, "persisted collection");
    Ok(())
}

/// Read one collection file into a fresh collection at generation zero
pub fn load_collection(name: Option<String>, path: &Path) -> Result<Collection> {
    let mut reader = BufReader::new(File::open(path)?);
    let corrupted = |what: &str| {
        EngineError::corrupted(format!("{}: truncated {}", path.display(), what))
    };

    let mut u32_buf = [0u8; 4];
    let mut key_buf = [0u8; 8];
    reader
        .read_exact(&mut u32_buf)
        .map_err(|_| corrupted("header"))?;
    let count = u32::from_le_bytes(u32_buf);

    let mut collection = Collection::new(name, CollectionConfig::default());
    for _ in 0..count {
        reader
            .read_exact(&mut key_buf)
            .map_err(|_| corrupted("key"))?;
        let key = i64::from_le_bytes(key_buf);

        reader
            .read_exact(&mut u32_buf)
            .map_err(|_| corrupted("value length"))?;
        let length = u32::from_le_bytes(u32_buf) as usize;

        let mut bytes = vec![0u8; length];
        reader
            .read_exact(&mut bytes)
            .map_err(|_| corrupted("value"))?;
        collection.apply(key, 0, Some(&bytes));
    }
    Ok(collection)
}

/// Persist every collection as visible at `generation`
pub fn save_store(store: &Store, generation: Generation, directory: &Path) -> Result<()> {
    if !directory.is_dir() {
        return Err(EngineError::invalid_argument(format!(
            "{} is not a directory",
            directory.display()
        )));
    }
    for (_, collection) in store.iter() {
        save_collection(collection, generation, &directory.join(file_name_for(collection)))?;
    }
    Ok(())
}

/// Load every collection file found in a directory
pub fn load_store(directory: &Path) -> Result<Store> {
    let mut store = Store::default();
    if !directory.is_dir() {
        return Err(EngineError::invalid_argument(format!(
            "{} is not a directory",
            directory.display()
        )));
    }

    let mut loaded = 0usize;
    for entry in std::fs::read_dir(directory)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path: PathBuf = entry.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !file_name.ends_with(FILE_EXTENSION) {
            continue;
        }

        let name = if file_name == DEFAULT_FILE {
            None
        } else {
            Some(file_name[..file_name.len() - FILE_EXTENSION.len()].to_string())
        };
        let collection = load_collection(name.clone(), &path)?;
        store.adopt(name, collection);
        loaded += 1;
    }
    info!(directory = %directory.display(), collections = loaded, "loaded store from disk");
    Ok(store)
}
