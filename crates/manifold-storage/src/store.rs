//! The collection map
//!
//! A [`Store`] owns the unnamed default collection plus every named
//! collection, and hands out the opaque handles the call surface uses.
//! The store itself is not synchronized; the engine wraps it in the
//! database's readers-writer lock.

use crate::collection::{Collection, CollectionConfig};
use manifold_core::error::{EngineError, Result};
use manifold_core::types::{CollectionHandle, Generation};
use std::collections::HashMap;

/// How much of a collection a drop request removes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropMode {
    /// Tombstone every value, keep keys and the handle
    ValuesOnly,
    /// Remove keys and values, keep the handle
    KeysAndValues,
    /// Remove the handle and everything under it
    HandleAndContents,
}

/// The default collection plus all named collections
#[derive(Debug)]
pub struct Store {
    default: Collection,
    named: HashMap<u64, Collection>,
    names: HashMap<String, u64>,
    next_handle: u64,
}

impl Default for Store {
    fn default() -> Self {
        Store {
            default: Collection::new(None, CollectionConfig::default()),
            named: HashMap::new(),
            names: HashMap::new(),
            next_handle: 1,
        }
    }
}

impl Store {
    /// Validate a collection name
    ///
    /// Names are non-empty and must not begin with a dot; dotted file
    /// names are reserved for the default collection's disk image.
    pub fn validate_name(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(EngineError::invalid_argument(
                "collection names must be non-empty",
            ));
        }
        if name.starts_with('.') || name.contains(['/', '\\']) {
            return Err(EngineError::invalid_argument(format!(
                "collection name {:?} contains reserved characters",
                name
            )));
        }
        Ok(())
    }

    /// Resolve a handle to its collection
    pub fn collection(&self, handle: CollectionHandle) -> Result<&Collection> {
        if handle.is_default() {
            return Ok(&self.default);
        }
        self.named
            .get(&handle.0)
            .ok_or(EngineError::UnknownCollection { handle })
    }

    /// Resolve a handle to its collection, mutably
    pub fn collection_mut(&mut self, handle: CollectionHandle) -> Result<&mut Collection> {
        if handle.is_default() {
            return Ok(&mut self.default);
        }
        self.named
            .get_mut(&handle.0)
            .ok_or(EngineError::UnknownCollection { handle })
    }

    /// Look up a named collection's handle
    pub fn handle_of(&self, name: &str) -> Option<CollectionHandle> {
        self.names.get(name).copied().map(CollectionHandle)
    }

    /// Create a named collection; fails if the name is taken
    pub fn create(&mut self, name: &str, config: CollectionConfig) -> Result<CollectionHandle> {
        Self::validate_name(name)?;
        if self.names.contains_key(name) {
            return Err(EngineError::CollectionExists {
                name: name.to_string(),
            });
        }
        let handle = self.next_handle;
        self.next_handle += 1;
        self.named
            .insert(handle, Collection::new(Some(name.to_string()), config));
        self.names.insert(name.to_string(), handle);
        Ok(CollectionHandle(handle))
    }

    /// Open a named collection, creating it if absent
    ///
    /// The empty name opens the default collection, as the unnamed
    /// collection has no other spelling on the call surface.
    pub fn open_or_create(
        &mut self,
        name: &str,
        config: CollectionConfig,
    ) -> Result<CollectionHandle> {
        if name.is_empty() {
            return Ok(CollectionHandle::DEFAULT);
        }
        match self.handle_of(name) {
            Some(handle) => Ok(handle),
            None => self.create(name, config),
        }
    }

    /// Drop collection state per the requested mode
    ///
    /// The default collection accepts the value and key drops but keeps
    /// its handle; dropping it at handle level is a policy error.
    pub fn drop_collection(
        &mut self,
        handle: CollectionHandle,
        mode: DropMode,
        generation: Generation,
    ) -> Result<()> {
        if handle.is_default() && mode == DropMode::HandleAndContents {
            return Err(EngineError::unsupported(
                "the default collection cannot be dropped at handle level",
            ));
        }
        match mode {
            DropMode::ValuesOnly => self.collection_mut(handle)?.reset_values(generation),
            DropMode::KeysAndValues => self.collection_mut(handle)?.clear(),
            DropMode::HandleAndContents => {
                let collection = self
                    .named
                    .remove(&handle.0)
                    .ok_or(EngineError::UnknownCollection { handle })?;
                if let Some(name) = collection.name() {
                    self.names.remove(name);
                }
            }
        }
        Ok(())
    }

    /// List named collections as (handle, name), sorted by name
    pub fn list(&self) -> Vec<(CollectionHandle, &str)> {
        let mut entries: Vec<(CollectionHandle, &str)> = self
            .names
            .iter()
            .map(|(name, handle)| (CollectionHandle(*handle), name.as_str()))
            .collect();
        entries.sort_by_key(|(_, name)| *name);
        entries
    }

    /// Iterate every collection, default first
    pub fn iter(&self) -> impl Iterator<Item = (CollectionHandle, &Collection)> + '_ {
        std::iter::once((CollectionHandle::DEFAULT, &self.default)).chain(
            self.named
                .iter()
                .map(|(handle, col)| (CollectionHandle(*handle), col)),
        )
    }

    /// Register a collection loaded from disk
    pub fn adopt(&mut self, name: Option<String>, collection: Collection) -> CollectionHandle {
        match name {
            None => {
                self.default = collection;
                CollectionHandle::DEFAULT
            }
            Some(name) => {
                let handle = self.next_handle;
                self.next_handle += 1;
                self.named.insert(handle, collection);
                self.names.insert(name, handle);
                CollectionHandle(handle)
            }
        }
    }

    /// Prune every collection's version chains against snapshot pins
    pub fn prune(&mut self, pins: &[Generation]) {
        self.default.prune(pins);
        for collection in self.named.values_mut() {
            collection.prune(pins);
        }
    }
}
