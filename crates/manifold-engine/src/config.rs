//! Database configuration
//!
//! Built fluently and handed to [`crate::Database::open`]:
//!
//! ```
//! use manifold_engine::DatabaseConfig;
//!
//! let config = DatabaseConfig::default()
//!     .with_directory("/tmp/manifold-data")
//!     .with_transaction_retries(4);
//! assert!(config.directory().is_some());
//! ```

use std::path::{Path, PathBuf};

/// Configuration of one database instance
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    directory: Option<PathBuf>,
    named_collections: bool,
    transactions: bool,
    transaction_retries: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            directory: None,
            named_collections: true,
            transactions: true,
            transaction_retries: 16,
        }
    }
}

impl DatabaseConfig {
    /// Persist collections under this directory
    ///
    /// The directory is created on open when missing; its collection
    /// files are loaded on open and rewritten on flush and on close.
    pub fn with_directory(mut self, directory: impl AsRef<Path>) -> Self {
        self.directory = Some(directory.as_ref().to_path_buf());
        self
    }

    /// Refuse named collections; only the default collection is served
    pub fn without_named_collections(mut self) -> Self {
        self.named_collections = false;
        self
    }

    /// Refuse transactions and snapshots; only HEAD operations are served
    pub fn without_transactions(mut self) -> Self {
        self.transactions = false;
        self
    }

    /// Attempts the closure-style transaction helper makes on conflict
    pub fn with_transaction_retries(mut self, retries: usize) -> Self {
        self.transaction_retries = retries.max(1);
        self
    }

    /// Configured persistence directory, if any
    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    /// Whether named collections are enabled
    pub fn named_collections_enabled(&self) -> bool {
        self.named_collections
    }

    /// Whether transactions are enabled
    pub fn transactions_enabled(&self) -> bool {
        self.transactions
    }

    /// Conflict retry budget of the closure helper
    pub fn transaction_retries(&self) -> usize {
        self.transaction_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_everything_in_memory() {
        let config = DatabaseConfig::default();
        assert!(config.directory().is_none());
        assert!(config.named_collections_enabled());
        assert!(config.transactions_enabled());
        assert!(config.transaction_retries() >= 1);
    }

    #[test]
    fn builder_applies_choices() {
        let config = DatabaseConfig::default()
            .with_directory("/tmp/x")
            .without_named_collections()
            .without_transactions()
            .with_transaction_retries(0);
        assert_eq!(config.directory(), Some(Path::new("/tmp/x")));
        assert!(!config.named_collections_enabled());
        assert!(!config.transactions_enabled());
        assert_eq!(config.transaction_retries(), 1);
    }
}
