//! In-memory registry of table schemas, keyed by table name.
//!
//! Loaded once at startup (or per CLI run). Backed by `arc-swap` so lookups on
//! the write path never take a lock.

use std::{collections::BTreeMap, sync::Arc};

use arc_swap::ArcSwap;

use super::{SchemaError, TableSchema};

/// Shared, lock-free map of table schemas.
#[derive(Clone, Debug)]
pub struct SchemaRegistry {
    inner: Arc<ArcSwap<BTreeMap<String, Arc<TableSchema>>>>,
}

impl SchemaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ArcSwap::new(Arc::new(BTreeMap::new()))),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.load().is_empty()
    }

    /// Look up a table by name.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::UnknownTable`] if `name` is not present.
    pub fn get(&self, name: &str) -> Result<Arc<TableSchema>, SchemaError> {
        self.inner
            .load()
            .get(name)
            .cloned()
            .ok_or_else(|| SchemaError::UnknownTable(name.to_owned()))
    }

    /// All tables, in name order.
    pub fn tables(&self) -> Vec<Arc<TableSchema>> {
        self.inner.load().values().cloned().collect()
    }

    /// Atomically replace the entire map.
    pub fn replace_all(&self, tables: BTreeMap<String, TableSchema>) {
        let new_map = tables
            .into_iter()
            .map(|(name, table)| (name, Arc::new(table)))
            .collect();
        self.inner.store(Arc::new(new_map));
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}
