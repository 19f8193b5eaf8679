//! Cached table layouts.

use crate::LedgerSource;
use ledgercheck_core::{
    ColumnDescriptor, HashColumn, LedgerError, LedgerResult, SchemaError, StorageError,
    TableLayout, HASH_COLUMN,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Resolves and caches the layout of each ledger table for the lifetime of
/// the process.
pub struct SchemaCatalog {
    source: Arc<dyn LedgerSource>,
    cache: RwLock<HashMap<(String, String), Arc<TableLayout>>>,
}

impl SchemaCatalog {
    pub fn new(source: Arc<dyn LedgerSource>) -> Self {
        Self {
            source,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Layout of `schema.table`, read from the source on first use.
    ///
    /// # Errors
    /// `SchemaError::NotALedgerTable` when the hash column is missing and
    /// `SchemaError::NoColumns` when nothing besides system columns exists.
    /// Chain identity columns count as system columns here, though they are
    /// still hashed.
    pub fn layout(&self, schema: &str, table: &str) -> LedgerResult<Arc<TableLayout>> {
        let key = (schema.to_string(), table.to_string());
        {
            let cache = self
                .cache
                .read()
                .map_err(|_| LedgerError::Storage(StorageError::LockPoisoned))?;
            if let Some(layout) = cache.get(&key) {
                return Ok(Arc::clone(layout));
            }
        }

        let entries = self.source.catalog_columns(schema, table)?;
        let layout = TableLayout::from_catalog(&entries).ok_or_else(|| {
            SchemaError::NotALedgerTable {
                schema: schema.to_string(),
                table: table.to_string(),
                column: HASH_COLUMN.to_string(),
            }
        })?;
        if layout.user_columns().next().is_none() {
            return Err(SchemaError::NoColumns {
                schema: schema.to_string(),
                table: table.to_string(),
            }
            .into());
        }

        tracing::debug!(
            schema,
            table,
            columns = layout.columns.len(),
            hash_position = layout.hash_column.position,
            "Resolved ledger table layout"
        );

        let layout = Arc::new(layout);
        let mut cache = self
            .cache
            .write()
            .map_err(|_| LedgerError::Storage(StorageError::LockPoisoned))?;
        Ok(Arc::clone(cache.entry(key).or_insert(layout)))
    }

    /// Hashable columns in position order.
    pub fn list_columns(&self, schema: &str, table: &str) -> LedgerResult<Vec<ColumnDescriptor>> {
        Ok(self.layout(schema, table)?.columns.clone())
    }

    pub fn locate_hash_column(&self, schema: &str, table: &str) -> LedgerResult<HashColumn> {
        Ok(self.layout(schema, table)?.hash_column.clone())
    }

    pub fn cached_tables(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }
}

impl std::fmt::Debug for SchemaCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaCatalog")
            .field("cached_tables", &self.cached_tables())
            .finish()
    }
}
