//! ledgercheck storage
//!
//! Everything the verifier reads from or writes to: the [`LedgerSource`]
//! seam over the database holding the ledger table, the cached
//! [`SchemaCatalog`], checkpoint stores, outcome publishers and the evidence
//! archive for rows that failed verification.

pub mod catalog;
pub mod checkpoint;
pub mod evidence;
pub mod memory;
pub mod paths;
pub mod publish;

pub use catalog::SchemaCatalog;
pub use checkpoint::{
    checkpoint_store_for, AnchorCheckpointStore, CheckpointStore, DisabledCheckpoints,
    FileCheckpointStore,
};
pub use evidence::EvidenceArchive;
pub use memory::{InMemoryLedger, LedgerSnapshot, RowSnapshot, StoredValue, TableSnapshot};
pub use paths::sanitize_file_name;
pub use publish::{
    format_outcome_line, outcome_publisher_for, AnchorPublisher, LogFilePublisher, NullPublisher,
    OutcomePublisher,
};

use ledgercheck_core::{
    CatalogEntry, ChainEntry, ColumnDescriptor, LedgerResult, LedgerTarget, RowKey, RowValues,
};

/// Read access to a database holding ledger tables.
///
/// Implementations must be thread-safe (Send + Sync). Every method maps
/// driver failures to `StorageError::QueryFailed`.
pub trait LedgerSource: Send + Sync {
    /// Identity of the database container, part of every persisted key.
    fn database_id(&self) -> LedgerResult<String>;

    /// Non-virtual columns of a table, system columns included. Empty when
    /// the table does not exist.
    fn catalog_columns(&self, schema: &str, table: &str) -> LedgerResult<Vec<CatalogEntry>>;

    /// Distinct instance ids present in the table, ascending.
    fn instance_ids(&self, target: &LedgerTarget) -> LedgerResult<Vec<u32>>;

    /// Distinct chain ids of one instance, ascending.
    fn chain_ids(&self, target: &LedgerTarget, instance_id: u32) -> LedgerResult<Vec<u32>>;

    /// Rows of one chain with a sequence number above `after_sequence`,
    /// ascending by sequence number.
    fn chain_rows(
        &self,
        target: &LedgerTarget,
        instance_id: u32,
        chain_id: u32,
        after_sequence: i64,
    ) -> LedgerResult<Vec<ChainEntry>>;

    /// Stored hash of a row, `None` when the row does not exist.
    fn stored_hash(&self, target: &LedgerTarget, key: RowKey) -> LedgerResult<Option<String>>;

    /// Fetch the given columns of one row.
    ///
    /// # Errors
    /// `StorageError::RowNotFound` when the row does not exist.
    fn fetch_row(
        &self,
        target: &LedgerTarget,
        key: RowKey,
        columns: &[ColumnDescriptor],
    ) -> LedgerResult<RowValues>;
}
