//! Error types for ledgercheck operations

use crate::RowKey;
use thiserror::Error;

/// Table shape errors. Fatal: a run aborts before any row is touched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("{schema}.{table} is not a ledger table: missing system column {column}")]
    NotALedgerTable {
        schema: String,
        table: String,
        column: String,
    },

    #[error("{schema}.{table} has no hashable columns")]
    NoColumns { schema: String, table: String },

    #[error("Invalid identifier {value:?}: {reason}")]
    InvalidIdentifier { value: String, reason: String },
}

/// Why a sequence transition was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceFault {
    NonPositive,
    Duplicate,
    Regression,
    Gap,
}

impl std::fmt::Display for SequenceFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            SequenceFault::NonPositive => "non-positive sequence number",
            SequenceFault::Duplicate => "duplicate sequence number",
            SequenceFault::Regression => "sequence number went backwards",
            SequenceFault::Gap => "gap in sequence numbers",
        };
        f.write_str(text)
    }
}

/// Chain structure violations. Fatal to the chain they occur in.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("Sequence integrity violated at {row_key} (previous {previous}): {fault}")]
    SequenceViolation {
        row_key: RowKey,
        previous: i64,
        fault: SequenceFault,
    },

    #[error("No previous hash available to link {row_key}")]
    MissingLinkage { row_key: RowKey },

    #[error("Stored hash of {row_key} is malformed: {reason}")]
    MalformedStoredHash { row_key: RowKey, reason: String },
}

/// Errors raised by a ledger source or by local state files.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Query {operation} failed: {reason}")]
    QueryFailed { operation: String, reason: String },

    #[error("Row not found: {row_key}")]
    RowNotFound { row_key: RowKey },

    #[error("Column {column} missing from row {row_key}")]
    ColumnMissing { column: String, row_key: RowKey },

    #[error("LOB at column position {position} declared {declared} bytes but {streamed} were read")]
    LobLengthMismatch {
        position: u16,
        declared: u64,
        streamed: u64,
    },

    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Serialization of {what} failed: {reason}")]
    Serialization { what: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Ledger-anchoring service errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnchorError {
    #[error("No anchoring service configured")]
    NotConfigured,

    #[error("Anchor request {operation} failed with status {status}: {message}")]
    RequestFailed {
        operation: String,
        status: u16,
        message: String,
    },

    #[error("Invalid response to {operation}: {reason}")]
    InvalidResponse { operation: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },
}

/// Input validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid hash value {value:?}: {reason}")]
    InvalidHash { value: String, reason: String },

    #[error("Column {column} of type {declared} cannot hold a {found} value")]
    ValueTypeMismatch {
        column: String,
        declared: String,
        found: String,
    },

    #[error("Invalid verification scope: {reason}")]
    InvalidScope { reason: String },
}

/// Master error type for all ledgercheck operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Anchor error: {0}")]
    Anchor(#[from] AnchorError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl LedgerError {
    /// Whether this error must stop the enclosing chain walk without
    /// advancing its checkpoint.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, LedgerError::Integrity(_))
    }
}

/// Result type alias for ledgercheck operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Wrap an `std::io::Error` for a path into a storage error.
pub fn io_error(path: impl AsRef<std::path::Path>, err: std::io::Error) -> LedgerError {
    LedgerError::Storage(StorageError::Io {
        path: path.as_ref().display().to_string(),
        reason: err.to_string(),
    })
}

// ============================================================================
// TESTS
// ============================================================================
