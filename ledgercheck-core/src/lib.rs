//! ledgercheck core
//!
//! Data model and the pure pieces of ledger verification: semantic column
//! types, the canonical row encoding, SHA-512 row digests, chain linkage and
//! sequence rules, checkpoints, and the error taxonomy shared by every crate
//! in the workspace. Nothing in here performs I/O against a database.

pub mod canonical;
pub mod checkpoint;
pub mod column;
pub mod config;
pub mod digest;
pub mod error;
pub mod linkage;
pub mod outcome;
pub mod row;

pub use canonical::{
    canonicalize, canonicalize_into, encode_linkage, encode_text, ColumnHeader, SignatureFlags,
    BINARY_LOB_CHUNK_BYTES, CHAR_LOB_CHUNK_UNITS, HEADER_LEN, HEADER_VERSION,
};
pub use checkpoint::{Checkpoint, CHAINS_PER_INSTANCE};
pub use column::{
    is_chain_identity_column, is_reserved_signature_column, CatalogEntry, ColumnDescriptor,
    ColumnType, HashColumn, TableLayout, CHAIN_ID_COLUMN, HASH_COLUMN, INSTANCE_ID_COLUMN,
    SEQUENCE_COLUMN, SIGNATURE_ALGORITHM_COLUMN, SIGNATURE_CERT_COLUMN, SIGNATURE_COLUMN, SPARE_COLUMN,
};
pub use config::{
    CheckpointMode, ScheduleConfig, VerifyConfig, DEFAULT_EVIDENCE_EXTENSION,
    DEFAULT_INTERVAL_SECS, DEFAULT_LOG_ROTATE_BYTES,
};
pub use digest::{matches_stored, normalize_stored_hash, RowHash, DIGEST_HEX_LEN, DIGEST_LEN};
pub use error::{
    io_error, AnchorError, ConfigError, IntegrityError, LedgerError, LedgerResult, SchemaError,
    SequenceFault, StorageError, ValidationError,
};
pub use linkage::{check_sequence, HashLinkage};
pub use outcome::{RunStats, VerificationOutcome};
pub use row::{
    normalize_identifier, read_to_vec, ChainEntry, CharLobReader, ColumnValue, LedgerTarget,
    MemoryCharLob, RowKey, RowValues, VerifyScope,
};
