//! Row identity, ledger targets and fetched column values.

use crate::error::{LedgerResult, SchemaError, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io::Read;

// ============================================================================
// IDENTITY
// ============================================================================

/// Position of a row inside the ledger: its chain and sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowKey {
    pub instance_id: u32,
    pub chain_id: u32,
    pub sequence_no: i64,
}

impl RowKey {
    pub fn new(instance_id: u32, chain_id: u32, sequence_no: i64) -> Self {
        Self {
            instance_id,
            chain_id,
            sequence_no,
        }
    }

    /// Key of the row this one links to, if any.
    pub fn predecessor(&self) -> Option<RowKey> {
        (self.sequence_no > 1).then(|| RowKey::new(self.instance_id, self.chain_id, self.sequence_no - 1))
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "instance {}, chain {}, sequence {}",
            self.instance_id, self.chain_id, self.sequence_no
        )
    }
}

/// Normalize a schema or table identifier.
///
/// A name wrapped in double quotes keeps its case; a bare name is folded to
/// upper case, matching how the database stores unquoted identifiers.
pub fn normalize_identifier(raw: &str) -> Result<String, SchemaError> {
    let trimmed = raw.trim();
    let invalid = |reason: &str| SchemaError::InvalidIdentifier {
        value: raw.to_string(),
        reason: reason.to_string(),
    };

    let (name, quoted) = match trimmed.strip_prefix('"') {
        Some(rest) => match rest.strip_suffix('"') {
            Some(inner) => (inner, true),
            None => return Err(invalid("unbalanced quotes")),
        },
        None => (trimmed, false),
    };

    if name.is_empty() {
        return Err(invalid("empty identifier"));
    }
    if name.contains('"') || name.contains('\0') {
        return Err(invalid("contains a quote or NUL character"));
    }

    Ok(if quoted {
        name.to_string()
    } else {
        name.to_ascii_uppercase()
    })
}

/// A ledger table inside a specific database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerTarget {
    pub schema: String,
    pub table: String,
    pub database_id: String,
}

impl LedgerTarget {
    pub fn new(
        schema: &str,
        table: &str,
        database_id: impl Into<String>,
    ) -> Result<Self, SchemaError> {
        Ok(Self {
            schema: normalize_identifier(schema)?,
            table: normalize_identifier(table)?,
            database_id: database_id.into(),
        })
    }

    /// Common stem of every file and anchoring key derived from this table.
    pub fn stem(&self) -> String {
        format!("{}_{}_{}", self.schema, self.table, self.database_id)
    }
}

impl fmt::Display for LedgerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}@{}", self.schema, self.table, self.database_id)
    }
}

/// What part of a table a run covers. Omitted identifiers broaden the scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerifyScope {
    Table,
    Instance { instance_id: u32 },
    Chain { instance_id: u32, chain_id: u32 },
    Row(RowKey),
}

impl VerifyScope {
    pub fn from_parts(
        instance_id: Option<u32>,
        chain_id: Option<u32>,
        sequence_no: Option<i64>,
    ) -> Result<Self, ValidationError> {
        match (instance_id, chain_id, sequence_no) {
            (None, None, None) => Ok(VerifyScope::Table),
            (Some(instance_id), None, None) => Ok(VerifyScope::Instance { instance_id }),
            (Some(instance_id), Some(chain_id), None) => Ok(VerifyScope::Chain {
                instance_id,
                chain_id,
            }),
            (Some(instance_id), Some(chain_id), Some(sequence_no)) => {
                if sequence_no < 1 {
                    return Err(ValidationError::InvalidScope {
                        reason: format!("sequence number must be at least 1, got {}", sequence_no),
                    });
                }
                Ok(VerifyScope::Row(RowKey::new(instance_id, chain_id, sequence_no)))
            }
            _ => Err(ValidationError::InvalidScope {
                reason: "chain requires an instance and sequence requires a chain".to_string(),
            }),
        }
    }

    pub fn is_single_row(&self) -> bool {
        matches!(self, VerifyScope::Row(_))
    }
}

/// One row returned by a chain scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEntry {
    pub sequence_no: i64,
    /// Hash as stored in the table, hex encoded.
    pub stored_hash: String,
}

// ============================================================================
// VALUES
// ============================================================================

/// Streaming access to a character LOB.
pub trait CharLobReader: Send {
    /// Declared length in UTF-16 code units.
    fn utf16_len(&self) -> u64;

    /// Fill `buf` with the next code units. Returns 0 at the end.
    fn read_units(&mut self, buf: &mut [u16]) -> std::io::Result<usize>;
}

/// Character LOB held in memory.
#[derive(Debug, Clone)]
pub struct MemoryCharLob {
    units: Vec<u16>,
    offset: usize,
}

impl MemoryCharLob {
    pub fn new(text: &str) -> Self {
        Self {
            units: text.encode_utf16().collect(),
            offset: 0,
        }
    }
}

impl CharLobReader for MemoryCharLob {
    fn utf16_len(&self) -> u64 {
        self.units.len() as u64
    }

    fn read_units(&mut self, buf: &mut [u16]) -> std::io::Result<usize> {
        let remaining = &self.units[self.offset..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.offset += n;
        Ok(n)
    }
}

/// A fetched column value.
pub enum ColumnValue {
    Null,
    Text(String),
    Bytes(Vec<u8>),
    CharLob(Box<dyn CharLobReader>),
    BinaryLob {
        len: u64,
        reader: Box<dyn Read + Send>,
    },
}

impl ColumnValue {
    pub fn text(value: impl Into<String>) -> Self {
        ColumnValue::Text(value.into())
    }

    pub fn bytes(value: impl Into<Vec<u8>>) -> Self {
        ColumnValue::Bytes(value.into())
    }

    pub fn clob(value: &str) -> Self {
        ColumnValue::CharLob(Box::new(MemoryCharLob::new(value)))
    }

    pub fn blob(value: Vec<u8>) -> Self {
        ColumnValue::BinaryLob {
            len: value.len() as u64,
            reader: Box::new(std::io::Cursor::new(value)),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ColumnValue::Null => "null",
            ColumnValue::Text(_) => "text",
            ColumnValue::Bytes(_) => "bytes",
            ColumnValue::CharLob(_) => "character LOB",
            ColumnValue::BinaryLob { .. } => "binary LOB",
        }
    }
}

impl fmt::Debug for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnValue::Null => f.write_str("Null"),
            ColumnValue::Text(s) => f.debug_tuple("Text").field(s).finish(),
            ColumnValue::Bytes(b) => f.debug_tuple("Bytes").field(&hex::encode(b)).finish(),
            ColumnValue::CharLob(lob) => f
                .debug_struct("CharLob")
                .field("utf16_len", &lob.utf16_len())
                .finish(),
            ColumnValue::BinaryLob { len, .. } => {
                f.debug_struct("BinaryLob").field("len", len).finish()
            }
        }
    }
}

/// All values fetched for one row, keyed by column name.
#[derive(Debug, Default)]
pub struct RowValues {
    values: HashMap<String, ColumnValue>,
}

impl RowValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: ColumnValue) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, value: ColumnValue) {
        self.values.insert(column.into(), value);
    }

    /// Remove a value for consumption. Missing columns read as `Null`.
    pub fn take(&mut self, column: &str) -> ColumnValue {
        self.values.remove(column).unwrap_or(ColumnValue::Null)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Read an entire binary LOB; used where a small value must be inspected.
pub fn read_to_vec(value: ColumnValue) -> LedgerResult<Option<Vec<u8>>> {
    match value {
        ColumnValue::Null => Ok(None),
        ColumnValue::Bytes(b) => Ok(Some(b)),
        ColumnValue::Text(s) => Ok(Some(s.into_bytes())),
        ColumnValue::BinaryLob { mut reader, .. } => {
            let mut out = Vec::new();
            reader
                .read_to_end(&mut out)
                .map_err(|e| crate::error::io_error("<lob>", e))?;
            Ok(Some(out))
        }
        ColumnValue::CharLob(mut lob) => {
            let mut units = Vec::new();
            let mut buf = [0u16; 1024];
            loop {
                let n = lob
                    .read_units(&mut buf)
                    .map_err(|e| crate::error::io_error("<lob>", e))?;
                if n == 0 {
                    break;
                }
                units.extend_from_slice(&buf[..n]);
            }
            Ok(Some(String::from_utf16_lossy(&units).into_bytes()))
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
