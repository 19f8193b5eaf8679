//! Column metadata and the semantic type table used by the canonical encoder.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// SYSTEM COLUMNS
// ============================================================================

/// Row hash system column.
pub const HASH_COLUMN: &str = "ORABCTAB_HASH$";
/// Signature digest system column, never part of the canonical form.
pub const SIGNATURE_COLUMN: &str = "ORABCTAB_SIGNATURE$";
/// Signature algorithm, emitted only when flagged in the spare mask.
pub const SIGNATURE_ALGORITHM_COLUMN: &str = "ORABCTAB_SIGNATURE_ALG$";
/// Signature certificate, emitted only when flagged in the spare mask.
pub const SIGNATURE_CERT_COLUMN: &str = "ORABCTAB_SIGNATURE_CERT$";
/// Bitmask column selecting which signature columns are hashed.
pub const SPARE_COLUMN: &str = "ORABCTAB_SPARE$";
/// Chain identity columns.
pub const INSTANCE_ID_COLUMN: &str = "ORABCTAB_INST_ID$";
pub const CHAIN_ID_COLUMN: &str = "ORABCTAB_CHAIN_ID$";
pub const SEQUENCE_COLUMN: &str = "ORABCTAB_SEQ_NUM$";

/// Whether a column carries the row's chain position. These are hashed like
/// any other column but hold no user data.
pub fn is_chain_identity_column(name: &str) -> bool {
    matches!(name, INSTANCE_ID_COLUMN | CHAIN_ID_COLUMN | SEQUENCE_COLUMN)
}

/// Whether a column is one of the signature columns handled outside the
/// ordinary column pass.
pub fn is_reserved_signature_column(name: &str) -> bool {
    matches!(
        name,
        SIGNATURE_ALGORITHM_COLUMN | SIGNATURE_CERT_COLUMN | SPARE_COLUMN
    )
}

// ============================================================================
// SEMANTIC TYPES
// ============================================================================

/// Semantic column type, resolved once from the catalog's declared type name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Varchar2,
    NVarchar2,
    Char,
    NChar,
    Number,
    Float,
    Long,
    Date,
    Raw,
    LongRaw,
    RowId,
    URowId,
    BinaryFloat,
    BinaryDouble,
    Clob,
    NClob,
    Blob,
    BFile,
    Json,
    Timestamp,
    TimestampWithTimeZone,
    TimestampWithLocalTimeZone,
    IntervalYearToMonth,
    IntervalDayToSecond,
    /// Any declared type without a canonical type code.
    Other(String),
}

static TIMESTAMP_LTZ: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^TIMESTAMP(\(\d+\))? WITH LOCAL TIME ZONE$").expect("static regex"));
static TIMESTAMP_TZ: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^TIMESTAMP(\(\d+\))? WITH TIME ZONE$").expect("static regex"));
static TIMESTAMP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^TIMESTAMP(\(\d+\))?$").expect("static regex"));
static INTERVAL_YM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^INTERVAL YEAR(\(\d+\))? TO MONTH$").expect("static regex")
});
static INTERVAL_DS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^INTERVAL DAY(\(\d+\))? TO SECOND(\(\d+\))?$").expect("static regex")
});

impl ColumnType {
    /// Resolve a declared type name as reported by the catalog.
    ///
    /// Matching is case-insensitive and tolerant of surrounding whitespace.
    /// Parameterised timestamp and interval names carry their precision in
    /// parentheses, e.g. `TIMESTAMP(6) WITH TIME ZONE`.
    pub fn parse(declared: &str) -> Self {
        let normalized = declared.trim().to_ascii_uppercase();
        match normalized.as_str() {
            "VARCHAR2" | "VARCHAR" => ColumnType::Varchar2,
            "NVARCHAR2" => ColumnType::NVarchar2,
            "CHAR" => ColumnType::Char,
            "NCHAR" => ColumnType::NChar,
            "NUMBER" => ColumnType::Number,
            "FLOAT" => ColumnType::Float,
            "LONG" => ColumnType::Long,
            "DATE" => ColumnType::Date,
            "RAW" => ColumnType::Raw,
            "LONG RAW" => ColumnType::LongRaw,
            "ROWID" => ColumnType::RowId,
            "UROWID" => ColumnType::URowId,
            "BINARY_FLOAT" => ColumnType::BinaryFloat,
            "BINARY_DOUBLE" => ColumnType::BinaryDouble,
            "CLOB" => ColumnType::Clob,
            "NCLOB" => ColumnType::NClob,
            "BLOB" => ColumnType::Blob,
            "BFILE" => ColumnType::BFile,
            "JSON" => ColumnType::Json,
            other if TIMESTAMP_LTZ.is_match(other) => ColumnType::TimestampWithLocalTimeZone,
            other if TIMESTAMP_TZ.is_match(other) => ColumnType::TimestampWithTimeZone,
            other if TIMESTAMP.is_match(other) => ColumnType::Timestamp,
            other if INTERVAL_YM.is_match(other) => ColumnType::IntervalYearToMonth,
            other if INTERVAL_DS.is_match(other) => ColumnType::IntervalDayToSecond,
            _ => ColumnType::Other(declared.trim().to_string()),
        }
    }

    /// Type code written into the canonical column header.
    pub fn type_code(&self) -> u16 {
        match self {
            ColumnType::Varchar2 | ColumnType::NVarchar2 => 1,
            ColumnType::Number | ColumnType::Float => 2,
            ColumnType::Long => 8,
            ColumnType::Date => 12,
            ColumnType::Raw => 23,
            ColumnType::LongRaw => 24,
            ColumnType::RowId => 69,
            ColumnType::Char | ColumnType::NChar => 96,
            ColumnType::BinaryFloat => 100,
            ColumnType::BinaryDouble => 101,
            ColumnType::Clob | ColumnType::NClob => 112,
            ColumnType::Blob => 113,
            ColumnType::BFile => 114,
            ColumnType::Json => 119,
            ColumnType::Timestamp => 180,
            ColumnType::TimestampWithTimeZone => 181,
            ColumnType::IntervalYearToMonth => 182,
            ColumnType::IntervalDayToSecond => 183,
            ColumnType::URowId => 208,
            ColumnType::TimestampWithLocalTimeZone => 231,
            ColumnType::Other(_) => 0,
        }
    }

    /// Character types encoded as UTF-16.
    pub fn is_national(&self) -> bool {
        matches!(
            self,
            ColumnType::NVarchar2 | ColumnType::NChar | ColumnType::NClob
        )
    }

    /// Fixed-width character types whose trailing blanks are trimmed.
    pub fn is_blank_padded(&self) -> bool {
        matches!(self, ColumnType::Char | ColumnType::NChar)
    }

    pub fn is_character(&self) -> bool {
        matches!(
            self,
            ColumnType::Varchar2 | ColumnType::NVarchar2 | ColumnType::Char | ColumnType::NChar
        )
    }

    pub fn is_character_lob(&self) -> bool {
        matches!(self, ColumnType::Clob | ColumnType::NClob)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Other(name) => write!(f, "{}", name),
            other => write!(f, "{:?}", other),
        }
    }
}

// ============================================================================
// DESCRIPTORS
// ============================================================================

/// Raw catalog entry as reported by a ledger source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub data_type: String,
    pub internal_column_id: u16,
}

/// An ordinary column participating in the canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub column_type: ColumnType,
    pub position: u16,
}

impl ColumnDescriptor {
    pub fn from_catalog(entry: &CatalogEntry) -> Self {
        Self {
            name: entry.name.clone(),
            column_type: ColumnType::parse(&entry.data_type),
            position: entry.internal_column_id,
        }
    }
}

/// Type and position of the row hash column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashColumn {
    pub column_type: ColumnType,
    pub position: u16,
}

/// Everything the canonical encoder needs to know about a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    /// Hashable columns in ascending position order, reserved signature
    /// columns included.
    pub columns: Vec<ColumnDescriptor>,
    pub hash_column: HashColumn,
}

impl TableLayout {
    /// Build a layout from raw catalog entries. Returns `None` when the hash
    /// column is absent.
    pub fn from_catalog(entries: &[CatalogEntry]) -> Option<Self> {
        let hash_entry = entries.iter().find(|e| e.name == HASH_COLUMN)?;
        let mut columns: Vec<ColumnDescriptor> = entries
            .iter()
            .filter(|e| e.name != HASH_COLUMN && e.name != SIGNATURE_COLUMN)
            .map(ColumnDescriptor::from_catalog)
            .collect();
        columns.sort_by_key(|c| c.position);

        Some(Self {
            columns,
            hash_column: HashColumn {
                column_type: ColumnType::parse(&hash_entry.data_type),
                position: hash_entry.internal_column_id,
            },
        })
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Columns emitted in the ordinary pass.
    pub fn ordinary_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns
            .iter()
            .filter(|c| !is_reserved_signature_column(&c.name))
    }

    /// Ordinary columns other than the chain identity columns.
    pub fn user_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.ordinary_columns()
            .filter(|c| !is_chain_identity_column(&c.name))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, data_type: &str, id: u16) -> CatalogEntry {
        CatalogEntry {
            name: name.to_string(),
            data_type: data_type.to_string(),
            internal_column_id: id,
        }
    }

    #[test]
    fn test_plain_type_codes() {
        assert_eq!(ColumnType::parse("VARCHAR2").type_code(), 1);
        assert_eq!(ColumnType::parse("NVARCHAR2").type_code(), 1);
        assert_eq!(ColumnType::parse("NUMBER").type_code(), 2);
        assert_eq!(ColumnType::parse("FLOAT").type_code(), 2);
        assert_eq!(ColumnType::parse("LONG").type_code(), 8);
        assert_eq!(ColumnType::parse("DATE").type_code(), 12);
        assert_eq!(ColumnType::parse("RAW").type_code(), 23);
        assert_eq!(ColumnType::parse("LONG RAW").type_code(), 24);
        assert_eq!(ColumnType::parse("ROWID").type_code(), 69);
        assert_eq!(ColumnType::parse("CHAR").type_code(), 96);
        assert_eq!(ColumnType::parse("NCHAR").type_code(), 96);
        assert_eq!(ColumnType::parse("BINARY_FLOAT").type_code(), 100);
        assert_eq!(ColumnType::parse("BINARY_DOUBLE").type_code(), 101);
        assert_eq!(ColumnType::parse("CLOB").type_code(), 112);
        assert_eq!(ColumnType::parse("NCLOB").type_code(), 112);
        assert_eq!(ColumnType::parse("BLOB").type_code(), 113);
        assert_eq!(ColumnType::parse("BFILE").type_code(), 114);
        assert_eq!(ColumnType::parse("JSON").type_code(), 119);
        assert_eq!(ColumnType::parse("UROWID").type_code(), 208);
    }

    #[test]
    fn test_parameterised_type_codes() {
        assert_eq!(ColumnType::parse("TIMESTAMP(6)").type_code(), 180);
        assert_eq!(ColumnType::parse("TIMESTAMP").type_code(), 180);
        assert_eq!(
            ColumnType::parse("TIMESTAMP(6) WITH TIME ZONE").type_code(),
            181
        );
        assert_eq!(
            ColumnType::parse("TIMESTAMP(9) WITH LOCAL TIME ZONE").type_code(),
            231
        );
        assert_eq!(
            ColumnType::parse("INTERVAL YEAR(2) TO MONTH").type_code(),
            182
        );
        assert_eq!(
            ColumnType::parse("INTERVAL DAY(2) TO SECOND(6)").type_code(),
            183
        );
    }

    #[test]
    fn test_unknown_type_maps_to_zero() {
        let t = ColumnType::parse("SDO_GEOMETRY");
        assert_eq!(t, ColumnType::Other("SDO_GEOMETRY".to_string()));
        assert_eq!(t.type_code(), 0);
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(ColumnType::parse(" varchar2 "), ColumnType::Varchar2);
        assert_eq!(
            ColumnType::parse("timestamp(3) with time zone"),
            ColumnType::TimestampWithTimeZone
        );
    }

    #[test]
    fn test_layout_excludes_hash_and_signature() {
        let entries = vec![
            entry("AMOUNT", "NUMBER", 3),
            entry(HASH_COLUMN, "RAW", 9),
            entry("ID", "NUMBER", 1),
            entry(SIGNATURE_COLUMN, "RAW", 10),
            entry(SPARE_COLUMN, "NUMBER", 12),
        ];
        let layout = TableLayout::from_catalog(&entries).expect("layout should build");
        let names: Vec<&str> = layout.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["ID", "AMOUNT", SPARE_COLUMN]);
        assert_eq!(layout.hash_column.position, 9);
        assert_eq!(layout.hash_column.column_type.type_code(), 23);

        let ordinary: Vec<&str> = layout.ordinary_columns().map(|c| c.name.as_str()).collect();
        assert_eq!(ordinary, vec!["ID", "AMOUNT"]);
    }

    #[test]
    fn test_chain_identity_columns_are_hashed() {
        let entries = vec![
            entry(INSTANCE_ID_COLUMN, "NUMBER", 1),
            entry(CHAIN_ID_COLUMN, "NUMBER", 2),
            entry(SEQUENCE_COLUMN, "NUMBER", 3),
            entry("AMOUNT", "NUMBER", 4),
            entry(HASH_COLUMN, "RAW", 5),
        ];
        let layout = TableLayout::from_catalog(&entries).expect("layout should build");
        assert_eq!(layout.ordinary_columns().count(), 4);
        let user: Vec<&str> = layout.user_columns().map(|c| c.name.as_str()).collect();
        assert_eq!(user, vec!["AMOUNT"]);
        assert!(is_chain_identity_column(SEQUENCE_COLUMN));
        assert!(!is_chain_identity_column("AMOUNT"));
    }

    #[test]
    fn test_layout_requires_hash_column() {
        let entries = vec![entry("ID", "NUMBER", 1)];
        assert!(TableLayout::from_catalog(&entries).is_none());
    }
}
