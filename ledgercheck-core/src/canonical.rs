//! Canonical row encoding.
//!
//! A row hash covers a byte sequence built column by column. Every column
//! contributes a 20-byte little-endian header followed by its value bytes:
//!
//! ```text
//! offset  size  field
//! 0       2     version (always 1)
//! 2       2     ordinal position
//! 4       2     type code
//! 6       1     is-null flag
//! 7       1     reserved (0)
//! 8       8     value length in bytes
//! 16      4     spare (0)
//! ```
//!
//! Ordinary columns come first in position order, then any signature columns
//! selected by the spare bitmask, then the linkage block: a header for the
//! hash column followed by the 64-byte hash of the previous row (zeros for
//! the first row of a chain).

use crate::column::{
    ColumnDescriptor, ColumnType, TableLayout, SIGNATURE_ALGORITHM_COLUMN, SIGNATURE_CERT_COLUMN,
    SPARE_COLUMN,
};
use crate::digest::{RowHash, DIGEST_LEN};
use crate::error::{io_error, LedgerResult, StorageError, ValidationError};
use crate::linkage::HashLinkage;
use crate::row::{read_to_vec, CharLobReader, ColumnValue, MemoryCharLob, RowKey, RowValues};
use bitflags::bitflags;
use std::io::Read;

pub const HEADER_VERSION: u16 = 1;
pub const HEADER_LEN: usize = 20;
/// Character LOBs are copied this many UTF-16 units at a time.
pub const CHAR_LOB_CHUNK_UNITS: usize = 4 * 1024;
/// Binary LOBs are copied this many bytes at a time.
pub const BINARY_LOB_CHUNK_BYTES: usize = 8 * 1024;

bitflags! {
    /// Bits of the spare column selecting which signature columns are hashed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SignatureFlags: u32 {
        const ALGORITHM = 0b01;
        const CERTIFICATE = 0b10;
    }
}

impl SignatureFlags {
    /// Interpret the raw spare value: the first four bytes as a little-endian
    /// integer, zero-extended when shorter.
    pub fn from_spare(raw: &[u8]) -> Self {
        let mut word = [0u8; 4];
        let n = raw.len().min(4);
        word[..n].copy_from_slice(&raw[..n]);
        SignatureFlags::from_bits_truncate(u32::from_le_bytes(word))
    }
}

// ============================================================================
// HEADER
// ============================================================================

/// Fixed-size header preceding every column value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnHeader {
    pub position: u16,
    pub type_code: u16,
    pub is_null: bool,
    pub length: u64,
}

impl ColumnHeader {
    pub fn value(position: u16, type_code: u16, length: u64) -> Self {
        Self {
            position,
            type_code,
            is_null: false,
            length,
        }
    }

    pub fn null(position: u16, type_code: u16) -> Self {
        Self {
            position,
            type_code,
            is_null: true,
            length: 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..2].copy_from_slice(&HEADER_VERSION.to_le_bytes());
        out[2..4].copy_from_slice(&self.position.to_le_bytes());
        out[4..6].copy_from_slice(&self.type_code.to_le_bytes());
        out[6] = u8::from(self.is_null);
        // out[7] reserved, out[16..20] spare
        out[8..16].copy_from_slice(&self.length.to_le_bytes());
        out
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_bytes());
    }
}

// ============================================================================
// ROW ENCODING
// ============================================================================

/// Encode a row into `out`, replacing its previous contents.
///
/// `values` must hold every column in `layout`; absent columns encode as
/// null.
pub fn canonicalize_into(
    row_key: RowKey,
    layout: &TableLayout,
    mut values: RowValues,
    linkage: &HashLinkage,
    out: &mut Vec<u8>,
) -> LedgerResult<()> {
    out.clear();

    for column in layout.ordinary_columns() {
        let value = values.take(&column.name);
        encode_column(column, value, out)?;
    }

    encode_signature_columns(layout, &mut values, out)?;

    let previous = linkage.block_for(row_key)?;
    encode_linkage(layout, &previous, out);
    Ok(())
}

/// Allocating form of [`canonicalize_into`].
pub fn canonicalize(
    row_key: RowKey,
    layout: &TableLayout,
    values: RowValues,
    linkage: &HashLinkage,
) -> LedgerResult<Vec<u8>> {
    let mut out = Vec::with_capacity(256);
    canonicalize_into(row_key, layout, values, linkage, &mut out)?;
    Ok(out)
}

/// Append the linkage block for `previous`.
pub fn encode_linkage(layout: &TableLayout, previous: &RowHash, out: &mut Vec<u8>) {
    ColumnHeader::value(
        layout.hash_column.position,
        layout.hash_column.column_type.type_code(),
        DIGEST_LEN as u64,
    )
    .write_to(out);
    out.extend_from_slice(previous.as_bytes());
}

fn encode_column(
    column: &ColumnDescriptor,
    value: ColumnValue,
    out: &mut Vec<u8>,
) -> LedgerResult<()> {
    let code = column.column_type.type_code();

    if value.is_null() {
        ColumnHeader::null(column.position, code).write_to(out);
        return Ok(());
    }

    let column_type = &column.column_type;
    if column_type.is_character() {
        let bytes = match value {
            ColumnValue::Text(text) => encode_text(column_type, &text),
            ColumnValue::Bytes(bytes) => bytes,
            other => return Err(mismatch(column, &other)),
        };
        write_value(column.position, code, &bytes, out);
        return Ok(());
    }

    if column_type.is_character_lob() {
        return match value {
            ColumnValue::CharLob(mut lob) => stream_char_lob(column.position, code, lob.as_mut(), out),
            ColumnValue::Text(text) => {
                stream_char_lob(column.position, code, &mut MemoryCharLob::new(&text), out)
            }
            other => Err(mismatch(column, &other)),
        };
    }

    match (column_type, value) {
        (ColumnType::Blob, ColumnValue::BinaryLob { len, mut reader }) => {
            stream_binary_lob(column.position, code, len, reader.as_mut(), out)
        }
        (_, ColumnValue::Bytes(bytes)) => {
            write_value(column.position, code, &bytes, out);
            Ok(())
        }
        (_, other) => Err(mismatch(column, &other)),
    }
}

fn encode_signature_columns(
    layout: &TableLayout,
    values: &mut RowValues,
    out: &mut Vec<u8>,
) -> LedgerResult<()> {
    let Some(spare) = read_to_vec(values.take(SPARE_COLUMN))? else {
        return Ok(());
    };
    let flags = SignatureFlags::from_spare(&spare);

    if flags.contains(SignatureFlags::ALGORITHM) {
        if let Some(column) = layout.column(SIGNATURE_ALGORITHM_COLUMN) {
            let bytes = read_to_vec(values.take(SIGNATURE_ALGORITHM_COLUMN))?.unwrap_or_default();
            write_value(column.position, ColumnType::Number.type_code(), &bytes, out);
        }
    }
    if flags.contains(SignatureFlags::CERTIFICATE) {
        if let Some(column) = layout.column(SIGNATURE_CERT_COLUMN) {
            let bytes = read_to_vec(values.take(SIGNATURE_CERT_COLUMN))?.unwrap_or_default();
            write_value(column.position, ColumnType::Raw.type_code(), &bytes, out);
        }
    }
    Ok(())
}

fn write_value(position: u16, type_code: u16, bytes: &[u8], out: &mut Vec<u8>) {
    ColumnHeader::value(position, type_code, bytes.len() as u64).write_to(out);
    out.extend_from_slice(bytes);
}

/// Encode a character value: UTF-8 for database-charset types, UTF-16BE for
/// national types. Blank-padded types lose their trailing blanks, keeping one
/// blank for an all-blank value.
pub fn encode_text(column_type: &ColumnType, text: &str) -> Vec<u8> {
    let text = if column_type.is_blank_padded() {
        trim_blank_padding(text)
    } else {
        text
    };
    if column_type.is_national() {
        utf16_be(text)
    } else {
        text.as_bytes().to_vec()
    }
}

fn trim_blank_padding(text: &str) -> &str {
    let trimmed = text.trim_end_matches(' ');
    if trimmed.is_empty() && !text.is_empty() {
        " "
    } else {
        trimmed
    }
}

fn utf16_be(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_be_bytes).collect()
}

fn stream_char_lob(
    position: u16,
    type_code: u16,
    lob: &mut dyn CharLobReader,
    out: &mut Vec<u8>,
) -> LedgerResult<()> {
    let declared = lob.utf16_len() * 2;
    ColumnHeader::value(position, type_code, declared).write_to(out);

    let mut chunk = vec![0u16; CHAR_LOB_CHUNK_UNITS];
    let mut streamed = 0u64;
    loop {
        let n = lob
            .read_units(&mut chunk)
            .map_err(|e| io_error("<character lob>", e))?;
        if n == 0 {
            break;
        }
        out.extend(chunk[..n].iter().flat_map(|unit| unit.to_be_bytes()));
        streamed += n as u64 * 2;
    }
    check_lob_length(position, declared, streamed)
}

fn stream_binary_lob(
    position: u16,
    type_code: u16,
    len: u64,
    reader: &mut (dyn Read + Send),
    out: &mut Vec<u8>,
) -> LedgerResult<()> {
    ColumnHeader::value(position, type_code, len).write_to(out);

    let mut chunk = vec![0u8; BINARY_LOB_CHUNK_BYTES];
    let mut streamed = 0u64;
    loop {
        let n = reader
            .read(&mut chunk)
            .map_err(|e| io_error("<binary lob>", e))?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&chunk[..n]);
        streamed += n as u64;
    }
    check_lob_length(position, len, streamed)
}

/// The header already carries `declared`, so the bytes that follow it must
/// match.
fn check_lob_length(position: u16, declared: u64, streamed: u64) -> LedgerResult<()> {
    if declared != streamed {
        return Err(StorageError::LobLengthMismatch {
            position,
            declared,
            streamed,
        }
        .into());
    }
    Ok(())
}

fn mismatch(column: &ColumnDescriptor, value: &ColumnValue) -> crate::LedgerError {
    ValidationError::ValueTypeMismatch {
        column: column.name.clone(),
        declared: column.column_type.to_string(),
        found: value.kind().to_string(),
    }
    .into()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{CatalogEntry, HASH_COLUMN};
    use crate::error::{IntegrityError, LedgerError};

    fn entry(name: &str, data_type: &str, id: u16) -> CatalogEntry {
        CatalogEntry {
            name: name.to_string(),
            data_type: data_type.to_string(),
            internal_column_id: id,
        }
    }

    fn layout(entries: &[CatalogEntry]) -> TableLayout {
        TableLayout::from_catalog(entries).expect("layout should build")
    }

    fn simple_layout() -> TableLayout {
        layout(&[
            entry("ID", "NUMBER", 1),
            entry("NAME", "VARCHAR2", 2),
            entry("NOTE", "CHAR", 3),
            entry(HASH_COLUMN, "RAW", 4),
        ])
    }

    fn unhex(s: &str) -> Vec<u8> {
        hex::decode(s.replace(' ', "")).expect("valid test hex")
    }

    #[test]
    fn test_header_golden_bytes() {
        let header = ColumnHeader::value(3, 2, 2).to_bytes();
        assert_eq!(
            header.to_vec(),
            unhex("0100 0300 0200 00 00 0200000000000000 00000000")
        );

        let null = ColumnHeader::null(0x0102, 96).to_bytes();
        assert_eq!(
            null.to_vec(),
            unhex("0100 0201 6000 01 00 0000000000000000 00000000")
        );
    }

    #[test]
    fn test_first_row_golden_vector() {
        let values = RowValues::new()
            .with("ID", ColumnValue::bytes(vec![0xC1, 0x02]))
            .with("NAME", ColumnValue::text("ab"))
            .with("NOTE", ColumnValue::Null);
        let bytes = canonicalize(
            RowKey::new(1, 0, 1),
            &simple_layout(),
            values,
            &HashLinkage::awaiting_first_row(),
        )
        .expect("canonicalize should succeed");

        let mut expected = Vec::new();
        expected.extend(unhex("0100 0100 0200 00 00 0200000000000000 00000000 c102"));
        expected.extend(unhex("0100 0200 0100 00 00 0200000000000000 00000000 6162"));
        expected.extend(unhex("0100 0300 6000 01 00 0000000000000000 00000000"));
        expected.extend(unhex("0100 0400 1700 00 00 4000000000000000 00000000"));
        expected.extend([0u8; 64]);

        assert_eq!(bytes.len(), 148);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_linkage_block_uses_previous_hash() {
        let previous = RowHash::compute(b"previous row");
        let values = RowValues::new()
            .with("ID", ColumnValue::bytes(vec![0xC1, 0x03]))
            .with("NAME", ColumnValue::Null)
            .with("NOTE", ColumnValue::Null);
        let bytes = canonicalize(
            RowKey::new(1, 0, 2),
            &simple_layout(),
            values,
            &HashLinkage::linked_to(Some(previous)),
        )
        .expect("canonicalize should succeed");

        assert_eq!(&bytes[bytes.len() - 64..], previous.as_bytes());
    }

    #[test]
    fn test_missing_linkage_for_later_row() {
        let err = canonicalize(
            RowKey::new(1, 0, 5),
            &simple_layout(),
            RowValues::new(),
            &HashLinkage::awaiting_first_row(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Integrity(IntegrityError::MissingLinkage { .. })
        ));
    }

    #[test]
    fn test_char_trimming() {
        assert_eq!(encode_text(&ColumnType::Char, "ab   "), b"ab".to_vec());
        assert_eq!(encode_text(&ColumnType::Char, "    "), b" ".to_vec());
        assert_eq!(encode_text(&ColumnType::Char, " ab"), b" ab".to_vec());
        assert_eq!(encode_text(&ColumnType::Varchar2, "ab  "), b"ab  ".to_vec());
    }

    #[test]
    fn test_national_text_is_utf16_be() {
        assert_eq!(
            encode_text(&ColumnType::NVarchar2, "A\u{e9}"),
            vec![0x00, 0x41, 0x00, 0xE9]
        );
        assert_eq!(encode_text(&ColumnType::NChar, "A  "), vec![0x00, 0x41]);
    }

    #[test]
    fn test_clob_streamed_as_utf16() {
        let l = layout(&[entry("DOC", "CLOB", 1), entry(HASH_COLUMN, "RAW", 2)]);
        let text = "x".repeat(CHAR_LOB_CHUNK_UNITS + 10);
        let values = RowValues::new().with("DOC", ColumnValue::clob(&text));
        let bytes = canonicalize(RowKey::new(1, 0, 1), &l, values, &HashLinkage::default())
            .expect("canonicalize should succeed");

        let header = ColumnHeader::value(1, 112, (text.len() * 2) as u64).to_bytes();
        assert_eq!(&bytes[..HEADER_LEN], &header);
        assert_eq!(&bytes[HEADER_LEN..HEADER_LEN + 2], &[0x00, b'x']);
        assert_eq!(bytes.len(), HEADER_LEN + text.len() * 2 + HEADER_LEN + 64);
    }

    #[test]
    fn test_clob_accepts_plain_text() {
        let l = layout(&[entry("DOC", "NCLOB", 1), entry(HASH_COLUMN, "RAW", 2)]);
        let streamed = canonicalize(
            RowKey::new(1, 0, 1),
            &l,
            RowValues::new().with("DOC", ColumnValue::clob("hello")),
            &HashLinkage::default(),
        )
        .unwrap();
        let plain = canonicalize(
            RowKey::new(1, 0, 1),
            &l,
            RowValues::new().with("DOC", ColumnValue::text("hello")),
            &HashLinkage::default(),
        )
        .unwrap();
        assert_eq!(streamed, plain);
    }

    #[test]
    fn test_blob_streamed() {
        let l = layout(&[entry("IMG", "BLOB", 1), entry(HASH_COLUMN, "RAW", 2)]);
        let data: Vec<u8> = (0..(BINARY_LOB_CHUNK_BYTES * 2 + 3))
            .map(|i| (i % 251) as u8)
            .collect();
        let bytes = canonicalize(
            RowKey::new(1, 0, 1),
            &l,
            RowValues::new().with("IMG", ColumnValue::blob(data.clone())),
            &HashLinkage::default(),
        )
        .unwrap();
        assert_eq!(&bytes[HEADER_LEN..HEADER_LEN + data.len()], data.as_slice());
        assert_eq!(
            &bytes[..HEADER_LEN],
            &ColumnHeader::value(1, 113, data.len() as u64).to_bytes()
        );
    }

    /// Claims more code units than it delivers.
    struct ShortCharLob(MemoryCharLob);

    impl CharLobReader for ShortCharLob {
        fn utf16_len(&self) -> u64 {
            self.0.utf16_len() + 3
        }

        fn read_units(&mut self, buf: &mut [u16]) -> std::io::Result<usize> {
            self.0.read_units(buf)
        }
    }

    #[test]
    fn test_short_clob_is_rejected() {
        let l = layout(&[entry("DOC", "CLOB", 1), entry(HASH_COLUMN, "RAW", 2)]);
        let lob = ColumnValue::CharLob(Box::new(ShortCharLob(MemoryCharLob::new("abc"))));
        let err = canonicalize(
            RowKey::new(1, 0, 1),
            &l,
            RowValues::new().with("DOC", lob),
            &HashLinkage::default(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            LedgerError::Storage(StorageError::LobLengthMismatch {
                position: 1,
                declared: 12,
                streamed: 6,
            })
        );
    }

    #[test]
    fn test_blob_length_must_match_stream() {
        let l = layout(&[entry("IMG", "BLOB", 1), entry(HASH_COLUMN, "RAW", 2)]);
        for (declared, data) in [(10u64, vec![1u8, 2, 3]), (1, vec![1, 2])] {
            let value = ColumnValue::BinaryLob {
                len: declared,
                reader: Box::new(std::io::Cursor::new(data.clone())),
            };
            let err = canonicalize(
                RowKey::new(1, 0, 1),
                &l,
                RowValues::new().with("IMG", value),
                &HashLinkage::default(),
            )
            .unwrap_err();
            assert_eq!(
                err,
                LedgerError::Storage(StorageError::LobLengthMismatch {
                    position: 1,
                    declared,
                    streamed: data.len() as u64,
                })
            );
        }
    }

    #[test]
    fn test_text_for_number_is_rejected() {
        let err = canonicalize(
            RowKey::new(1, 0, 1),
            &simple_layout(),
            RowValues::new().with("ID", ColumnValue::text("12")),
            &HashLinkage::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Validation(ValidationError::ValueTypeMismatch { .. })
        ));
    }

    fn signed_layout() -> TableLayout {
        layout(&[
            entry("ID", "NUMBER", 1),
            entry(SIGNATURE_ALGORITHM_COLUMN, "NUMBER", 5),
            entry(SIGNATURE_CERT_COLUMN, "RAW", 6),
            entry(SPARE_COLUMN, "RAW", 7),
            entry(HASH_COLUMN, "RAW", 8),
        ])
    }

    fn signed_row(spare: ColumnValue) -> Vec<u8> {
        let values = RowValues::new()
            .with("ID", ColumnValue::bytes(vec![0xC1, 0x02]))
            .with(SIGNATURE_ALGORITHM_COLUMN, ColumnValue::bytes(vec![0xAA]))
            .with(SIGNATURE_CERT_COLUMN, ColumnValue::bytes(vec![0xBB, 0xCC]))
            .with(SPARE_COLUMN, spare);
        canonicalize(RowKey::new(1, 0, 1), &signed_layout(), values, &HashLinkage::default())
            .expect("canonicalize should succeed")
    }

    #[test]
    fn test_signature_columns_follow_mask() {
        let id_part = HEADER_LEN + 2;
        let linkage_part = HEADER_LEN + 64;

        let none = signed_row(ColumnValue::Null);
        assert_eq!(none.len(), id_part + linkage_part);

        let both = signed_row(ColumnValue::bytes(vec![0x03, 0, 0, 0]));
        assert_eq!(both.len(), id_part + HEADER_LEN + 1 + HEADER_LEN + 2 + linkage_part);
        let alg = &both[id_part..id_part + HEADER_LEN + 1];
        assert_eq!(&alg[..HEADER_LEN], &ColumnHeader::value(5, 2, 1).to_bytes());
        assert_eq!(alg[HEADER_LEN], 0xAA);
        let cert_start = id_part + HEADER_LEN + 1;
        assert_eq!(
            &both[cert_start..cert_start + HEADER_LEN],
            &ColumnHeader::value(6, 23, 2).to_bytes()
        );

        let cert_only = signed_row(ColumnValue::bytes(vec![0x02]));
        assert_eq!(cert_only.len(), id_part + HEADER_LEN + 2 + linkage_part);
    }

    #[test]
    fn test_signature_flags_from_spare() {
        assert_eq!(SignatureFlags::from_spare(&[]), SignatureFlags::empty());
        assert_eq!(SignatureFlags::from_spare(&[1]), SignatureFlags::ALGORITHM);
        assert_eq!(
            SignatureFlags::from_spare(&[3, 0, 0, 0, 9]),
            SignatureFlags::ALGORITHM | SignatureFlags::CERTIFICATE
        );
        assert_eq!(SignatureFlags::from_spare(&[0, 1]), SignatureFlags::empty());
    }
}
