//! ledgercheck Test Utilities
//!
//! Shared test infrastructure for the ledgercheck workspace:
//! - Proptest generators for keys, identifiers, stored hashes and values
//! - [`LedgerFixture`], which builds correctly hash-chained in-memory ledgers
//! - Assertions on the error taxonomy

pub use ledgercheck_storage::{InMemoryLedger, StoredValue};

pub use ledgercheck_core::{
    CatalogEntry, Checkpoint, ColumnType, IntegrityError, LedgerError, LedgerResult,
    LedgerTarget, RowHash, RowKey, SequenceFault,
};

pub use fixtures::{oracle_number, LedgerFixture};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    /// Generate a key with a positive sequence number.
    pub fn arb_row_key() -> impl Strategy<Value = RowKey> {
        (0u32..4, 0u32..32, 1i64..10_000).prop_map(|(i, c, s)| RowKey::new(i, c, s))
    }

    /// Generate a bare identifier the database would accept unquoted.
    pub fn arb_identifier() -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z0-9_$#]{0,29}"
    }

    /// Generate a stored hash: 128 hex digits in either case.
    pub fn arb_stored_hash() -> impl Strategy<Value = String> {
        (any::<[u8; 32]>(), any::<[u8; 32]>(), any::<bool>()).prop_map(|(a, b, upper)| {
            let mut bytes = [0u8; 64];
            bytes[..32].copy_from_slice(&a);
            bytes[32..].copy_from_slice(&b);
            let hex = RowHash::from_bytes(bytes).to_hex();
            if upper {
                hex.to_ascii_uppercase()
            } else {
                hex
            }
        })
    }

    /// Generate a declared type name the fixture knows how to populate.
    pub fn arb_declared_type() -> impl Strategy<Value = &'static str> {
        prop_oneof![
            Just("NUMBER"),
            Just("VARCHAR2"),
            Just("NVARCHAR2"),
            Just("CHAR"),
            Just("NCHAR"),
            Just("DATE"),
            Just("RAW"),
            Just("CLOB"),
            Just("NCLOB"),
            Just("BLOB"),
            Just("TIMESTAMP(6)"),
        ]
    }

    /// Generate character data, including non-ASCII and trailing blanks.
    pub fn arb_text() -> impl Strategy<Value = String> {
        prop_oneof![
            "[ -~]{0,40}",
            "[a-zé€中 ]{0,20}",
            "[a-z]{1,10} {1,5}",
        ]
    }

    /// Generate a stored value fitting a column of `column_type`.
    pub fn arb_value_for(column_type: ColumnType) -> BoxedStrategy<Option<StoredValue>> {
        let value = if column_type.is_character() || column_type.is_character_lob() {
            arb_text().prop_map(StoredValue::Text).boxed()
        } else if matches!(column_type, ColumnType::Number | ColumnType::Float) {
            any::<u64>().prop_map(|n| StoredValue::hex(oracle_number(n))).boxed()
        } else {
            prop::collection::vec(any::<u8>(), 0..64)
                .prop_map(StoredValue::hex)
                .boxed()
        };
        prop::option::weighted(0.9, value).boxed()
    }

    /// Generate chain lengths for a small ledger: `(instance, chain, rows)`.
    pub fn arb_chain_shape() -> impl Strategy<Value = Vec<(u32, u32, i64)>> {
        prop::collection::btree_map((1u32..3, 0u32..4), 1i64..6, 1..4)
            .prop_map(|chains| chains.into_iter().map(|((i, c), n)| (i, c, n)).collect())
    }

    /// Generate a checkpoint covering a handful of chains.
    pub fn arb_checkpoint() -> impl Strategy<Value = Checkpoint> {
        prop::collection::vec((0u32..4, 0u32..32, 0i64..1000), 0..8).prop_map(|entries| {
            let mut checkpoint = Checkpoint::new();
            for (i, c, s) in entries {
                checkpoint.set(i, c, s);
            }
            checkpoint
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;
    use ledgercheck_core::{
        canonicalize, is_reserved_signature_column, ColumnValue, HashLinkage, RowValues,
        TableLayout, HASH_COLUMN,
    };
    use ledgercheck_storage::RowSnapshot;
    use std::collections::BTreeMap;
    use std::path::Path;

    /// Internal form of a non-negative integer in a NUMBER column.
    ///
    /// ```
    /// use ledgercheck_test_utils::oracle_number;
    /// assert_eq!(oracle_number(1), vec![0xc1, 0x02]);
    /// assert_eq!(oracle_number(100), vec![0xc2, 0x02]);
    /// ```
    pub fn oracle_number(value: u64) -> Vec<u8> {
        if value == 0 {
            return vec![0x80];
        }
        let mut digits = Vec::new();
        let mut rest = value;
        while rest > 0 {
            digits.push((rest % 100) as u8);
            rest /= 100;
        }
        digits.reverse();
        let exponent = 0xc0 + digits.len() as u8;
        while digits.last() == Some(&0) {
            digits.pop();
        }

        let mut out = Vec::with_capacity(digits.len() + 1);
        out.push(exponent);
        out.extend(digits.iter().map(|d| d + 1));
        out
    }

    type Values = BTreeMap<String, Option<StoredValue>>;

    /// Builder for a single ledger table whose stored hashes are correct.
    ///
    /// Columns get consecutive positions starting at 1; the hash column is
    /// appended after the last one. Rows added with [`chain`](Self::chain)
    /// carry deterministic values that differ from row to row.
    ///
    /// ```ignore
    /// let ledger = LedgerFixture::new("DB1", "BANK", "LEDGER")
    ///     .number_column("AMOUNT")
    ///     .varchar_column("NOTE")
    ///     .chain(1, 0, 3)
    ///     .build()?;
    /// ```
    #[derive(Debug, Clone)]
    pub struct LedgerFixture {
        database_id: String,
        schema: String,
        table: String,
        columns: Vec<CatalogEntry>,
        rows: BTreeMap<RowKey, Values>,
    }

    impl LedgerFixture {
        pub fn new(database_id: &str, schema: &str, table: &str) -> Self {
            Self {
                database_id: database_id.to_string(),
                schema: schema.to_string(),
                table: table.to_string(),
                columns: Vec::new(),
                rows: BTreeMap::new(),
            }
        }

        pub fn column(mut self, name: &str, data_type: &str) -> Self {
            let position = self.columns.len() as u16 + 1;
            self.columns.push(CatalogEntry {
                name: name.to_string(),
                data_type: data_type.to_string(),
                internal_column_id: position,
            });
            self
        }

        pub fn number_column(self, name: &str) -> Self {
            self.column(name, "NUMBER")
        }

        pub fn varchar_column(self, name: &str) -> Self {
            self.column(name, "VARCHAR2")
        }

        pub fn char_column(self, name: &str) -> Self {
            self.column(name, "CHAR")
        }

        pub fn clob_column(self, name: &str) -> Self {
            self.column(name, "CLOB")
        }

        pub fn blob_column(self, name: &str) -> Self {
            self.column(name, "BLOB")
        }

        /// Add rows `1..=len` of one chain with generated values.
        pub fn chain(mut self, instance_id: u32, chain_id: u32, len: i64) -> Self {
            for sequence_no in 1..=len {
                let key = RowKey::new(instance_id, chain_id, sequence_no);
                let values = self
                    .columns
                    .iter()
                    .map(|entry| (entry.name.clone(), generated_value(entry, key)))
                    .collect();
                self.rows.insert(key, values);
            }
            self
        }

        /// Override one value of a row, adding the row when it is new.
        pub fn set(mut self, key: RowKey, column: &str, value: Option<StoredValue>) -> Self {
            self.rows
                .entry(key)
                .or_default()
                .insert(column.to_string(), value);
            self
        }

        pub fn target(&self) -> LedgerResult<LedgerTarget> {
            Ok(LedgerTarget::new(&self.schema, &self.table, self.database_id.clone())?)
        }

        /// Build the ledger.
        ///
        /// Each row links to the hash computed for its predecessor. A row
        /// whose predecessor is not part of the fixture links to the zero
        /// hash and will fail verification unless it is the first row.
        pub fn build(self) -> LedgerResult<InMemoryLedger> {
            let mut entries = self.columns.clone();
            entries.push(CatalogEntry {
                name: HASH_COLUMN.to_string(),
                data_type: "RAW".to_string(),
                internal_column_id: self.columns.len() as u16 + 1,
            });
            let layout = TableLayout::from_catalog(&entries).ok_or_else(|| {
                LedgerError::from(ledgercheck_core::SchemaError::NotALedgerTable {
                    schema: self.schema.clone(),
                    table: self.table.clone(),
                    column: HASH_COLUMN.to_string(),
                })
            })?;

            let ledger = InMemoryLedger::new(self.database_id.clone());
            ledger.create_table(&self.schema, &self.table, entries)?;

            let mut hashes: BTreeMap<RowKey, RowHash> = BTreeMap::new();
            for (key, values) in self.rows {
                let previous = key
                    .predecessor()
                    .and_then(|p| hashes.get(&p).copied())
                    .unwrap_or(RowHash::ZERO);
                let linkage = HashLinkage::linked_to(Some(previous));
                let canonical = canonicalize(key, &layout, row_values(&layout, &values)?, &linkage)?;
                let hash = RowHash::compute(&canonical);
                hashes.insert(key, hash);

                ledger.insert_row(
                    &self.schema,
                    &self.table,
                    RowSnapshot {
                        instance_id: key.instance_id,
                        chain_id: key.chain_id,
                        sequence_no: key.sequence_no,
                        hash: hash.to_hex(),
                        values,
                    },
                )?;
            }
            Ok(ledger)
        }

        /// Build the ledger and write it as a snapshot document.
        pub fn write_snapshot(self, path: &Path) -> LedgerResult<()> {
            let snapshot = self.build()?.to_snapshot()?;
            let document = serde_json::to_string_pretty(&snapshot).map_err(|e| {
                ledgercheck_core::StorageError::Serialization {
                    what: "snapshot".to_string(),
                    reason: e.to_string(),
                }
            })?;
            std::fs::write(path, document).map_err(|e| ledgercheck_core::io_error(path, e))
        }
    }

    fn row_values(layout: &TableLayout, values: &Values) -> LedgerResult<RowValues> {
        let mut out = RowValues::new();
        for column in &layout.columns {
            let value = match values.get(&column.name) {
                Some(Some(stored)) => stored.to_column_value(&column.name, &column.column_type)?,
                _ => ColumnValue::Null,
            };
            out.insert(column.name.clone(), value);
        }
        Ok(out)
    }

    fn generated_value(entry: &CatalogEntry, key: RowKey) -> Option<StoredValue> {
        if is_reserved_signature_column(&entry.name) {
            return None;
        }
        let column_type = ColumnType::parse(&entry.data_type);
        let label = format!(
            "{} {}/{}/{}",
            entry.name.to_ascii_lowercase(),
            key.instance_id,
            key.chain_id,
            key.sequence_no
        );
        let value = if column_type.is_character() {
            StoredValue::text(label)
        } else if column_type.is_character_lob() {
            StoredValue::text(label.repeat(8))
        } else if matches!(column_type, ColumnType::Number | ColumnType::Float) {
            StoredValue::hex(oracle_number(key.sequence_no.unsigned_abs()))
        } else {
            StoredValue::hex(label.as_bytes())
        };
        Some(value)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    use super::*;

    /// Assert that a result is a sequence violation of the given kind.
    pub fn assert_sequence_fault<T: std::fmt::Debug>(result: &LedgerResult<T>, expected: SequenceFault) {
        match result {
            Err(LedgerError::Integrity(IntegrityError::SequenceViolation { fault, .. })) => {
                assert_eq!(*fault, expected, "wrong sequence fault");
            }
            other => panic!("Expected {:?} sequence violation, got {:?}", expected, other),
        }
    }

    /// Assert that a result is any integrity violation.
    pub fn assert_integrity_error<T: std::fmt::Debug>(result: &LedgerResult<T>) {
        assert!(
            matches!(result, Err(LedgerError::Integrity(_))),
            "Expected integrity error, got {:?}",
            result
        );
    }

    pub fn assert_schema_error<T: std::fmt::Debug>(result: &LedgerResult<T>) {
        assert!(
            matches!(result, Err(LedgerError::Schema(_))),
            "Expected schema error, got {:?}",
            result
        );
    }

    pub fn assert_storage_error<T: std::fmt::Debug>(result: &LedgerResult<T>) {
        assert!(
            matches!(result, Err(LedgerError::Storage(_))),
            "Expected storage error, got {:?}",
            result
        );
    }

    pub fn assert_config_error<T: std::fmt::Debug>(result: &LedgerResult<T>) {
        assert!(
            matches!(result, Err(LedgerError::Config(_))),
            "Expected config error, got {:?}",
            result
        );
    }
}

// ============================================================================
// TESTS
// ============================================================================
