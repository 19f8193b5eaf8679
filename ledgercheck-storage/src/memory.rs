//! In-memory ledger source.
//!
//! Backs the CLI's `--snapshot` option and every test in the workspace. A
//! snapshot is a JSON document:
//!
//! ```json
//! {
//!   "database_id": "DB1",
//!   "tables": [{
//!     "schema": "BANK", "name": "LEDGER",
//!     "columns": [{"name": "ID", "data_type": "NUMBER", "internal_column_id": 1}],
//!     "rows": [{"instance_id": 1, "chain_id": 0, "sequence_no": 1,
//!               "hash": "…", "values": {"ID": {"hex": "c102"}, "NOTE": null}}]
//!   }]
//! }
//! ```

use crate::LedgerSource;
use ledgercheck_core::{
    io_error, normalize_identifier, CatalogEntry, ChainEntry, ColumnDescriptor, ColumnType,
    ColumnValue, LedgerError, LedgerResult, LedgerTarget, RowKey, RowValues, StorageError,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

// ============================================================================
// SNAPSHOT FORMAT
// ============================================================================

/// A stored column value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoredValue {
    /// Character data, decoded.
    Text(String),
    /// Raw bytes as hex: the database's internal form for numbers, dates,
    /// raw and binary LOB columns.
    Hex(String),
}

impl StoredValue {
    pub fn text(value: impl Into<String>) -> Self {
        StoredValue::Text(value.into())
    }

    pub fn hex(bytes: impl AsRef<[u8]>) -> Self {
        StoredValue::Hex(hex::encode(bytes))
    }

    /// Convert to the value a driver would hand back for a column of
    /// `column_type`. Text stored for a non-character column is passed on
    /// as its UTF-8 bytes.
    pub fn to_column_value(&self, column: &str, column_type: &ColumnType) -> LedgerResult<ColumnValue> {
        match self {
            StoredValue::Text(text) if column_type.is_character_lob() => Ok(ColumnValue::clob(text)),
            StoredValue::Text(text) if column_type.is_character() => Ok(ColumnValue::text(text.clone())),
            StoredValue::Text(text) => Ok(ColumnValue::bytes(text.as_bytes())),
            StoredValue::Hex(raw) => {
                let bytes = hex::decode(raw).map_err(|e| StorageError::Serialization {
                    what: format!("column {}", column),
                    reason: e.to_string(),
                })?;
                if matches!(column_type, ColumnType::Blob) {
                    Ok(ColumnValue::blob(bytes))
                } else {
                    Ok(ColumnValue::bytes(bytes))
                }
            }
        }
    }
}

/// One stored row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowSnapshot {
    pub instance_id: u32,
    pub chain_id: u32,
    pub sequence_no: i64,
    pub hash: String,
    #[serde(default)]
    pub values: BTreeMap<String, Option<StoredValue>>,
}

impl RowSnapshot {
    pub fn key(&self) -> RowKey {
        RowKey::new(self.instance_id, self.chain_id, self.sequence_no)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub schema: String,
    pub name: String,
    pub columns: Vec<CatalogEntry>,
    #[serde(default)]
    pub rows: Vec<RowSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub database_id: String,
    #[serde(default)]
    pub tables: Vec<TableSnapshot>,
}

// ============================================================================
// IN-MEMORY LEDGER
// ============================================================================

#[derive(Debug, Clone, Default)]
struct TableData {
    columns: Vec<CatalogEntry>,
    rows: BTreeMap<RowKey, RowSnapshot>,
}

type TableKey = (String, String);

/// Thread-safe ledger held in memory.
#[derive(Debug)]
pub struct InMemoryLedger {
    database_id: String,
    tables: RwLock<HashMap<TableKey, TableData>>,
    fetched: Mutex<Vec<RowKey>>,
    failing: AtomicBool,
}

impl InMemoryLedger {
    pub fn new(database_id: impl Into<String>) -> Self {
        Self {
            database_id: database_id.into(),
            tables: RwLock::new(HashMap::new()),
            fetched: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn from_snapshot(snapshot: LedgerSnapshot) -> LedgerResult<Self> {
        let ledger = Self::new(snapshot.database_id);
        for table in snapshot.tables {
            ledger.create_table(&table.schema, &table.name, table.columns)?;
            for row in table.rows {
                ledger.insert_row(&table.schema, &table.name, row)?;
            }
        }
        Ok(ledger)
    }

    /// Load a JSON snapshot from disk.
    pub fn load(path: &Path) -> LedgerResult<Self> {
        let document = std::fs::read_to_string(path).map_err(|e| io_error(path, e))?;
        let snapshot: LedgerSnapshot =
            serde_json::from_str(&document).map_err(|e| StorageError::Serialization {
                what: format!("snapshot {}", path.display()),
                reason: e.to_string(),
            })?;
        let ledger = Self::from_snapshot(snapshot)?;
        tracing::info!(path = %path.display(), database_id = %ledger.database_id, "Loaded ledger snapshot");
        Ok(ledger)
    }

    pub fn to_snapshot(&self) -> LedgerResult<LedgerSnapshot> {
        let tables = self.read_tables()?;
        let mut out: Vec<TableSnapshot> = tables
            .iter()
            .map(|((schema, name), data)| TableSnapshot {
                schema: schema.clone(),
                name: name.clone(),
                columns: data.columns.clone(),
                rows: data.rows.values().cloned().collect(),
            })
            .collect();
        out.sort_by(|a, b| (&a.schema, &a.name).cmp(&(&b.schema, &b.name)));
        Ok(LedgerSnapshot {
            database_id: self.database_id.clone(),
            tables: out,
        })
    }

    /// Create or replace a table definition. Existing rows are kept.
    pub fn create_table(&self, schema: &str, table: &str, columns: Vec<CatalogEntry>) -> LedgerResult<()> {
        let key = table_key(schema, table)?;
        let mut tables = self.write_tables()?;
        tables.entry(key).or_default().columns = columns;
        Ok(())
    }

    /// Insert or replace a row.
    pub fn insert_row(&self, schema: &str, table: &str, row: RowSnapshot) -> LedgerResult<()> {
        let key = table_key(schema, table)?;
        let mut tables = self.write_tables()?;
        let data = tables.get_mut(&key).ok_or_else(|| unknown_table(schema, table))?;
        data.rows.insert(row.key(), row);
        Ok(())
    }

    pub fn delete_row(&self, schema: &str, table: &str, row_key: RowKey) -> LedgerResult<bool> {
        let key = table_key(schema, table)?;
        let mut tables = self.write_tables()?;
        let data = tables.get_mut(&key).ok_or_else(|| unknown_table(schema, table))?;
        Ok(data.rows.remove(&row_key).is_some())
    }

    /// Overwrite one column of an existing row without touching its hash.
    pub fn update_value(
        &self,
        schema: &str,
        table: &str,
        row_key: RowKey,
        column: &str,
        value: Option<StoredValue>,
    ) -> LedgerResult<()> {
        self.with_row(schema, table, row_key, |row| {
            row.values.insert(column.to_string(), value);
        })
    }

    pub fn set_stored_hash(&self, schema: &str, table: &str, row_key: RowKey, hash: &str) -> LedgerResult<()> {
        self.with_row(schema, table, row_key, |row| row.hash = hash.to_string())
    }

    /// Make every query fail, as if the connection dropped.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Rows fetched through [`LedgerSource::fetch_row`], in call order.
    pub fn fetched_rows(&self) -> Vec<RowKey> {
        self.fetched.lock().map(|f| f.clone()).unwrap_or_default()
    }

    pub fn clear_fetched(&self) {
        if let Ok(mut fetched) = self.fetched.lock() {
            fetched.clear();
        }
    }

    fn with_row(
        &self,
        schema: &str,
        table: &str,
        row_key: RowKey,
        apply: impl FnOnce(&mut RowSnapshot),
    ) -> LedgerResult<()> {
        let key = table_key(schema, table)?;
        let mut tables = self.write_tables()?;
        let row = tables
            .get_mut(&key)
            .and_then(|data| data.rows.get_mut(&row_key))
            .ok_or_else(|| StorageError::RowNotFound { row_key })?;
        apply(row);
        Ok(())
    }

    fn check_available(&self, operation: &str) -> LedgerResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::QueryFailed {
                operation: operation.to_string(),
                reason: "connection unavailable".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn read_tables(&self) -> LedgerResult<std::sync::RwLockReadGuard<'_, HashMap<TableKey, TableData>>> {
        self.tables
            .read()
            .map_err(|_| LedgerError::Storage(StorageError::LockPoisoned))
    }

    fn write_tables(&self) -> LedgerResult<std::sync::RwLockWriteGuard<'_, HashMap<TableKey, TableData>>> {
        self.tables
            .write()
            .map_err(|_| LedgerError::Storage(StorageError::LockPoisoned))
    }

    /// Run `read` against a table's rows. A missing table has no rows.
    fn with_table<T>(
        &self,
        operation: &str,
        target: &LedgerTarget,
        read: impl FnOnce(&TableData) -> T,
    ) -> LedgerResult<Option<T>> {
        self.check_available(operation)?;
        let tables = self.read_tables()?;
        Ok(tables
            .get(&(target.schema.clone(), target.table.clone()))
            .map(read))
    }
}

fn table_key(schema: &str, table: &str) -> LedgerResult<TableKey> {
    Ok((normalize_identifier(schema)?, normalize_identifier(table)?))
}

fn unknown_table(schema: &str, table: &str) -> LedgerError {
    StorageError::QueryFailed {
        operation: "insert".to_string(),
        reason: format!("table {}.{} does not exist", schema, table),
    }
    .into()
}

impl LedgerSource for InMemoryLedger {
    fn database_id(&self) -> LedgerResult<String> {
        self.check_available("database_id")?;
        Ok(self.database_id.clone())
    }

    fn catalog_columns(&self, schema: &str, table: &str) -> LedgerResult<Vec<CatalogEntry>> {
        self.check_available("catalog_columns")?;
        let tables = self.read_tables()?;
        Ok(tables
            .get(&(schema.to_string(), table.to_string()))
            .map(|data| data.columns.clone())
            .unwrap_or_default())
    }

    fn instance_ids(&self, target: &LedgerTarget) -> LedgerResult<Vec<u32>> {
        let ids = self.with_table("instance_ids", target, |data| {
            let mut ids: Vec<u32> = data.rows.keys().map(|k| k.instance_id).collect();
            ids.dedup();
            ids
        })?;
        Ok(ids.unwrap_or_default())
    }

    fn chain_ids(&self, target: &LedgerTarget, instance_id: u32) -> LedgerResult<Vec<u32>> {
        let ids = self.with_table("chain_ids", target, |data| {
            let mut ids: Vec<u32> = data
                .rows
                .keys()
                .filter(|k| k.instance_id == instance_id)
                .map(|k| k.chain_id)
                .collect();
            ids.dedup();
            ids
        })?;
        Ok(ids.unwrap_or_default())
    }

    fn chain_rows(
        &self,
        target: &LedgerTarget,
        instance_id: u32,
        chain_id: u32,
        after_sequence: i64,
    ) -> LedgerResult<Vec<ChainEntry>> {
        let rows = self.with_table("chain_rows", target, |data| {
            data.rows
                .values()
                .filter(|r| {
                    r.instance_id == instance_id && r.chain_id == chain_id && r.sequence_no > after_sequence
                })
                .map(|r| ChainEntry {
                    sequence_no: r.sequence_no,
                    stored_hash: r.hash.clone(),
                })
                .collect::<Vec<_>>()
        })?;
        Ok(rows.unwrap_or_default())
    }

    fn stored_hash(&self, target: &LedgerTarget, key: RowKey) -> LedgerResult<Option<String>> {
        let hash = self.with_table("stored_hash", target, |data| {
            data.rows.get(&key).map(|r| r.hash.clone())
        })?;
        Ok(hash.flatten())
    }

    fn fetch_row(
        &self,
        target: &LedgerTarget,
        key: RowKey,
        columns: &[ColumnDescriptor],
    ) -> LedgerResult<RowValues> {
        let row = self
            .with_table("fetch_row", target, |data| data.rows.get(&key).cloned())?
            .flatten()
            .ok_or_else(|| StorageError::RowNotFound { row_key: key })?;

        if let Ok(mut fetched) = self.fetched.lock() {
            fetched.push(key);
        }

        let mut values = RowValues::new();
        for column in columns {
            let value = match row.values.get(&column.name) {
                Some(Some(stored)) => stored.to_column_value(&column.name, &column.column_type)?,
                _ => ColumnValue::Null,
            };
            values.insert(column.name.clone(), value);
        }
        Ok(values)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ledgercheck_core::{read_to_vec, HASH_COLUMN};

    fn entry(name: &str, data_type: &str, id: u16) -> CatalogEntry {
        CatalogEntry {
            name: name.to_string(),
            data_type: data_type.to_string(),
            internal_column_id: id,
        }
    }

    fn row(inst: u32, chain: u32, seq: i64) -> RowSnapshot {
        let mut values = BTreeMap::new();
        values.insert("ID".to_string(), Some(StoredValue::hex([0xc1, seq as u8 + 1])));
        values.insert("NOTE".to_string(), None);
        RowSnapshot {
            instance_id: inst,
            chain_id: chain,
            sequence_no: seq,
            hash: format!("{:0128}", seq),
            values,
        }
    }

    fn ledger() -> InMemoryLedger {
        let ledger = InMemoryLedger::new("DB1");
        ledger
            .create_table(
                "bank",
                "ledger",
                vec![
                    entry("ID", "NUMBER", 1),
                    entry("NOTE", "VARCHAR2", 2),
                    entry(HASH_COLUMN, "RAW", 3),
                ],
            )
            .unwrap();
        for (inst, chain, seq) in [(2, 0, 2), (1, 3, 1), (1, 0, 1), (2, 0, 1), (1, 0, 2)] {
            ledger.insert_row("BANK", "LEDGER", row(inst, chain, seq)).unwrap();
        }
        ledger
    }

    fn target() -> LedgerTarget {
        LedgerTarget::new("BANK", "LEDGER", "DB1").unwrap()
    }

    #[test]
    fn test_ids_are_sorted_and_distinct() {
        let ledger = ledger();
        assert_eq!(ledger.instance_ids(&target()).unwrap(), vec![1, 2]);
        assert_eq!(ledger.chain_ids(&target(), 1).unwrap(), vec![0, 3]);
        assert!(ledger.chain_ids(&target(), 9).unwrap().is_empty());
    }

    #[test]
    fn test_chain_rows_after_checkpoint() {
        let ledger = ledger();
        let rows = ledger.chain_rows(&target(), 1, 0, 0).unwrap();
        assert_eq!(rows.iter().map(|r| r.sequence_no).collect::<Vec<_>>(), vec![1, 2]);
        let rows = ledger.chain_rows(&target(), 1, 0, 1).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sequence_no, 2);
    }

    #[test]
    fn test_fetch_row_converts_values() {
        let ledger = ledger();
        let columns: Vec<ColumnDescriptor> = [entry("ID", "NUMBER", 1), entry("NOTE", "VARCHAR2", 2)]
            .iter()
            .map(ColumnDescriptor::from_catalog)
            .collect();
        let mut values = ledger.fetch_row(&target(), RowKey::new(1, 0, 1), &columns).unwrap();
        assert_eq!(read_to_vec(values.take("ID")).unwrap(), Some(vec![0xc1, 0x02]));
        assert!(values.take("NOTE").is_null());
        assert_eq!(ledger.fetched_rows(), vec![RowKey::new(1, 0, 1)]);

        let err = ledger
            .fetch_row(&target(), RowKey::new(7, 0, 1), &columns)
            .unwrap_err();
        assert!(matches!(err, LedgerError::Storage(StorageError::RowNotFound { .. })));
    }

    #[test]
    fn test_stored_value_conversion_by_type() {
        let clob = StoredValue::text("abc")
            .to_column_value("C", &ColumnType::Clob)
            .unwrap();
        assert!(matches!(clob, ColumnValue::CharLob(_)));
        let blob = StoredValue::hex([1, 2, 3])
            .to_column_value("B", &ColumnType::Blob)
            .unwrap();
        assert!(matches!(blob, ColumnValue::BinaryLob { len: 3, .. }));
        let json = StoredValue::text("{}")
            .to_column_value("J", &ColumnType::Json)
            .unwrap();
        assert!(matches!(json, ColumnValue::Bytes(ref b) if b == b"{}"));
        assert!(StoredValue::Hex("zz".to_string())
            .to_column_value("X", &ColumnType::Raw)
            .is_err());
    }

    #[test]
    fn test_mutations() {
        let ledger = ledger();
        let key = RowKey::new(1, 0, 2);
        ledger
            .update_value("BANK", "LEDGER", key, "NOTE", Some(StoredValue::text("x")))
            .unwrap();
        ledger.set_stored_hash("BANK", "LEDGER", key, "ff").unwrap();
        assert_eq!(ledger.stored_hash(&target(), key).unwrap().as_deref(), Some("ff"));
        assert!(ledger.delete_row("BANK", "LEDGER", key).unwrap());
        assert_eq!(ledger.stored_hash(&target(), key).unwrap(), None);
        assert!(ledger
            .set_stored_hash("BANK", "LEDGER", key, "ff")
            .is_err());
    }

    #[test]
    fn test_failing_source() {
        let ledger = ledger();
        ledger.set_failing(true);
        let err = ledger.instance_ids(&target()).unwrap_err();
        assert!(matches!(err, LedgerError::Storage(StorageError::QueryFailed { .. })));
        ledger.set_failing(false);
        assert!(ledger.instance_ids(&target()).is_ok());
    }

    #[test]
    fn test_snapshot_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let snapshot = ledger().to_snapshot().unwrap();
        std::fs::write(&path, serde_json::to_string_pretty(&snapshot).unwrap()).unwrap();

        let loaded = InMemoryLedger::load(&path).unwrap();
        assert_eq!(loaded.to_snapshot().unwrap(), snapshot);
        assert_eq!(loaded.database_id().unwrap(), "DB1");
    }

    #[test]
    fn test_snapshot_value_shape() {
        let doc = r#"{"instance_id":1,"chain_id":0,"sequence_no":1,"hash":"aa",
                     "values":{"A":{"text":"x"},"B":{"hex":"0a"},"C":null}}"#;
        let row: RowSnapshot = serde_json::from_str(doc).unwrap();
        assert_eq!(row.values["A"], Some(StoredValue::text("x")));
        assert_eq!(row.values["B"], Some(StoredValue::hex([0x0a])));
        assert_eq!(row.values["C"], None);
    }
}
