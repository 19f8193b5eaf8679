//! Row-level anchoring calls: publishing a row hash, reading it back and
//! inspecting anchored verification logs.

use crate::{ops, AnchorClient};
use ledgercheck_core::{AnchorError, LedgerResult, LedgerTarget, RowKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A verification outcome as recorded by the anchoring service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchoredLog {
    pub instance_id: u32,
    pub chain_id: u32,
    pub sequence_no: i64,
    pub result: bool,
    pub got_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_hash: Option<String>,
}

fn row_args(target: &LedgerTarget, key: RowKey) -> Vec<String> {
    vec![
        target.schema.clone(),
        target.table.clone(),
        key.instance_id.to_string(),
        key.chain_id.to_string(),
        key.sequence_no.to_string(),
    ]
}

/// Anchor the stored hash of a row. Returns the transaction id.
pub fn publish_row_hash(
    client: &dyn AnchorClient,
    target: &LedgerTarget,
    key: RowKey,
    hash: &str,
) -> LedgerResult<String> {
    let mut args = row_args(target, key);
    args.push(hash.to_string());
    let txid = client.invoke(ops::STORE_HASH, &args)?;
    tracing::info!(table = %target, row = %key, txid = %txid, "Row hash anchored");
    Ok(txid)
}

/// Read a previously anchored row hash.
pub fn read_row_hash(
    client: &dyn AnchorClient,
    target: &LedgerTarget,
    key: RowKey,
) -> LedgerResult<Option<String>> {
    match client.query(ops::READ_HASH, &row_args(target, key))? {
        Value::Null => Ok(None),
        Value::String(hash) => Ok(Some(hash)),
        other => Err(AnchorError::InvalidResponse {
            operation: ops::READ_HASH.to_string(),
            reason: format!("expected a hash string, got {}", other),
        }
        .into()),
    }
}

/// Read the anchored verification log of one row.
pub fn read_row_log(
    client: &dyn AnchorClient,
    target: &LedgerTarget,
    key: RowKey,
) -> LedgerResult<Option<AnchoredLog>> {
    let args = vec![
        target.schema.clone(),
        target.table.clone(),
        target.database_id.clone(),
        key.instance_id.to_string(),
        key.chain_id.to_string(),
        key.sequence_no.to_string(),
    ];
    match client.query(ops::READ_LOG, &args)? {
        Value::Null => Ok(None),
        value => parse(ops::READ_LOG, value).map(Some),
    }
}

/// Most recent anchored failures for a table, oldest first.
pub fn failed_rows(
    client: &dyn AnchorClient,
    target: &LedgerTarget,
    limit: Option<usize>,
) -> LedgerResult<Vec<AnchoredLog>> {
    let mut args = vec![
        target.schema.clone(),
        target.table.clone(),
        target.database_id.clone(),
    ];
    if let Some(limit) = limit {
        args.push(limit.to_string());
    }
    match client.query(ops::GET_FAILED_ROWS, &args)? {
        Value::Null => Ok(Vec::new()),
        value => parse(ops::GET_FAILED_ROWS, value),
    }
}

fn parse<T: serde::de::DeserializeOwned>(operation: &str, value: Value) -> LedgerResult<T> {
    serde_json::from_value(value).map_err(|e| {
        AnchorError::InvalidResponse {
            operation: operation.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}
