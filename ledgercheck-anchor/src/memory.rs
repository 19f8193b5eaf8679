//! In-process stand-in for the anchoring chaincode.

use crate::rows::AnchoredLog;
use crate::{ops, AnchorClient, TransactionCredentials};
use ledgercheck_core::{AnchorError, LedgerError, LedgerResult, StorageError};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

const LAST_LOGS_KEPT: usize = 100;

type TableKey = (String, String, String);
type RowLogKey = (String, String, String, u32, u32, i64);
type RowHashKey = (String, String, u32, u32, i64);

#[derive(Debug, Default)]
struct AnchorState {
    metadata: HashMap<TableKey, String>,
    logs: HashMap<RowLogKey, AnchoredLog>,
    failed: HashMap<TableKey, Vec<AnchoredLog>>,
    recent: HashMap<TableKey, VecDeque<AnchoredLog>>,
    hashes: HashMap<RowHashKey, String>,
    calls: Vec<Vec<String>>,
}

/// Emulates the chaincode functions against in-memory maps.
#[derive(Debug, Default)]
pub struct InMemoryAnchor {
    state: RwLock<AnchorState>,
    next_tx: AtomicU64,
    unavailable: AtomicBool,
}

impl InMemoryAnchor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the service were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Every call received so far, function name first.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.state
            .read()
            .map(|s| s.calls.clone())
            .unwrap_or_default()
    }

    pub fn calls_to(&self, operation: &str) -> usize {
        self.calls().iter().filter(|c| c[0] == operation).count()
    }

    fn check_available(&self, operation: &str) -> LedgerResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AnchorError::RequestFailed {
                operation: operation.to_string(),
                status: 503,
                message: "service unavailable".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn record(&self, state: &mut AnchorState, operation: &str, args: &[String]) {
        let mut call = vec![operation.to_string()];
        call.extend(args.iter().cloned());
        state.calls.push(call);
    }

    fn write_state(&self) -> LedgerResult<std::sync::RwLockWriteGuard<'_, AnchorState>> {
        self.state
            .write()
            .map_err(|_| LedgerError::Storage(StorageError::LockPoisoned))
    }
}

fn arity(operation: &str, args: &[String], min: usize, max: usize) -> LedgerResult<()> {
    if args.len() < min || args.len() > max {
        return Err(AnchorError::RequestFailed {
            operation: operation.to_string(),
            status: 400,
            message: format!(
                "Incorrect number of arguments. Expecting {}-{}, got {}",
                min,
                max,
                args.len()
            ),
        }
        .into());
    }
    Ok(())
}

fn numeric<T: std::str::FromStr>(operation: &str, field: &str, raw: &str) -> LedgerResult<T> {
    raw.parse().map_err(|_| {
        AnchorError::RequestFailed {
            operation: operation.to_string(),
            status: 400,
            message: format!("{} must be a numeric string. GOT : {}", field, raw),
        }
        .into()
    })
}

fn table_key(args: &[String]) -> TableKey {
    (args[0].clone(), args[1].clone(), args[2].clone())
}

impl AnchorClient for InMemoryAnchor {
    fn fetch_transaction_credentials(&self) -> LedgerResult<TransactionCredentials> {
        self.check_available("transaction-id")?;
        let n = self.next_tx.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TransactionCredentials {
            txid: format!("tx-{}", n),
            nonce: format!("nonce-{}", n),
        })
    }

    fn invoke(&self, operation: &str, args: &[String]) -> LedgerResult<String> {
        let credentials = self.fetch_transaction_credentials()?;
        let mut state = self.write_state()?;
        self.record(&mut state, operation, args);

        match operation {
            ops::WRITE_METADATA => {
                arity(operation, args, 4, 4)?;
                state.metadata.insert(table_key(args), args[3].clone());
            }
            ops::STORE_LOG => {
                arity(operation, args, 8, 9)?;
                let success = match args[6].as_str() {
                    "true" => true,
                    "false" => false,
                    other => {
                        return Err(AnchorError::RequestFailed {
                            operation: operation.to_string(),
                            status: 400,
                            message: format!("verification result must be true or false, got {}", other),
                        }
                        .into())
                    }
                };
                let log = AnchoredLog {
                    instance_id: numeric(operation, "instance id", &args[3])?,
                    chain_id: numeric(operation, "chain id", &args[4])?,
                    sequence_no: numeric(operation, "sequence no", &args[5])?,
                    result: success,
                    got_hash: args[7].clone(),
                    expected_hash: if success { None } else { args.get(8).cloned() },
                };
                let key = table_key(args);
                if !success {
                    state.failed.entry(key.clone()).or_default().push(log.clone());
                }
                let recent = state.recent.entry(key.clone()).or_default();
                if recent.len() >= LAST_LOGS_KEPT {
                    recent.pop_front();
                }
                recent.push_back(log.clone());
                state.logs.insert(
                    (key.0, key.1, key.2, log.instance_id, log.chain_id, log.sequence_no),
                    log,
                );
            }
            ops::STORE_HASH => {
                arity(operation, args, 6, 6)?;
                let key = (
                    args[0].clone(),
                    args[1].clone(),
                    numeric(operation, "instance id", &args[2])?,
                    numeric(operation, "chain id", &args[3])?,
                    numeric(operation, "sequence no", &args[4])?,
                );
                state.hashes.insert(key, args[5].clone());
            }
            other => {
                return Err(AnchorError::RequestFailed {
                    operation: other.to_string(),
                    status: 400,
                    message: format!("Received unknown function {} invocation", other),
                }
                .into())
            }
        }

        Ok(credentials.txid)
    }

    fn query(&self, operation: &str, args: &[String]) -> LedgerResult<Value> {
        self.check_available(operation)?;
        let mut state = self.write_state()?;
        self.record(&mut state, operation, args);

        let to_value = |log: &AnchoredLog| serde_json::to_value(log).unwrap_or(Value::Null);

        match operation {
            ops::READ_METADATA => {
                arity(operation, args, 3, 3)?;
                Ok(state
                    .metadata
                    .get(&table_key(args))
                    .and_then(|doc| serde_json::from_str(doc).ok())
                    .unwrap_or(Value::Null))
            }
            ops::READ_LOG => {
                arity(operation, args, 6, 6)?;
                let key = (
                    args[0].clone(),
                    args[1].clone(),
                    args[2].clone(),
                    numeric(operation, "instance id", &args[3])?,
                    numeric(operation, "chain id", &args[4])?,
                    numeric(operation, "sequence no", &args[5])?,
                );
                Ok(state.logs.get(&key).map(to_value).unwrap_or(Value::Null))
            }
            ops::GET_FAILED_ROWS => {
                arity(operation, args, 3, 4)?;
                let failed = state.failed.get(&table_key(args)).cloned().unwrap_or_default();
                let limit = match args.get(3) {
                    Some(raw) => numeric::<usize>(operation, "limit", raw)?,
                    None => failed.len(),
                };
                let skip = failed.len().saturating_sub(limit);
                Ok(Value::Array(failed[skip..].iter().map(to_value).collect()))
            }
            ops::FETCH_LAST_100 => {
                arity(operation, args, 3, 3)?;
                Ok(Value::Array(
                    state
                        .recent
                        .get(&table_key(args))
                        .map(|r| r.iter().map(to_value).collect())
                        .unwrap_or_default(),
                ))
            }
            ops::READ_HASH => {
                arity(operation, args, 5, 5)?;
                let key = (
                    args[0].clone(),
                    args[1].clone(),
                    numeric(operation, "instance id", &args[2])?,
                    numeric(operation, "chain id", &args[3])?,
                    numeric(operation, "sequence no", &args[4])?,
                );
                Ok(state
                    .hashes
                    .get(&key)
                    .map(|h| Value::String(h.clone()))
                    .unwrap_or(Value::Null))
            }
            other => Err(AnchorError::RequestFailed {
                operation: other.to_string(),
                status: 400,
                message: format!("Received unknown function {} invocation", other),
            }
            .into()),
        }
    }
}
