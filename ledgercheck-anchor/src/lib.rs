//! ledgercheck anchor
//!
//! Client side of the ledger-anchoring service. Verification outcomes,
//! checkpoints and individual row hashes can be written to an external
//! ledger so that a tampered database cannot also rewrite its own audit
//! trail. The service is reached through a REST proxy that forwards each call
//! to a chaincode function; [`AnchorClient`] is the seam the rest of the
//! workspace depends on.

pub mod config;
pub mod memory;
pub mod rest;
pub mod rows;

pub use config::{AnchorConfig, DEFAULT_TIMEOUT_MS};
pub use memory::InMemoryAnchor;
pub use rest::RestAnchorClient;
pub use rows::{failed_rows, publish_row_hash, read_row_hash, read_row_log, AnchoredLog};

use ledgercheck_core::LedgerResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Chaincode function names.
pub mod ops {
    pub const STORE_LOG: &str = "storeLog";
    pub const READ_LOG: &str = "readLog";
    pub const READ_METADATA: &str = "readMetadata";
    pub const WRITE_METADATA: &str = "writeMetadata";
    pub const FETCH_LAST_100: &str = "fetchLast100";
    pub const GET_FAILED_ROWS: &str = "getFailedRows";
    pub const STORE_HASH: &str = "storeHash";
    pub const READ_HASH: &str = "readHash";
}

/// Transaction id and nonce issued by the service for one write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionCredentials {
    pub txid: String,
    pub nonce: String,
}

/// Body of a chaincode call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChaincodeRequest {
    pub chaincode: String,
    /// Function name followed by its arguments.
    pub args: Vec<String>,
    pub timeout: u64,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<TransactionCredentials>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<bool>,
}

impl ChaincodeRequest {
    pub fn query(chaincode: &str, operation: &str, args: &[String], timeout: u64) -> Self {
        Self {
            chaincode: chaincode.to_string(),
            args: call_args(operation, args),
            timeout,
            credentials: None,
            sync: None,
        }
    }

    pub fn transaction(
        chaincode: &str,
        operation: &str,
        args: &[String],
        timeout: u64,
        credentials: TransactionCredentials,
    ) -> Self {
        Self {
            chaincode: chaincode.to_string(),
            args: call_args(operation, args),
            timeout,
            credentials: Some(credentials),
            sync: Some(true),
        }
    }
}

fn call_args(operation: &str, args: &[String]) -> Vec<String> {
    std::iter::once(operation.to_string())
        .chain(args.iter().cloned())
        .collect()
}

/// Envelope returned by the proxy.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChaincodeResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Ledger-anchoring service.
///
/// Implementations are blocking; callers run on threads where blocking is
/// allowed.
pub trait AnchorClient: Send + Sync {
    /// Obtain credentials for the next write.
    fn fetch_transaction_credentials(&self) -> LedgerResult<TransactionCredentials>;

    /// Submit a write. Returns the transaction id.
    fn invoke(&self, operation: &str, args: &[String]) -> LedgerResult<String>;

    /// Evaluate a read. An empty payload is returned as `Value::Null`.
    fn query(&self, operation: &str, args: &[String]) -> LedgerResult<Value>;
}

/// Normalize a raw payload: the proxy reports "nothing stored" as an empty
/// string, and JSON documents may arrive as strings.
pub fn decode_payload(payload: Option<Value>) -> Value {
    match payload {
        None => Value::Null,
        Some(Value::String(s)) if s.is_empty() => Value::Null,
        Some(Value::String(s)) if looks_like_document(&s) => {
            serde_json::from_str(&s).unwrap_or(Value::String(s))
        }
        Some(other) => other,
    }
}

fn looks_like_document(s: &str) -> bool {
    let s = s.trim_start();
    s.starts_with('{') || s.starts_with('[')
}
