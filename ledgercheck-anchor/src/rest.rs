//! REST proxy client for the anchoring service.

use crate::config::AnchorConfig;
use crate::{decode_payload, AnchorClient, ChaincodeRequest, ChaincodeResponse, TransactionCredentials};
use ledgercheck_core::{AnchorError, LedgerResult};
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use serde_json::Value;
use std::time::Duration;
use tokio::runtime::Handle;

const TRANSACTION_ID: &str = "transaction-id";
const TRANSACTIONS: &str = "transactions";
const CHAINCODE_QUERIES: &str = "chaincode-queries";

/// Blocking facade over an async `reqwest` client.
///
/// Requests are driven on `runtime` with `Handle::block_on`, so methods must
/// be called from outside async tasks (e.g. inside `spawn_blocking`).
pub struct RestAnchorClient {
    client: Client,
    config: AnchorConfig,
    runtime: Handle,
}

impl RestAnchorClient {
    pub fn new(config: AnchorConfig, runtime: Handle) -> LedgerResult<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms + 5_000))
            .build()
            .map_err(|e| request_failed("client", 0, format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            config,
            runtime,
        })
    }

    async fn credentials(&self) -> LedgerResult<TransactionCredentials> {
        let response = self
            .client
            .get(self.config.endpoint(TRANSACTION_ID))
            .basic_auth(&self.config.username, Some(self.config.password.expose_secret()))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| request_failed(TRANSACTION_ID, 0, format!("HTTP request failed: {}", e)))?;

        let result = read_result(TRANSACTION_ID, response, StatusCode::OK).await?;
        serde_json::from_value(result).map_err(|e| invalid_response(TRANSACTION_ID, e.to_string()))
    }

    async fn call(
        &self,
        endpoint: &str,
        operation: &str,
        body: &ChaincodeRequest,
        expected: StatusCode,
    ) -> LedgerResult<Value> {
        tracing::debug!(endpoint, operation, "Anchor request");
        let response = self
            .client
            .post(self.config.endpoint(endpoint))
            .basic_auth(&self.config.username, Some(self.config.password.expose_secret()))
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| request_failed(operation, 0, format!("HTTP request failed: {}", e)))?;

        read_result(operation, response, expected).await
    }

    async fn invoke_async(&self, operation: &str, args: &[String]) -> LedgerResult<String> {
        let credentials = self.credentials().await?;
        let body = ChaincodeRequest::transaction(
            &self.config.chaincode_name,
            operation,
            args,
            self.config.timeout_ms,
            credentials,
        );
        let result = self
            .call(TRANSACTIONS, operation, &body, StatusCode::CREATED)
            .await?;
        let txid = result
            .get("txid")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid_response(operation, "missing result.txid".to_string()))?;
        tracing::debug!(operation, txid, "Anchor transaction committed");
        Ok(txid.to_string())
    }

    async fn query_async(&self, operation: &str, args: &[String]) -> LedgerResult<Value> {
        let body = ChaincodeRequest::query(
            &self.config.chaincode_name,
            operation,
            args,
            self.config.timeout_ms,
        );
        let mut result = self
            .call(CHAINCODE_QUERIES, operation, &body, StatusCode::OK)
            .await?;
        Ok(decode_payload(result.get_mut("payload").map(Value::take)))
    }
}

impl AnchorClient for RestAnchorClient {
    fn fetch_transaction_credentials(&self) -> LedgerResult<TransactionCredentials> {
        self.runtime.block_on(self.credentials())
    }

    fn invoke(&self, operation: &str, args: &[String]) -> LedgerResult<String> {
        self.runtime.block_on(self.invoke_async(operation, args))
    }

    fn query(&self, operation: &str, args: &[String]) -> LedgerResult<Value> {
        self.runtime.block_on(self.query_async(operation, args))
    }
}

impl std::fmt::Debug for RestAnchorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestAnchorClient")
            .field("config", &self.config)
            .finish()
    }
}

/// Check the status and unwrap the `result` member of the envelope.
async fn read_result(
    operation: &str,
    response: reqwest::Response,
    expected: StatusCode,
) -> LedgerResult<Value> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| invalid_response(operation, format!("Failed to read body: {}", e)))?;

    if status != expected {
        let message = serde_json::from_str::<ChaincodeResponse>(&text)
            .ok()
            .and_then(|r| r.error)
            .unwrap_or(text);
        return Err(request_failed(operation, status.as_u16(), message));
    }

    let envelope: ChaincodeResponse = serde_json::from_str(&text)
        .map_err(|e| invalid_response(operation, format!("Failed to parse response: {}", e)))?;
    envelope
        .result
        .ok_or_else(|| invalid_response(operation, "missing result".to_string()))
}

fn request_failed(operation: &str, status: u16, message: String) -> ledgercheck_core::LedgerError {
    AnchorError::RequestFailed {
        operation: operation.to_string(),
        status,
        message,
    }
    .into()
}

fn invalid_response(operation: &str, reason: String) -> ledgercheck_core::LedgerError {
    AnchorError::InvalidResponse {
        operation: operation.to_string(),
        reason,
    }
    .into()
}

// ============================================================================
// TESTS
// ============================================================================
