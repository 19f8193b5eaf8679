//! Anchoring service endpoint configuration.

use ledgercheck_core::{io_error, ConfigError, LedgerResult};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;

/// Default chaincode call timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 18_000;

/// Endpoint file contents.
#[derive(Debug, Clone, Deserialize)]
struct EndpointFile {
    rest_server_url: String,
    rest_server_port: u16,
    channel_id: String,
    chaincode_name: String,
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default)]
    scheme: Option<String>,
}

/// Everything needed to reach the anchoring REST proxy.
#[derive(Clone)]
pub struct AnchorConfig {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub channel_id: String,
    pub chaincode_name: String,
    pub timeout_ms: u64,
    pub username: String,
    pub password: SecretString,
}

impl AnchorConfig {
    /// Parse an endpoint file. Credentials come from the environment.
    ///
    /// ```toml
    /// rest_server_url = "anchor.example.com"
    /// rest_server_port = 7443
    /// channel_id = "default"
    /// chaincode_name = "ledgercheck"
    /// ```
    pub fn from_toml_str(contents: &str) -> LedgerResult<Self> {
        let file: EndpointFile = toml::from_str(contents).map_err(|e| ConfigError::InvalidValue {
            field: "anchor_config".to_string(),
            value: String::new(),
            reason: e.to_string(),
        })?;

        let (username, password) = credentials_from_env()?;
        let config = Self {
            scheme: file.scheme.unwrap_or_else(|| "https".to_string()),
            host: file.rest_server_url,
            port: file.rest_server_port,
            channel_id: file.channel_id,
            chaincode_name: file.chaincode_name,
            timeout_ms: file.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
            username,
            password,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| io_error(path, e))?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> LedgerResult<()> {
        let required = [
            ("rest_server_url", &self.host),
            ("channel_id", &self.channel_id),
            ("chaincode_name", &self.chaincode_name),
            ("username", &self.username),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingRequired {
                    field: field.to_string(),
                }
                .into());
            }
        }
        if self.scheme != "https" && self.scheme != "http" {
            return Err(ConfigError::InvalidValue {
                field: "scheme".to_string(),
                value: self.scheme.clone(),
                reason: "expected https or http".to_string(),
            }
            .into());
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rest_server_port".to_string(),
                value: "0".to_string(),
                reason: "must be a valid port".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// URL of a proxy endpoint on the configured channel.
    pub fn endpoint(&self, operation: &str) -> String {
        format!(
            "{}://{}:{}/restproxy/api/v2/channels/{}/{}",
            self.scheme, self.host, self.port, self.channel_id, operation
        )
    }
}

impl std::fmt::Debug for AnchorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnchorConfig")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("channel_id", &self.channel_id)
            .field("chaincode_name", &self.chaincode_name)
            .field("timeout_ms", &self.timeout_ms)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Read `LEDGERCHECK_ANCHOR_USERNAME` and `LEDGERCHECK_ANCHOR_PASSWORD`.
fn credentials_from_env() -> LedgerResult<(String, SecretString)> {
    let username = std::env::var("LEDGERCHECK_ANCHOR_USERNAME").map_err(|_| {
        ConfigError::MissingRequired {
            field: "LEDGERCHECK_ANCHOR_USERNAME".to_string(),
        }
    })?;
    let password = std::env::var("LEDGERCHECK_ANCHOR_PASSWORD").map_err(|_| {
        ConfigError::MissingRequired {
            field: "LEDGERCHECK_ANCHOR_PASSWORD".to_string(),
        }
    })?;
    Ok((username, SecretString::from(password)))
}

#[cfg(test)]
pub(crate) fn test_config(scheme: &str, host: &str, port: u16) -> AnchorConfig {
    AnchorConfig {
        scheme: scheme.to_string(),
        host: host.to_string(),
        port,
        channel_id: "default".to_string(),
        chaincode_name: "ledgercheck".to_string(),
        timeout_ms: DEFAULT_TIMEOUT_MS,
        username: "auditor".to_string(),
        password: SecretString::from("s3cret".to_string()),
    }
}
