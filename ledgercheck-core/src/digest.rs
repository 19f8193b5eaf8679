//! SHA-512 row digests and stored-hash normalization.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::fmt;

/// Digest length in bytes.
pub const DIGEST_LEN: usize = 64;
/// Digest length in hex characters.
pub const DIGEST_HEX_LEN: usize = DIGEST_LEN * 2;

/// A 64-byte row digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RowHash([u8; DIGEST_LEN]);

impl RowHash {
    /// Linkage value used by the first row of every chain.
    pub const ZERO: RowHash = RowHash([0u8; DIGEST_LEN]);

    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Digest of a canonical row buffer.
    pub fn compute(canonical: &[u8]) -> Self {
        let mut bytes = [0u8; DIGEST_LEN];
        bytes.copy_from_slice(&Sha512::digest(canonical));
        Self(bytes)
    }

    /// Parse a hash in the stored hex form: any case, surrounding whitespace
    /// allowed, leading zeros possibly dropped.
    pub fn parse(stored: &str) -> Result<Self, ValidationError> {
        let normalized = normalize_stored_hash(stored)?;
        let mut bytes = [0u8; DIGEST_LEN];
        hex::decode_to_slice(&normalized, &mut bytes).map_err(|e| {
            ValidationError::InvalidHash {
                value: stored.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// 128 lowercase hex characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for RowHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RowHash({})", self.to_hex())
    }
}

impl fmt::Display for RowHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl TryFrom<String> for RowHash {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RowHash::parse(&value)
    }
}

impl From<RowHash> for String {
    fn from(value: RowHash) -> Self {
        value.to_hex()
    }
}

/// Lowercase a stored hash and left-pad it with zeros to 128 characters.
pub fn normalize_stored_hash(stored: &str) -> Result<String, ValidationError> {
    let trimmed = stored.trim();
    let invalid = |reason: String| ValidationError::InvalidHash {
        value: stored.to_string(),
        reason,
    };

    if trimmed.is_empty() {
        return Err(invalid("empty".to_string()));
    }
    if trimmed.len() > DIGEST_HEX_LEN {
        return Err(invalid(format!(
            "{} hex characters, expected at most {}",
            trimmed.len(),
            DIGEST_HEX_LEN
        )));
    }
    if let Some(c) = trimmed.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(invalid(format!("non-hex character {:?}", c)));
    }

    Ok(format!(
        "{:0>width$}",
        trimmed.to_ascii_lowercase(),
        width = DIGEST_HEX_LEN
    ))
}

/// Compare a computed digest against a stored hash string.
///
/// A stored value that is not a valid hash never matches.
pub fn matches_stored(computed: &RowHash, stored: &str) -> bool {
    normalize_stored_hash(stored)
        .map(|normalized| normalized == computed.to_hex())
        .unwrap_or(false)
}

// ============================================================================
// TESTS
// ============================================================================
