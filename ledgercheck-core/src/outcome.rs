//! Per-row verification results and run counters.

use crate::digest::RowHash;
use crate::RowKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of hashing one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub row_key: RowKey,
    pub success: bool,
    pub computed_hash: RowHash,
    /// Stored hash, kept only when it did not match.
    pub expected_hash: Option<String>,
    pub verified_at: DateTime<Utc>,
}

impl VerificationOutcome {
    pub fn verified(row_key: RowKey, computed_hash: RowHash) -> Self {
        Self {
            row_key,
            success: true,
            computed_hash,
            expected_hash: None,
            verified_at: Utc::now(),
        }
    }

    pub fn mismatch(row_key: RowKey, computed_hash: RowHash, expected_hash: impl Into<String>) -> Self {
        Self {
            row_key,
            success: false,
            computed_hash,
            expected_hash: Some(expected_hash.into()),
            verified_at: Utc::now(),
        }
    }
}

/// Success and failure counts for a chain, an instance or a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub success_count: u64,
    pub fail_count: u64,
}

impl RunStats {
    pub fn record(&mut self, success: bool) {
        if success {
            self.success_count += 1;
        } else {
            self.fail_count += 1;
        }
    }

    pub fn merge(&mut self, other: RunStats) {
        self.success_count += other.success_count;
        self.fail_count += other.fail_count;
    }

    pub fn total(&self) -> u64 {
        self.success_count + self.fail_count
    }

    pub fn all_verified(&self) -> bool {
        self.fail_count == 0
    }
}
