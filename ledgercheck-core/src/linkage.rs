//! Per-chain linkage state and sequence validation.

use crate::digest::RowHash;
use crate::error::{IntegrityError, SequenceFault};
use crate::RowKey;

/// Linkage between a row and its predecessor within one chain.
///
/// Values are immutable; the chain walk threads a fresh one into each row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HashLinkage {
    /// Stored hash of the preceding row, when it is known.
    pub previous_hash: Option<RowHash>,
    /// Stored hash of the row most recently walked in this chain.
    pub current_hash: Option<RowHash>,
    /// Whether the preceding row is present in storage.
    pub previous_row_exists: bool,
}

impl HashLinkage {
    /// State before any row of the chain has been walked.
    pub fn awaiting_first_row() -> Self {
        Self::default()
    }

    /// Linkage for a row whose predecessor hash was resolved elsewhere.
    pub fn linked_to(previous_hash: Option<RowHash>) -> Self {
        Self {
            previous_hash,
            current_hash: None,
            previous_row_exists: previous_hash.is_some(),
        }
    }

    /// Linkage for the row after `self`'s row, whose stored hash is `stored`.
    pub fn advance(self, stored: RowHash) -> Self {
        Self {
            previous_hash: self.previous_hash,
            current_hash: Some(stored),
            previous_row_exists: self.previous_row_exists,
        }
    }

    /// Hash cached from the previously walked row, if any.
    pub fn cached_previous(&self) -> Option<RowHash> {
        self.current_hash
    }

    /// The 64 bytes closing the canonical form of `row_key`.
    pub fn block_for(&self, row_key: RowKey) -> Result<RowHash, IntegrityError> {
        if row_key.sequence_no == 1 {
            return Ok(RowHash::ZERO);
        }
        self.previous_hash
            .ok_or(IntegrityError::MissingLinkage { row_key })
    }
}

/// Check that `row_key` may follow `previous` in its chain.
///
/// The first row of a walk (no previous) only has to be positive.
pub fn check_sequence(previous: Option<i64>, row_key: RowKey) -> Result<(), IntegrityError> {
    let current = row_key.sequence_no;
    if current <= 0 {
        return Err(IntegrityError::SequenceViolation {
            row_key,
            previous: previous.unwrap_or(0),
            fault: SequenceFault::NonPositive,
        });
    }
    let Some(previous) = previous else {
        return Ok(());
    };

    let fault = if current == previous {
        Some(SequenceFault::Duplicate)
    } else if current < previous {
        Some(SequenceFault::Regression)
    } else if current - previous != 1 {
        Some(SequenceFault::Gap)
    } else {
        None
    };

    match fault {
        Some(fault) => Err(IntegrityError::SequenceViolation {
            row_key,
            previous,
            fault,
        }),
        None => Ok(()),
    }
}

// ============================================================================
// TESTS
// ============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_only_successor_is_accepted(prev in 1i64..1_000_000, curr in -10i64..1_000_010) {
            let result = check_sequence(Some(prev), RowKey::new(0, 0, curr));
            prop_assert_eq!(result.is_ok(), curr == prev + 1);
        }
    }
}
