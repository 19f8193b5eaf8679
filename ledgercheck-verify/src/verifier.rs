//! Chain walking.
//!
//! A chain is walked in ascending sequence order. Every row is checked
//! against the one before it, canonicalized with the stored hash of its
//! predecessor as linkage, hashed and compared with its own stored hash.
//!
//! ```text
//! awaiting-first-row ──row──▶ verifying ──last row──▶ exhausted
//!                                 │
//!                     sequence violation: chain aborted
//! ```

use crate::context::VerifierContext;
use crate::report::RunReport;
use ledgercheck_core::{
    canonicalize_into, check_sequence, matches_stored, Checkpoint, HashLinkage, IntegrityError,
    LedgerError, LedgerResult, LedgerTarget, RowHash, RowKey, RunStats, StorageError, TableLayout,
    VerificationOutcome,
};
use std::sync::Arc;

/// Result of hashing one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowVerdict {
    /// The row was canonicalized and hashed.
    Hashed(VerificationOutcome),
    /// Not the first row of its chain and its predecessor is gone; linkage
    /// cannot be checked and the row counts as verified.
    ImplicitlyValid(RowKey),
}

impl RowVerdict {
    pub fn is_success(&self) -> bool {
        match self {
            RowVerdict::Hashed(outcome) => outcome.success,
            RowVerdict::ImplicitlyValid(_) => true,
        }
    }
}

/// A chain walk that stopped early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainAborted {
    /// Rows verified before the stop.
    pub stats: RunStats,
    pub error: LedgerError,
}

/// Verifies one ledger table.
///
/// Holds the canonical buffer reused across rows, so a verifier belongs to a
/// single run.
pub struct TableVerifier<'a> {
    ctx: &'a VerifierContext,
    target: LedgerTarget,
    layout: Arc<TableLayout>,
    buffer: Vec<u8>,
}

impl<'a> TableVerifier<'a> {
    /// Resolve the table layout.
    ///
    /// # Errors
    /// `SchemaError` when the table is not a ledger table.
    pub fn new(ctx: &'a VerifierContext, target: LedgerTarget) -> LedgerResult<Self> {
        let layout = ctx.catalog.layout(&target.schema, &target.table)?;
        Ok(Self {
            ctx,
            target,
            layout,
            buffer: Vec::with_capacity(512),
        })
    }

    pub fn target(&self) -> &LedgerTarget {
        &self.target
    }

    /// Verify a single row, taking its linkage from storage. Checkpoints are
    /// not consulted.
    pub fn verify_row(&mut self, key: RowKey) -> LedgerResult<RowVerdict> {
        check_sequence(None, key)?;
        let stored = self
            .ctx
            .source
            .stored_hash(&self.target, key)?
            .ok_or(StorageError::RowNotFound { row_key: key })?;

        let Some(linkage) = self.resolve_linkage(key, &HashLinkage::awaiting_first_row())? else {
            tracing::info!(row = %key, "Previous row absent, row treated as verified");
            return Ok(RowVerdict::ImplicitlyValid(key));
        };
        let outcome = self.hash_row(key, &linkage, &stored)?;
        self.publish(&outcome);
        Ok(RowVerdict::Hashed(outcome))
    }

    /// Walk one chain from just after its checkpoint.
    ///
    /// On success the checkpoint is advanced to the highest sequence walked.
    /// Integrity and storage errors abort the chain and leave its checkpoint
    /// untouched.
    pub fn verify_chain(
        &mut self,
        instance_id: u32,
        chain_id: u32,
        checkpoint: &mut Checkpoint,
    ) -> Result<RunStats, ChainAborted> {
        let mut stats = RunStats::default();
        match self.walk_chain(instance_id, chain_id, checkpoint, &mut stats) {
            Ok(()) => {
                tracing::info!(
                    table = %self.target,
                    instance_id,
                    chain_id,
                    success = stats.success_count,
                    failed = stats.fail_count,
                    "Chain verified"
                );
                Ok(stats)
            }
            Err(error) => Err(ChainAborted { stats, error }),
        }
    }

    fn walk_chain(
        &mut self,
        instance_id: u32,
        chain_id: u32,
        checkpoint: &mut Checkpoint,
        stats: &mut RunStats,
    ) -> LedgerResult<()> {
        let after = checkpoint.get(instance_id, chain_id);
        let rows = self
            .ctx
            .source
            .chain_rows(&self.target, instance_id, chain_id, after)?;

        let mut linkage = HashLinkage::awaiting_first_row();
        let mut previous_seq = (after > 0).then_some(after);

        for entry in rows {
            let key = RowKey::new(instance_id, chain_id, entry.sequence_no);
            check_sequence(previous_seq, key)?;
            previous_seq = Some(entry.sequence_no);

            let verdict = match self.resolve_linkage(key, &linkage)? {
                Some(link) => {
                    let outcome = self.hash_row(key, &link, &entry.stored_hash)?;
                    self.publish(&outcome);
                    linkage = link;
                    RowVerdict::Hashed(outcome)
                }
                None => {
                    tracing::info!(row = %key, "Previous row absent, row treated as verified");
                    linkage = HashLinkage::awaiting_first_row();
                    RowVerdict::ImplicitlyValid(key)
                }
            };
            stats.record(verdict.is_success());

            // A malformed stored hash leaves nothing to cache; the next row
            // re-reads it and fails on it.
            linkage = match RowHash::parse(&entry.stored_hash) {
                Ok(stored) => linkage.advance(stored),
                Err(_) => HashLinkage::awaiting_first_row(),
            };
        }

        if let Some(last) = previous_seq.filter(|&seq| seq > after) {
            checkpoint.set(instance_id, chain_id, last);
        }
        Ok(())
    }

    /// Walk every chain of an instance. A chain that aborts is recorded in
    /// `report` and does not stop its siblings.
    pub fn verify_instance(
        &mut self,
        instance_id: u32,
        checkpoint: &mut Checkpoint,
        report: &mut RunReport,
    ) -> LedgerResult<RunStats> {
        let chain_ids = self.ctx.source.chain_ids(&self.target, instance_id)?;
        let mut stats = RunStats::default();
        for chain_id in chain_ids {
            stats.merge(self.verify_chain_into(instance_id, chain_id, checkpoint, report));
        }
        tracing::info!(
            table = %self.target,
            instance_id,
            success = stats.success_count,
            failed = stats.fail_count,
            "Instance verified"
        );
        Ok(stats)
    }

    /// Walk every instance of the table.
    pub fn verify_table(&mut self, checkpoint: &mut Checkpoint, report: &mut RunReport) -> LedgerResult<RunStats> {
        let instance_ids = self.ctx.source.instance_ids(&self.target)?;
        let mut stats = RunStats::default();
        for instance_id in instance_ids {
            match self.verify_instance(instance_id, checkpoint, report) {
                Ok(instance_stats) => stats.merge(instance_stats),
                Err(e) => {
                    tracing::error!(table = %self.target, instance_id, error = %e, "Instance aborted");
                    report.record_scope_failure(format!("instance {}", instance_id), e);
                }
            }
        }
        Ok(stats)
    }

    /// Walk one chain, folding its counters and any failure into `report`.
    pub fn verify_chain_into(
        &mut self,
        instance_id: u32,
        chain_id: u32,
        checkpoint: &mut Checkpoint,
        report: &mut RunReport,
    ) -> RunStats {
        let aborted = match self.verify_chain(instance_id, chain_id, checkpoint) {
            Ok(stats) => {
                report.record_chain(instance_id, chain_id, stats);
                return stats;
            }
            Err(aborted) => aborted,
        };

        report.record_chain(instance_id, chain_id, aborted.stats);
        match aborted.error {
            LedgerError::Integrity(e) => {
                tracing::error!(
                    table = %self.target,
                    instance_id,
                    chain_id,
                    error = %e,
                    "Chain integrity violated, chain aborted"
                );
                report.record_integrity(instance_id, chain_id, e);
            }
            e => {
                tracing::error!(table = %self.target, instance_id, chain_id, error = %e, "Chain aborted");
                report.record_scope_failure(format!("instance {}, chain {}", instance_id, chain_id), e);
            }
        }
        aborted.stats
    }

    /// Linkage for `key` given the state left by the previous row of the
    /// walk. `None` when the predecessor is absent from storage.
    fn resolve_linkage(&self, key: RowKey, walked: &HashLinkage) -> LedgerResult<Option<HashLinkage>> {
        let Some(previous) = key.predecessor() else {
            return Ok(Some(HashLinkage::awaiting_first_row()));
        };
        if let Some(cached) = walked.cached_previous() {
            return Ok(Some(HashLinkage::linked_to(Some(cached))));
        }
        let Some(stored) = self.ctx.source.stored_hash(&self.target, previous)? else {
            return Ok(None);
        };
        let hash = RowHash::parse(&stored).map_err(|e| IntegrityError::MalformedStoredHash {
            row_key: previous,
            reason: e.to_string(),
        })?;
        Ok(Some(HashLinkage::linked_to(Some(hash))))
    }

    fn hash_row(&mut self, key: RowKey, linkage: &HashLinkage, stored: &str) -> LedgerResult<VerificationOutcome> {
        let values = self
            .ctx
            .source
            .fetch_row(&self.target, key, &self.layout.columns)?;
        canonicalize_into(key, &self.layout, values, linkage, &mut self.buffer)?;
        let computed = RowHash::compute(&self.buffer);

        if matches_stored(&computed, stored) {
            tracing::debug!(row = %key, "Hash verified");
            return Ok(VerificationOutcome::verified(key, computed));
        }

        tracing::warn!(
            table = %self.target,
            row = %key,
            expected = %stored,
            computed = %computed,
            "Hash mismatch"
        );
        if let Err(e) = self.ctx.evidence.preserve(&self.target, key, &self.buffer) {
            tracing::warn!(row = %key, error = %e, "Could not preserve failed row");
        }
        Ok(VerificationOutcome::mismatch(key, computed, stored))
    }

    fn publish(&self, outcome: &VerificationOutcome) {
        if let Err(e) = self.ctx.publisher.publish(&self.target, outcome) {
            tracing::warn!(row = %outcome.row_key, error = %e, "Could not publish outcome");
        }
    }
}

impl std::fmt::Debug for TableVerifier<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableVerifier")
            .field("target", &self.target)
            .field("columns", &self.layout.columns.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgercheck_core::{SequenceFault, StorageError, VerifyConfig};
    use ledgercheck_storage::{InMemoryLedger, StoredValue};
    use ledgercheck_test_utils::LedgerFixture;

    fn context(ledger: Arc<InMemoryLedger>) -> VerifierContext {
        VerifierContext::new(ledger, VerifyConfig::default())
    }

    fn target() -> LedgerTarget {
        LedgerTarget::new("BANK", "LEDGER", "DB1").unwrap()
    }

    fn fixture() -> LedgerFixture {
        LedgerFixture::new("DB1", "BANK", "LEDGER")
            .number_column("ID")
            .varchar_column("NOTE")
    }

    #[test]
    fn test_chain_all_verified() {
        let ledger = Arc::new(fixture().chain(1, 0, 4).build().unwrap());
        let ctx = context(ledger);
        let mut verifier = TableVerifier::new(&ctx, target()).unwrap();
        let mut checkpoint = Checkpoint::new();
        let stats = verifier.verify_chain(1, 0, &mut checkpoint).unwrap();
        assert_eq!(stats.success_count, 4);
        assert_eq!(stats.fail_count, 0);
        assert_eq!(checkpoint.get(1, 0), 4);
    }

    #[test]
    fn test_mutated_row_fails_only_itself() {
        let ledger = Arc::new(fixture().chain(1, 0, 3).build().unwrap());
        ledger
            .update_value("BANK", "LEDGER", RowKey::new(1, 0, 2), "NOTE", Some(StoredValue::text("edited")))
            .unwrap();
        let ctx = context(ledger);
        let mut verifier = TableVerifier::new(&ctx, target()).unwrap();
        let stats = verifier.verify_chain(1, 0, &mut Checkpoint::new()).unwrap();
        assert_eq!(stats.success_count, 2);
        assert_eq!(stats.fail_count, 1);
    }

    #[test]
    fn test_gap_aborts_chain_without_checkpoint() {
        let ledger = Arc::new(fixture().chain(1, 0, 4).build().unwrap());
        ledger.delete_row("BANK", "LEDGER", RowKey::new(1, 0, 3)).unwrap();
        let ctx = context(ledger);
        let mut verifier = TableVerifier::new(&ctx, target()).unwrap();
        let mut checkpoint = Checkpoint::new();
        let aborted = verifier.verify_chain(1, 0, &mut checkpoint).unwrap_err();
        assert!(matches!(
            aborted.error,
            LedgerError::Integrity(IntegrityError::SequenceViolation {
                fault: SequenceFault::Gap,
                previous: 2,
                ..
            })
        ));
        assert_eq!(aborted.stats.success_count, 2);
        assert_eq!(checkpoint.get(1, 0), 0);
    }

    #[test]
    fn test_missing_predecessor_is_implicitly_valid() {
        let ledger = Arc::new(fixture().chain(1, 0, 3).build().unwrap());
        ledger.delete_row("BANK", "LEDGER", RowKey::new(1, 0, 1)).unwrap();
        let ctx = context(Arc::clone(&ledger));
        let mut verifier = TableVerifier::new(&ctx, target()).unwrap();
        let stats = verifier.verify_chain(1, 0, &mut Checkpoint::new()).unwrap();
        assert_eq!(stats.success_count, 2);
        // Row 2 was never fetched; row 3 linked to row 2's stored hash.
        assert_eq!(ledger.fetched_rows(), vec![RowKey::new(1, 0, 3)]);
    }

    #[test]
    fn test_checkpoint_resumes_with_stored_linkage() {
        let ledger = Arc::new(fixture().chain(1, 0, 5).build().unwrap());
        let ctx = context(Arc::clone(&ledger));
        let mut verifier = TableVerifier::new(&ctx, target()).unwrap();
        let mut checkpoint = Checkpoint::new();
        checkpoint.set(1, 0, 3);

        let stats = verifier.verify_chain(1, 0, &mut checkpoint).unwrap();
        assert_eq!(stats.success_count, 2);
        assert_eq!(ledger.fetched_rows(), vec![RowKey::new(1, 0, 4), RowKey::new(1, 0, 5)]);
        assert_eq!(checkpoint.get(1, 0), 5);

        // Nothing new: nothing fetched, checkpoint unchanged.
        ledger.clear_fetched();
        let stats = verifier.verify_chain(1, 0, &mut checkpoint).unwrap();
        assert_eq!(stats.total(), 0);
        assert!(ledger.fetched_rows().is_empty());
    }

    #[test]
    fn test_malformed_previous_hash_is_fatal() {
        let ledger = Arc::new(fixture().chain(1, 0, 3).build().unwrap());
        ledger
            .set_stored_hash("BANK", "LEDGER", RowKey::new(1, 0, 1), "not-a-hash")
            .unwrap();
        let ctx = context(ledger);
        let mut verifier = TableVerifier::new(&ctx, target()).unwrap();
        let aborted = verifier.verify_chain(1, 0, &mut Checkpoint::new()).unwrap_err();
        assert!(matches!(
            aborted.error,
            LedgerError::Integrity(IntegrityError::MalformedStoredHash { row_key, .. })
                if row_key == RowKey::new(1, 0, 1)
        ));
    }

    #[test]
    fn test_single_row() {
        let ledger = Arc::new(fixture().chain(1, 0, 3).build().unwrap());
        let ctx = context(ledger);
        let mut verifier = TableVerifier::new(&ctx, target()).unwrap();

        let verdict = verifier.verify_row(RowKey::new(1, 0, 2)).unwrap();
        assert!(matches!(verdict, RowVerdict::Hashed(ref o) if o.success));

        let err = verifier.verify_row(RowKey::new(1, 0, 9)).unwrap_err();
        assert!(matches!(err, LedgerError::Storage(StorageError::RowNotFound { .. })));
    }

    #[test]
    fn test_preserves_failed_row_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(fixture().chain(1, 0, 2).build().unwrap());
        ledger
            .update_value("BANK", "LEDGER", RowKey::new(1, 0, 1), "NOTE", None)
            .unwrap();
        let ctx = context(ledger)
            .with_evidence(ledgercheck_storage::EvidenceArchive::new(dir.path(), "dat"));
        let mut verifier = TableVerifier::new(&ctx, target()).unwrap();
        let stats = verifier.verify_chain(1, 0, &mut Checkpoint::new()).unwrap();
        assert_eq!(stats.fail_count, 1);
        assert!(dir.path().join("BANK_LEDGER_DB1_bytesfile1_0_1.dat").exists());
    }
}
