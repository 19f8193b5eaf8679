//! Property-based tests for chain verification.
//!
//! - A ledger nobody touched verifies clean, whatever its shape and values.
//! - Editing one row fails exactly that row; its successors still link.
//! - Resuming from a checkpoint verifies exactly the rows above it.
//! - Saved progress only ever moves forward.

use ledgercheck_core::{
    CheckpointMode, ColumnType, LedgerTarget, RowKey, VerifyConfig, VerifyScope, CHAINS_PER_INSTANCE,
};
use ledgercheck_storage::{CheckpointStore, FileCheckpointStore, InMemoryLedger, StoredValue};
use ledgercheck_test_utils::assertions::assert_storage_error;
use ledgercheck_test_utils::generators::{
    arb_chain_shape, arb_checkpoint, arb_declared_type, arb_row_key, arb_value_for,
};
use ledgercheck_test_utils::LedgerFixture;
use ledgercheck_verify::{run_once, TableVerifier, VerifierContext};
use proptest::prelude::*;
use std::sync::Arc;

// ============================================================================
// STRATEGIES
// ============================================================================

fn target() -> LedgerTarget {
    LedgerTarget::new("BANK", "LEDGER", "DB1").unwrap()
}

/// A fixture with a random column list and chain shape.
fn arb_fixture() -> impl Strategy<Value = (LedgerFixture, Vec<(u32, u32, i64)>)> {
    (prop::collection::vec(arb_declared_type(), 1..6), arb_chain_shape()).prop_map(
        |(types, shape)| {
            let mut fixture = LedgerFixture::new("DB1", "BANK", "LEDGER");
            for (i, declared) in types.iter().enumerate() {
                fixture = fixture.column(&format!("C{}", i + 1), declared);
            }
            for (instance_id, chain_id, len) in &shape {
                fixture = fixture.chain(*instance_id, *chain_id, *len);
            }
            (fixture, shape)
        },
    )
}

/// One chain whose rows all carry random values for a column of `declared`.
fn arb_single_column_chain() -> impl Strategy<Value = (&'static str, Vec<Option<StoredValue>>)> {
    arb_declared_type().prop_flat_map(|declared| {
        let values = prop::collection::vec(arb_value_for(ColumnType::parse(declared)), 1..6);
        (Just(declared), values)
    })
}

// ============================================================================
// PROPERTIES
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_untouched_ledger_verifies_clean((fixture, shape) in arb_fixture()) {
        let ledger = Arc::new(fixture.build().unwrap());
        let ctx = VerifierContext::new(ledger, VerifyConfig::default());
        let report = run_once(&ctx, &target(), &VerifyScope::Table).unwrap();

        let expected: i64 = shape.iter().map(|(_, _, len)| len).sum();
        prop_assert!(report.is_clean());
        prop_assert_eq!(report.global.success_count, expected as u64);
    }

    #[test]
    fn prop_random_values_verify((declared, values) in arb_single_column_chain()) {
        let mut fixture = LedgerFixture::new("DB1", "BANK", "LEDGER").column("V", declared);
        for (i, value) in values.iter().enumerate() {
            fixture = fixture.set(RowKey::new(1, 0, i as i64 + 1), "V", value.clone());
        }
        let ledger = Arc::new(fixture.build().unwrap());
        let ctx = VerifierContext::new(ledger, VerifyConfig::default());
        let report = run_once(&ctx, &target(), &VerifyScope::Table).unwrap();

        prop_assert!(report.is_clean(), "declared {}: {:?}", declared, report);
        prop_assert_eq!(report.global.success_count, values.len() as u64);
    }

    #[test]
    fn prop_edit_fails_exactly_one_row(len in 1i64..8, edited in 1i64..8) {
        let edited = edited.min(len);
        let ledger = Arc::new(
            LedgerFixture::new("DB1", "BANK", "LEDGER")
                .number_column("AMOUNT")
                .varchar_column("NOTE")
                .chain(1, 0, len)
                .build()
                .unwrap(),
        );
        ledger
            .update_value(
                "BANK",
                "LEDGER",
                RowKey::new(1, 0, edited),
                "NOTE",
                Some(StoredValue::text("tampered")),
            )
            .unwrap();

        let ctx = VerifierContext::new(ledger, VerifyConfig::default());
        let report = run_once(&ctx, &target(), &VerifyScope::Table).unwrap();
        prop_assert_eq!(report.global.fail_count, 1);
        prop_assert_eq!(report.global.success_count, (len - 1) as u64);
        prop_assert!(report.integrity_failures.is_empty());
    }

    #[test]
    fn prop_checkpoint_resume_counts_rows_above(len in 1i64..10, done in 0i64..10) {
        let done = done.min(len);
        let ledger = Arc::new(
            LedgerFixture::new("DB1", "BANK", "LEDGER")
                .number_column("AMOUNT")
                .chain(2, 3, len)
                .build()
                .unwrap(),
        );
        let ctx = VerifierContext::new(Arc::<InMemoryLedger>::clone(&ledger), VerifyConfig::default());
        let mut verifier = TableVerifier::new(&ctx, target()).unwrap();
        let mut checkpoint = ledgercheck_core::Checkpoint::new();
        checkpoint.set(2, 3, done);

        let stats = verifier.verify_chain(2, 3, &mut checkpoint).unwrap();
        prop_assert_eq!(stats.success_count, (len - done) as u64);
        prop_assert_eq!(checkpoint.get(2, 3), len);
        prop_assert_eq!(ledger.fetched_rows().len() as i64, len - done);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_saved_progress_only_moves_forward(saved in arb_checkpoint()) {
        let ledger = Arc::new(
            LedgerFixture::new("DB1", "BANK", "LEDGER")
                .number_column("AMOUNT")
                .chain(1, 0, 5)
                .chain(2, 3, 4)
                .build()
                .unwrap(),
        );
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store.save(&target(), &saved).unwrap();

        let config = VerifyConfig {
            checkpoint_mode: CheckpointMode::Local,
            state_dir: dir.path().to_path_buf(),
            ..VerifyConfig::default()
        };
        let ctx = VerifierContext::from_config(ledger, config, None).unwrap();
        let report = run_once(&ctx, &target(), &VerifyScope::Table).unwrap();
        prop_assert!(report.is_clean());

        let after = store.load(&target()).unwrap();
        for instance_id in 0..4 {
            for chain_id in 0..CHAINS_PER_INSTANCE as u32 {
                let len = match (instance_id, chain_id) {
                    (1, 0) => 5,
                    (2, 3) => 4,
                    _ => 0,
                };
                prop_assert_eq!(
                    after.get(instance_id, chain_id),
                    saved.get(instance_id, chain_id).max(len)
                );
            }
        }
    }

    #[test]
    fn prop_row_outside_ledger_is_not_found(key in arb_row_key()) {
        prop_assume!(!(key.instance_id == 1 && key.chain_id == 0 && key.sequence_no <= 3));
        let ledger = Arc::new(
            LedgerFixture::new("DB1", "BANK", "LEDGER")
                .number_column("AMOUNT")
                .chain(1, 0, 3)
                .build()
                .unwrap(),
        );
        let ctx = VerifierContext::new(ledger, VerifyConfig::default());
        let mut verifier = TableVerifier::new(&ctx, target()).unwrap();
        assert_storage_error(&verifier.verify_row(key));
    }
}
