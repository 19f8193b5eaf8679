//! One verification run over a scope.

use crate::context::VerifierContext;
use crate::report::RunReport;
use crate::verifier::{RowVerdict, TableVerifier};
use ledgercheck_core::{LedgerError, LedgerResult, LedgerTarget, RunStats, VerifyScope};

/// Verify `scope` of `target` once.
///
/// Loads the checkpoint, walks the scope, saves the checkpoint and lets the
/// publisher close the run. Single-row runs leave checkpoints alone.
///
/// # Errors
/// Schema errors, failures to load or save the checkpoint, and failures to
/// list the instances or chains the scope names. Failures below the scope
/// are recorded in the returned report instead.
pub fn run_once(ctx: &VerifierContext, target: &LedgerTarget, scope: &VerifyScope) -> LedgerResult<RunReport> {
    let mut verifier = TableVerifier::new(ctx, target.clone())?;
    let mut report = RunReport::new(target.to_string());

    tracing::info!(table = %target, scope = ?scope, mode = %ctx.checkpoints.mode(), "Verification run started");

    match scope {
        VerifyScope::Row(key) => match verifier.verify_row(*key) {
            Ok(verdict) => {
                let mut stats = RunStats::default();
                stats.record(verdict.is_success());
                report.record_chain(key.instance_id, key.chain_id, stats);
                if let RowVerdict::Hashed(outcome) = &verdict {
                    tracing::info!(row = %key, success = outcome.success, "Row verified");
                }
            }
            Err(LedgerError::Integrity(e)) => {
                tracing::error!(row = %key, error = %e, "Row integrity violated");
                report.record_integrity(key.instance_id, key.chain_id, e);
            }
            Err(e) => return Err(e),
        },
        VerifyScope::Table | VerifyScope::Instance { .. } | VerifyScope::Chain { .. } => {
            let mut checkpoint = ctx.checkpoints.load(target)?;
            match scope {
                VerifyScope::Instance { instance_id } => {
                    verifier.verify_instance(*instance_id, &mut checkpoint, &mut report)?;
                }
                VerifyScope::Chain {
                    instance_id,
                    chain_id,
                } => {
                    verifier.verify_chain_into(*instance_id, *chain_id, &mut checkpoint, &mut report);
                }
                _ => {
                    verifier.verify_table(&mut checkpoint, &mut report)?;
                }
            }
            ctx.checkpoints.save(target, &checkpoint)?;
        }
    }

    if let Err(e) = ctx.publisher.finish_run(target) {
        tracing::warn!(table = %target, error = %e, "Could not close outcome log");
    }
    report.finish();

    tracing::info!(
        table = %target,
        success = report.global.success_count,
        failed = report.global.fail_count,
        integrity_failures = report.integrity_failures.len(),
        scope_failures = report.scope_failures.len(),
        "Verification run finished"
    );
    Ok(report)
}
