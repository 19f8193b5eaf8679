//! Subcommand implementations.

use crate::cli::{RowArgs, VerifyArgs};
use ledgercheck_anchor::{publish_row_hash, read_row_hash, AnchorClient, AnchorConfig, RestAnchorClient};
use ledgercheck_core::{
    AnchorError, CheckpointMode, ConfigError, LedgerError, LedgerResult, StorageError,
};
use ledgercheck_storage::{InMemoryLedger, LedgerSource};
use ledgercheck_verify::{RunReport, Scheduler, VerifierContext};
use std::path::Path;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;

/// Process exit status.
pub const EXIT_OK: i32 = 0;
pub const EXIT_VERIFICATION_FAILED: i32 = 1;

/// Map a fatal error to its exit status.
pub fn exit_code(error: &LedgerError) -> i32 {
    match error {
        LedgerError::Config(_) | LedgerError::Validation(_) => 2,
        LedgerError::Schema(_) => 3,
        LedgerError::Storage(_) | LedgerError::Anchor(_) => 4,
        LedgerError::Integrity(_) => EXIT_VERIFICATION_FAILED,
    }
}

fn load_source(snapshot: &Path) -> LedgerResult<Arc<dyn LedgerSource>> {
    let ledger = InMemoryLedger::load(snapshot)?;
    tracing::debug!(path = %snapshot.display(), "Ledger snapshot loaded");
    Ok(Arc::new(ledger))
}

fn load_anchor(path: &Path) -> LedgerResult<Arc<dyn AnchorClient>> {
    let config = AnchorConfig::from_file(path)?;
    tracing::info!(endpoint = %config.endpoint(""), "Anchoring service configured");
    Ok(Arc::new(RestAnchorClient::new(config, Handle::current())?))
}

// ============================================================================
// VERIFY
// ============================================================================

pub async fn verify(args: VerifyArgs) -> LedgerResult<i32> {
    let scope = args.scope()?;
    let schedule = args.schedule_config();
    schedule.validate(&scope)?;

    let anchor = match (&args.anchor_config, args.mode) {
        (Some(path), CheckpointMode::Remote) => Some(load_anchor(path)?),
        (None, CheckpointMode::Remote) => {
            return Err(ConfigError::MissingRequired {
                field: "anchor_config".to_string(),
            }
            .into())
        }
        _ => None,
    };

    let source = load_source(&args.snapshot)?;
    let ctx = VerifierContext::from_config(source, args.verify_config(), anchor)?;
    let target = ctx.target(&args.schema, &args.table)?;
    let scheduler = Scheduler::new(Arc::new(ctx), target, scope, schedule)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping after the current run");
            let _ = shutdown_tx.send(true);
        }
    });

    let Some(report) = scheduler.run(shutdown_rx).await? else {
        return Ok(EXIT_OK);
    };
    print_report(&report, args.json)?;
    Ok(if report.is_clean() {
        EXIT_OK
    } else {
        EXIT_VERIFICATION_FAILED
    })
}

fn print_report(report: &RunReport, json: bool) -> LedgerResult<()> {
    if json {
        let document = serde_json::to_string_pretty(report).map_err(|e| StorageError::Serialization {
            what: "report".to_string(),
            reason: e.to_string(),
        })?;
        println!("{}", document);
        return Ok(());
    }

    println!("Table {}", report.target);
    for ((instance_id, chain_id), stats) in &report.chains {
        println!(
            "  instance {:>3} chain {:>2}: {} verified, {} failed",
            instance_id, chain_id, stats.success_count, stats.fail_count
        );
    }
    for failure in &report.integrity_failures {
        println!(
            "  instance {:>3} chain {:>2}: ABORTED {}",
            failure.instance_id, failure.chain_id, failure.message
        );
    }
    for failure in &report.scope_failures {
        println!("  {}: NOT VERIFIED {}", failure.scope, failure.message);
    }
    println!(
        "Total: {} verified, {} failed",
        report.global.success_count, report.global.fail_count
    );
    Ok(())
}

// ============================================================================
// HASH ANCHORING
// ============================================================================

pub async fn publish_hash(args: RowArgs) -> LedgerResult<i32> {
    let source = load_source(&args.snapshot)?;
    let anchor = load_anchor(&args.anchor_config)?;
    let target = ledgercheck_core::LedgerTarget::new(&args.schema, &args.table, source.database_id()?)?;
    let key = args.row_key();

    let txid = blocking(move || {
        let stored = source
            .stored_hash(&target, key)?
            .ok_or(StorageError::RowNotFound { row_key: key })?;
        publish_row_hash(anchor.as_ref(), &target, key, &stored)
    })
    .await?;
    println!("{}", txid);
    Ok(EXIT_OK)
}

pub async fn read_hash(args: RowArgs) -> LedgerResult<i32> {
    let source = load_source(&args.snapshot)?;
    let anchor = load_anchor(&args.anchor_config)?;
    let target = ledgercheck_core::LedgerTarget::new(&args.schema, &args.table, source.database_id()?)?;
    let key = args.row_key();

    match blocking(move || read_row_hash(anchor.as_ref(), &target, key)).await? {
        Some(hash) => {
            println!("{}", hash);
            Ok(EXIT_OK)
        }
        None => {
            tracing::warn!(row = %key, "No anchored hash for row");
            Ok(EXIT_VERIFICATION_FAILED)
        }
    }
}

/// Anchor calls block on the runtime, so they run off the async workers.
async fn blocking<T, F>(f: F) -> LedgerResult<T>
where
    F: FnOnce() -> LedgerResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        LedgerError::from(AnchorError::RequestFailed {
            operation: "blocking task".to_string(),
            status: 0,
            message: e.to_string(),
        })
    })?
}
