//! Periodic verification.
//!
//! The first run starts immediately. In continuous mode further runs follow
//! at a fixed interval until the shutdown signal flips to `true`. Runs never
//! overlap: a tick that arrives while a run is still active is skipped.
//!
//! ```ignore
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let scheduler = Scheduler::new(ctx, target, VerifyScope::Table, schedule)?;
//! let handle = tokio::spawn(scheduler.run(shutdown_rx));
//!
//! // Later
//! let _ = shutdown_tx.send(true);
//! let last = handle.await??;
//! ```

use crate::context::VerifierContext;
use crate::report::RunReport;
use crate::run::run_once;
use ledgercheck_core::{LedgerResult, LedgerTarget, ScheduleConfig, VerifyScope};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

// ============================================================================
// METRICS
// ============================================================================

#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    pub runs_started: AtomicU64,
    pub runs_completed: AtomicU64,
    /// Ticks that found a run still active.
    pub runs_skipped: AtomicU64,
    pub runs_failed: AtomicU64,
    /// Rows counted as verified across all completed runs.
    pub rows_verified: AtomicU64,
    pub rows_failed: AtomicU64,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            runs_started: self.runs_started.load(Ordering::Relaxed),
            runs_completed: self.runs_completed.load(Ordering::Relaxed),
            runs_skipped: self.runs_skipped.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            rows_verified: self.rows_verified.load(Ordering::Relaxed),
            rows_failed: self.rows_failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSnapshot {
    pub runs_started: u64,
    pub runs_completed: u64,
    pub runs_skipped: u64,
    pub runs_failed: u64,
    pub rows_verified: u64,
    pub rows_failed: u64,
}

// ============================================================================
// SCHEDULER
// ============================================================================

/// Clears the single-flight flag when a run ends, panics included.
struct ActiveRun(Arc<AtomicBool>);

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

type LastRun = Arc<Mutex<Option<LedgerResult<RunReport>>>>;

pub struct Scheduler {
    ctx: Arc<VerifierContext>,
    target: LedgerTarget,
    scope: VerifyScope,
    config: ScheduleConfig,
    active: Arc<AtomicBool>,
    metrics: Arc<SchedulerMetrics>,
    last: LastRun,
}

impl Scheduler {
    /// # Errors
    /// `ConfigError` when `config` cannot be scheduled for `scope`.
    pub fn new(
        ctx: Arc<VerifierContext>,
        target: LedgerTarget,
        scope: VerifyScope,
        config: ScheduleConfig,
    ) -> LedgerResult<Self> {
        config.validate(&scope)?;
        Ok(Self {
            ctx,
            target,
            scope,
            config,
            active: Arc::new(AtomicBool::new(false)),
            metrics: Arc::new(SchedulerMetrics::new()),
            last: Arc::new(Mutex::new(None)),
        })
    }

    pub fn metrics(&self) -> Arc<SchedulerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Drive runs until done.
    ///
    /// Returns the result of the last completed run, or `Ok(None)` when
    /// shutdown arrived before any run completed. An active run is always
    /// allowed to finish.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) -> LedgerResult<Option<RunReport>> {
        tracing::info!(
            table = %self.target,
            continuous = self.config.continuous,
            interval_secs = self.config.interval.as_secs(),
            "Verification scheduler started"
        );

        if !self.config.continuous {
            if let Some(handle) = self.try_start() {
                await_run(handle).await;
            }
            return self.take_last();
        }

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<()>> = None;
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        tracing::info!(table = %self.target, "Verification scheduler shutting down");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    if let Some(handle) = self.try_start() {
                        in_flight = Some(handle);
                    }
                }
            }
        }

        if let Some(handle) = in_flight {
            await_run(handle).await;
        }

        let snapshot = self.metrics.snapshot();
        tracing::info!(
            runs_started = snapshot.runs_started,
            runs_completed = snapshot.runs_completed,
            runs_skipped = snapshot.runs_skipped,
            runs_failed = snapshot.runs_failed,
            rows_verified = snapshot.rows_verified,
            rows_failed = snapshot.rows_failed,
            "Verification scheduler stopped"
        );
        self.take_last()
    }

    /// Start a run on the blocking pool unless one is already active.
    fn try_start(&self) -> Option<JoinHandle<()>> {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.metrics.runs_skipped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(table = %self.target, "Previous run still active, tick skipped");
            return None;
        }
        let run = self.metrics.runs_started.fetch_add(1, Ordering::Relaxed) + 1;

        let guard = ActiveRun(Arc::clone(&self.active));
        let ctx = Arc::clone(&self.ctx);
        let target = self.target.clone();
        let scope = self.scope;
        let metrics = Arc::clone(&self.metrics);
        let last = Arc::clone(&self.last);

        Some(tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let result = run_once(&ctx, &target, &scope);
            match &result {
                Ok(report) => {
                    metrics.runs_completed.fetch_add(1, Ordering::Relaxed);
                    metrics
                        .rows_verified
                        .fetch_add(report.global.success_count, Ordering::Relaxed);
                    metrics
                        .rows_failed
                        .fetch_add(report.global.fail_count, Ordering::Relaxed);
                    tracing::info!(
                        table = %target,
                        run,
                        verified = report.global.success_count,
                        failed = report.global.fail_count,
                        integrity_failures = report.integrity_failures.len(),
                        scope_failures = report.scope_failures.len(),
                        clean = report.is_clean(),
                        "Scheduled run completed"
                    );
                }
                Err(e) => {
                    metrics.runs_failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(table = %target, error = %e, "Verification run failed");
                }
            }
            if let Ok(mut slot) = last.lock() {
                *slot = Some(result);
            }
        }))
    }

    fn take_last(&self) -> LedgerResult<Option<RunReport>> {
        let taken = self.last.lock().ok().and_then(|mut slot| slot.take());
        taken.transpose()
    }
}

async fn await_run(handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        tracing::error!(error = %e, "Verification run panicked");
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("target", &self.target)
            .field("scope", &self.scope)
            .field("config", &self.config)
            .field("active", &self.active.load(Ordering::Relaxed))
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ledgercheck_core::{LedgerError, RowKey, VerifyConfig};
    use ledgercheck_test_utils::assertions::assert_config_error;
    use ledgercheck_test_utils::LedgerFixture;
    use std::time::Duration;

    fn context() -> Arc<VerifierContext> {
        let ledger = LedgerFixture::new("DB1", "BANK", "LEDGER")
            .number_column("AMOUNT")
            .chain(1, 0, 3)
            .build()
            .unwrap();
        Arc::new(VerifierContext::new(Arc::new(ledger), VerifyConfig::default()))
    }

    fn target() -> LedgerTarget {
        LedgerTarget::new("BANK", "LEDGER", "DB1").unwrap()
    }

    #[test]
    fn test_continuous_single_row_rejected() {
        let config = ScheduleConfig {
            continuous: true,
            ..ScheduleConfig::default()
        };
        let err = Scheduler::new(context(), target(), VerifyScope::Row(RowKey::new(1, 0, 1)), config)
            .unwrap_err();
        assert!(matches!(err, LedgerError::Config(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_one_shot_returns_report() {
        let scheduler =
            Scheduler::new(context(), target(), VerifyScope::Table, ScheduleConfig::default()).unwrap();
        let metrics = scheduler.metrics();
        let (_tx, rx) = watch::channel(false);

        let report = scheduler.run(rx).await.unwrap().unwrap();
        assert_eq!(report.global.success_count, 3);
        assert_eq!(metrics.snapshot().runs_started, 1);
        assert_eq!(metrics.snapshot().runs_completed, 1);
        assert_eq!(metrics.snapshot().rows_verified, 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_one_shot_ignores_zero_interval() {
        let config = ScheduleConfig {
            continuous: false,
            interval: Duration::ZERO,
        };
        let scheduler = Scheduler::new(context(), target(), VerifyScope::Table, config).unwrap();
        let (_tx, rx) = watch::channel(false);

        let report = scheduler.run(rx).await.unwrap().unwrap();
        assert_eq!(report.global.success_count, 3);
    }

    #[test]
    fn test_continuous_zero_interval_rejected() {
        let config = ScheduleConfig {
            continuous: true,
            interval: Duration::ZERO,
        };
        let result = Scheduler::new(context(), target(), VerifyScope::Table, config);
        assert_config_error(&result);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_continuous_until_shutdown() {
        let config = ScheduleConfig {
            continuous: true,
            interval: Duration::from_millis(10),
        };
        let scheduler = Scheduler::new(context(), target(), VerifyScope::Table, config).unwrap();
        let metrics = scheduler.metrics();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();

        let report = handle.await.unwrap().unwrap().unwrap();
        assert_eq!(report.global.success_count, 3);
        let snapshot = metrics.snapshot();
        assert!(snapshot.runs_started >= 2);
        assert_eq!(snapshot.runs_failed, 0);
        // Every completed run is accounted for, not just the last one.
        assert_eq!(snapshot.rows_verified, 3 * snapshot.runs_completed);
        assert_eq!(snapshot.rows_failed, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_tick_skipped_while_active() {
        let scheduler =
            Scheduler::new(context(), target(), VerifyScope::Table, ScheduleConfig::default()).unwrap();
        scheduler.active.store(true, Ordering::Release);
        assert!(scheduler.try_start().is_none());
        assert_eq!(scheduler.metrics.snapshot().runs_skipped, 1);

        scheduler.active.store(false, Ordering::Release);
        let handle = scheduler.try_start().unwrap();
        handle.await.unwrap();
        assert!(!scheduler.active.load(Ordering::Acquire));
        assert_eq!(scheduler.metrics.snapshot().runs_started, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_run_is_reported() {
        let ctx = context();
        let scheduler = Scheduler::new(
            ctx,
            LedgerTarget::new("BANK", "NOPE", "DB1").unwrap(),
            VerifyScope::Table,
            ScheduleConfig::default(),
        )
        .unwrap();
        let metrics = scheduler.metrics();
        let (_tx, rx) = watch::channel(false);
        assert!(scheduler.run(rx).await.is_err());
        assert_eq!(metrics.snapshot().runs_failed, 1);
    }
}
