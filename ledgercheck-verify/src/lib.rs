//! ledgercheck verify
//!
//! Walks the hash chains of a ledger table and checks every row against
//! its stored hash. [`run_once`] verifies a scope a single time;
//! [`Scheduler`] repeats it at a fixed interval without ever overlapping
//! runs.

pub mod context;
pub mod report;
pub mod run;
pub mod scheduler;
pub mod verifier;

pub use context::VerifierContext;
pub use report::{IntegrityFailure, RunReport, ScopeFailure};
pub use run::run_once;
pub use scheduler::{Scheduler, SchedulerMetrics, SchedulerSnapshot};
pub use verifier::{ChainAborted, RowVerdict, TableVerifier};
