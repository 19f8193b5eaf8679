//! Results of one verification run.

use chrono::{DateTime, Utc};
use ledgercheck_core::{IntegrityError, LedgerError, RunStats};
use serde::Serialize;
use std::collections::BTreeMap;

/// A chain aborted by a structural violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityFailure {
    pub instance_id: u32,
    pub chain_id: u32,
    pub message: String,
    #[serde(skip)]
    pub error: IntegrityError,
}

/// A scope abandoned because of a storage or validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeFailure {
    pub scope: String,
    pub message: String,
    #[serde(skip)]
    pub error: LedgerError,
}

/// Per-chain, per-instance and global counters for one run, plus every
/// violation and failure met on the way.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub target: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(serialize_with = "serialize_chains")]
    pub chains: BTreeMap<(u32, u32), RunStats>,
    pub instances: BTreeMap<u32, RunStats>,
    pub global: RunStats,
    pub integrity_failures: Vec<IntegrityFailure>,
    pub scope_failures: Vec<ScopeFailure>,
}

fn serialize_chains<S: serde::Serializer>(
    chains: &BTreeMap<(u32, u32), RunStats>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    use serde::ser::SerializeMap;
    let mut map = serializer.serialize_map(Some(chains.len()))?;
    for ((instance_id, chain_id), stats) in chains {
        map.serialize_entry(&format!("{}/{}", instance_id, chain_id), stats)?;
    }
    map.end()
}

impl RunReport {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            started_at: Utc::now(),
            finished_at: None,
            chains: BTreeMap::new(),
            instances: BTreeMap::new(),
            global: RunStats::default(),
            integrity_failures: Vec::new(),
            scope_failures: Vec::new(),
        }
    }

    /// Fold the counters of one walked chain into every level.
    pub fn record_chain(&mut self, instance_id: u32, chain_id: u32, stats: RunStats) {
        self.chains.entry((instance_id, chain_id)).or_default().merge(stats);
        self.instances.entry(instance_id).or_default().merge(stats);
        self.global.merge(stats);
    }

    pub fn record_integrity(&mut self, instance_id: u32, chain_id: u32, error: IntegrityError) {
        self.integrity_failures.push(IntegrityFailure {
            instance_id,
            chain_id,
            message: error.to_string(),
            error,
        });
    }

    pub fn record_scope_failure(&mut self, scope: impl Into<String>, error: LedgerError) {
        self.scope_failures.push(ScopeFailure {
            scope: scope.into(),
            message: error.to_string(),
            error,
        });
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn chain_stats(&self, instance_id: u32, chain_id: u32) -> RunStats {
        self.chains
            .get(&(instance_id, chain_id))
            .copied()
            .unwrap_or_default()
    }

    pub fn instance_stats(&self, instance_id: u32) -> RunStats {
        self.instances.get(&instance_id).copied().unwrap_or_default()
    }

    pub fn has_integrity_failures(&self) -> bool {
        !self.integrity_failures.is_empty()
    }

    /// No mismatches, no violations and no abandoned scopes.
    pub fn is_clean(&self) -> bool {
        self.global.fail_count == 0 && self.integrity_failures.is_empty() && self.scope_failures.is_empty()
    }
}
