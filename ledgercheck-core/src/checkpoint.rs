//! Highest verified sequence number per (instance, chain).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Chain slots allocated per instance.
pub const CHAINS_PER_INSTANCE: usize = 32;

/// Verification progress for one ledger table.
///
/// Serialized as `{ "<instance_id>": [seq_chain0, seq_chain1, ...] }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checkpoint {
    instances: BTreeMap<u32, Vec<i64>>,
}

impl Checkpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last verified sequence number, 0 when the chain was never verified.
    pub fn get(&self, instance_id: u32, chain_id: u32) -> i64 {
        self.instances
            .get(&instance_id)
            .and_then(|chains| chains.get(chain_id as usize))
            .copied()
            .unwrap_or(0)
    }

    /// Record progress. Values never move backwards.
    pub fn set(&mut self, instance_id: u32, chain_id: u32, sequence_no: i64) {
        let chains = self
            .instances
            .entry(instance_id)
            .or_insert_with(|| vec![0; CHAINS_PER_INSTANCE]);
        let slot = chain_id as usize;
        if slot >= chains.len() {
            chains.resize(slot + 1, 0);
        }
        chains[slot] = chains[slot].max(sequence_no);
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn instance_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.instances.keys().copied()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse the persisted document; a blank document is an empty checkpoint.
    pub fn from_json(document: &str) -> serde_json::Result<Self> {
        if document.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(document)
    }
}

// ============================================================================
// TESTS
// ============================================================================
