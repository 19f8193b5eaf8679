//! Collaborators shared by every verification call.

use ledgercheck_anchor::AnchorClient;
use ledgercheck_core::{LedgerResult, LedgerTarget, VerifyConfig};
use ledgercheck_storage::{
    checkpoint_store_for, outcome_publisher_for, CheckpointStore, DisabledCheckpoints,
    EvidenceArchive, LedgerSource, NullPublisher, OutcomePublisher, SchemaCatalog,
};
use std::sync::Arc;

/// Everything a verification run needs, passed explicitly into each call.
#[derive(Clone)]
pub struct VerifierContext {
    pub source: Arc<dyn LedgerSource>,
    pub catalog: Arc<SchemaCatalog>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub publisher: Arc<dyn OutcomePublisher>,
    pub evidence: EvidenceArchive,
    pub config: VerifyConfig,
}

impl VerifierContext {
    /// Context with checkpoints and publishing switched off.
    pub fn new(source: Arc<dyn LedgerSource>, config: VerifyConfig) -> Self {
        Self {
            catalog: Arc::new(SchemaCatalog::new(Arc::clone(&source))),
            source,
            checkpoints: Arc::new(DisabledCheckpoints),
            publisher: Arc::new(NullPublisher),
            evidence: EvidenceArchive::from_config(&config),
            config,
        }
    }

    /// Context wired for `config.checkpoint_mode`.
    ///
    /// # Errors
    /// Configuration errors, including remote mode without an anchoring
    /// client.
    pub fn from_config(
        source: Arc<dyn LedgerSource>,
        config: VerifyConfig,
        anchor: Option<Arc<dyn AnchorClient>>,
    ) -> LedgerResult<Self> {
        config.validate()?;
        let checkpoints =
            checkpoint_store_for(config.checkpoint_mode, &config.state_dir, anchor.clone())?;
        let publisher = outcome_publisher_for(
            config.checkpoint_mode,
            &config.state_dir,
            config.log_rotate_bytes,
            anchor,
        )?;
        Ok(Self::new(source, config)
            .with_checkpoints(checkpoints)
            .with_publisher(publisher))
    }

    pub fn with_checkpoints(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn OutcomePublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn with_evidence(mut self, evidence: EvidenceArchive) -> Self {
        self.evidence = evidence;
        self
    }

    /// Resolve `schema.table` against the source's database identity.
    pub fn target(&self, schema: &str, table: &str) -> LedgerResult<LedgerTarget> {
        let database_id = self.source.database_id()?;
        Ok(LedgerTarget::new(schema, table, database_id)?)
    }
}

impl std::fmt::Debug for VerifierContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifierContext")
            .field("catalog", &self.catalog)
            .field("checkpoint_mode", &self.checkpoints.mode())
            .field("evidence", &self.evidence)
            .field("config", &self.config)
            .finish()
    }
}
