//! Checkpoint persistence.

use crate::paths::sanitize_file_name;
use ledgercheck_anchor::{ops, AnchorClient};
use ledgercheck_core::{
    io_error, AnchorError, Checkpoint, CheckpointMode, ConfigError, LedgerResult, LedgerTarget,
    StorageError,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Durable storage for per-table verification progress.
pub trait CheckpointStore: Send + Sync {
    fn mode(&self) -> CheckpointMode;

    /// Persisted checkpoint, empty when nothing was saved yet.
    fn load(&self, target: &LedgerTarget) -> LedgerResult<Checkpoint>;

    fn save(&self, target: &LedgerTarget, checkpoint: &Checkpoint) -> LedgerResult<()>;
}

/// Checkpoints switched off: every run starts from the beginning.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledCheckpoints;

impl CheckpointStore for DisabledCheckpoints {
    fn mode(&self) -> CheckpointMode {
        CheckpointMode::Off
    }

    fn load(&self, _target: &LedgerTarget) -> LedgerResult<Checkpoint> {
        Ok(Checkpoint::new())
    }

    fn save(&self, _target: &LedgerTarget, _checkpoint: &Checkpoint) -> LedgerResult<()> {
        Ok(())
    }
}

// ============================================================================
// LOCAL FILES
// ============================================================================

/// One JSON document per table in the state directory.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, target: &LedgerTarget) -> PathBuf {
        self.dir
            .join(sanitize_file_name(&format!("{}.json", target.stem())))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn mode(&self) -> CheckpointMode {
        CheckpointMode::Local
    }

    fn load(&self, target: &LedgerTarget) -> LedgerResult<Checkpoint> {
        let path = self.path_for(target);
        let document = match std::fs::read_to_string(&path) {
            Ok(document) => document,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Checkpoint::new()),
            Err(e) => return Err(io_error(&path, e)),
        };
        Checkpoint::from_json(&document).map_err(|e| {
            StorageError::Serialization {
                what: format!("checkpoint {}", path.display()),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Written to a temporary file first and renamed into place.
    fn save(&self, target: &LedgerTarget, checkpoint: &Checkpoint) -> LedgerResult<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| io_error(&self.dir, e))?;
        let path = self.path_for(target);
        let document = checkpoint.to_json().map_err(|e| StorageError::Serialization {
            what: "checkpoint".to_string(),
            reason: e.to_string(),
        })?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, document).map_err(|e| io_error(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| io_error(&path, e))?;
        tracing::debug!(path = %path.display(), "Checkpoint saved");
        Ok(())
    }
}

// ============================================================================
// ANCHORING SERVICE
// ============================================================================

/// Checkpoints kept as table metadata on the anchoring service.
pub struct AnchorCheckpointStore {
    client: Arc<dyn AnchorClient>,
}

impl AnchorCheckpointStore {
    pub fn new(client: Arc<dyn AnchorClient>) -> Self {
        Self { client }
    }
}

fn metadata_args(target: &LedgerTarget) -> Vec<String> {
    vec![
        target.schema.clone(),
        target.table.clone(),
        target.database_id.clone(),
    ]
}

fn invalid_metadata(reason: impl ToString) -> AnchorError {
    AnchorError::InvalidResponse {
        operation: ops::READ_METADATA.to_string(),
        reason: reason.to_string(),
    }
}

impl CheckpointStore for AnchorCheckpointStore {
    fn mode(&self) -> CheckpointMode {
        CheckpointMode::Remote
    }

    fn load(&self, target: &LedgerTarget) -> LedgerResult<Checkpoint> {
        match self.client.query(ops::READ_METADATA, &metadata_args(target))? {
            Value::Null => Ok(Checkpoint::new()),
            Value::String(document) => {
                Checkpoint::from_json(&document).map_err(|e| invalid_metadata(e).into())
            }
            value => serde_json::from_value(value).map_err(|e| invalid_metadata(e).into()),
        }
    }

    fn save(&self, target: &LedgerTarget, checkpoint: &Checkpoint) -> LedgerResult<()> {
        let document = checkpoint.to_json().map_err(|e| StorageError::Serialization {
            what: "checkpoint".to_string(),
            reason: e.to_string(),
        })?;
        let mut args = metadata_args(target);
        args.push(document);
        let txid = self.client.invoke(ops::WRITE_METADATA, &args)?;
        tracing::debug!(table = %target, txid = %txid, "Checkpoint anchored");
        Ok(())
    }
}

impl std::fmt::Debug for AnchorCheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnchorCheckpointStore").finish_non_exhaustive()
    }
}

/// Store matching `mode`. Remote mode needs an anchoring client.
pub fn checkpoint_store_for(
    mode: CheckpointMode,
    state_dir: &Path,
    anchor: Option<Arc<dyn AnchorClient>>,
) -> LedgerResult<Arc<dyn CheckpointStore>> {
    match mode {
        CheckpointMode::Off => Ok(Arc::new(DisabledCheckpoints)),
        CheckpointMode::Local => Ok(Arc::new(FileCheckpointStore::new(state_dir))),
        CheckpointMode::Remote => {
            let client = anchor.ok_or_else(|| ConfigError::MissingRequired {
                field: "anchor configuration".to_string(),
            })?;
            Ok(Arc::new(AnchorCheckpointStore::new(client)))
        }
    }
}
