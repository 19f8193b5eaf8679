//! Outcome publishing.
//!
//! Each verified row produces one [`VerificationOutcome`]. Where it goes
//! depends on the checkpoint mode: nowhere, an append-only log file in the
//! state directory, or the anchoring service.

use crate::paths::sanitize_file_name;
use chrono::Utc;
use ledgercheck_anchor::{ops, AnchorClient};
use ledgercheck_core::{
    io_error, CheckpointMode, ConfigError, LedgerError, LedgerResult, LedgerTarget, StorageError,
    VerificationOutcome,
};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Sink for per-row verification outcomes.
pub trait OutcomePublisher: Send + Sync {
    fn publish(&self, target: &LedgerTarget, outcome: &VerificationOutcome) -> LedgerResult<()>;

    /// Called once after every run of `target`.
    fn finish_run(&self, _target: &LedgerTarget) -> LedgerResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullPublisher;

impl OutcomePublisher for NullPublisher {
    fn publish(&self, _target: &LedgerTarget, _outcome: &VerificationOutcome) -> LedgerResult<()> {
        Ok(())
    }
}

// ============================================================================
// LOG FILE
// ============================================================================

/// Appends one line per outcome to `{schema}_{table}_{dbid}.log`.
///
/// Logs larger than the rotation threshold are copied at the end of a run
/// to `{schema}_{table}__{dbid}_{epoch_millis}.log` and truncated.
#[derive(Debug)]
pub struct LogFilePublisher {
    dir: PathBuf,
    rotate_bytes: u64,
    write_lock: Mutex<()>,
}

impl LogFilePublisher {
    pub fn new(dir: impl Into<PathBuf>, rotate_bytes: u64) -> Self {
        Self {
            dir: dir.into(),
            rotate_bytes,
            write_lock: Mutex::new(()),
        }
    }

    pub fn log_path(&self, target: &LedgerTarget) -> PathBuf {
        self.dir
            .join(sanitize_file_name(&format!("{}.log", target.stem())))
    }

    fn rotated_path(&self, target: &LedgerTarget, millis: i64) -> PathBuf {
        let name = format!(
            "{}_{}__{}_{}.log",
            target.schema, target.table, target.database_id, millis
        );
        self.dir.join(sanitize_file_name(&name))
    }

    /// Archive and truncate the log if it exceeds the threshold. Returns the
    /// archived path when a rotation happened.
    pub fn rotate_if_needed(&self, target: &LedgerTarget) -> LedgerResult<Option<PathBuf>> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| LedgerError::Storage(StorageError::LockPoisoned))?;
        let path = self.log_path(target);
        let size = match std::fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, e)),
        };
        if size <= self.rotate_bytes {
            return Ok(None);
        }

        let archived = self.rotated_path(target, Utc::now().timestamp_millis());
        std::fs::copy(&path, &archived).map_err(|e| io_error(&archived, e))?;
        std::fs::File::create(&path).map_err(|e| io_error(&path, e))?;
        tracing::info!(
            log = %path.display(),
            archived = %archived.display(),
            bytes = size,
            "Rotated outcome log"
        );
        Ok(Some(archived))
    }
}

/// One human-readable line per outcome.
pub fn format_outcome_line(outcome: &VerificationOutcome) -> String {
    let key = &outcome.row_key;
    if outcome.success {
        format!(
            "Hash Verification successful for instance id : {} , chain id : {} , sequence no : {}. Verified Hash: {}\n",
            key.instance_id,
            key.chain_id,
            key.sequence_no,
            outcome.computed_hash.to_hex()
        )
    } else {
        format!(
            "Hash Verification Failed for instance id : {} , chain id : {} , sequence no : {}. Expected Hash : {}. GOT : {}\n",
            key.instance_id,
            key.chain_id,
            key.sequence_no,
            outcome.expected_hash.as_deref().unwrap_or_default(),
            outcome.computed_hash.to_hex()
        )
    }
}

impl OutcomePublisher for LogFilePublisher {
    fn publish(&self, target: &LedgerTarget, outcome: &VerificationOutcome) -> LedgerResult<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| LedgerError::Storage(StorageError::LockPoisoned))?;
        std::fs::create_dir_all(&self.dir).map_err(|e| io_error(&self.dir, e))?;
        let path = self.log_path(target);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_error(&path, e))?;
        file.write_all(format_outcome_line(outcome).as_bytes())
            .map_err(|e| io_error(&path, e))
    }

    fn finish_run(&self, target: &LedgerTarget) -> LedgerResult<()> {
        self.rotate_if_needed(target).map(|_| ())
    }
}

// ============================================================================
// ANCHORING SERVICE
// ============================================================================

/// Records each outcome with the `storeLog` chaincode function.
pub struct AnchorPublisher {
    client: Arc<dyn AnchorClient>,
}

impl AnchorPublisher {
    pub fn new(client: Arc<dyn AnchorClient>) -> Self {
        Self { client }
    }
}

impl OutcomePublisher for AnchorPublisher {
    fn publish(&self, target: &LedgerTarget, outcome: &VerificationOutcome) -> LedgerResult<()> {
        let key = &outcome.row_key;
        let mut args = vec![
            target.schema.clone(),
            target.table.clone(),
            target.database_id.clone(),
            key.instance_id.to_string(),
            key.chain_id.to_string(),
            key.sequence_no.to_string(),
            outcome.success.to_string(),
            outcome.computed_hash.to_hex(),
        ];
        if !outcome.success {
            args.push(outcome.expected_hash.clone().unwrap_or_default());
        }
        let txid = self.client.invoke(ops::STORE_LOG, &args)?;
        tracing::trace!(row = %key, txid = %txid, "Outcome anchored");
        Ok(())
    }
}

impl std::fmt::Debug for AnchorPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnchorPublisher").finish_non_exhaustive()
    }
}

/// Publisher matching `mode`. Remote mode needs an anchoring client.
pub fn outcome_publisher_for(
    mode: CheckpointMode,
    state_dir: &Path,
    rotate_bytes: u64,
    anchor: Option<Arc<dyn AnchorClient>>,
) -> LedgerResult<Arc<dyn OutcomePublisher>> {
    match mode {
        CheckpointMode::Off => Ok(Arc::new(NullPublisher)),
        CheckpointMode::Local => Ok(Arc::new(LogFilePublisher::new(state_dir, rotate_bytes))),
        CheckpointMode::Remote => {
            let client = anchor.ok_or_else(|| ConfigError::MissingRequired {
                field: "anchor configuration".to_string(),
            })?;
            Ok(Arc::new(AnchorPublisher::new(client)))
        }
    }
}
