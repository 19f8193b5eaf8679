//! Preservation of canonical bytes for rows that failed verification.

use crate::paths::sanitize_file_name;
use ledgercheck_core::{io_error, LedgerResult, LedgerTarget, RowKey, VerifyConfig};
use std::path::{Path, PathBuf};

/// Writes the canonical buffer of a mismatching row to the state directory
/// so the exact bytes that were hashed can be inspected later.
#[derive(Debug, Clone)]
pub struct EvidenceArchive {
    dir: Option<PathBuf>,
    extension: String,
}

impl EvidenceArchive {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: Some(dir.into()),
            extension: extension.into(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            dir: None,
            extension: String::new(),
        }
    }

    pub fn from_config(config: &VerifyConfig) -> Self {
        if config.preserve_failed_rows {
            Self::new(&config.state_dir, &config.evidence_extension)
        } else {
            Self::disabled()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.dir.is_some()
    }

    /// `{schema}_{table}_{dbid}_bytesfile{inst}_{chain}_{seq}.{ext}`
    pub fn artifact_name(&self, target: &LedgerTarget, key: RowKey) -> String {
        sanitize_file_name(&format!(
            "{}_bytesfile{}_{}_{}.{}",
            target.stem(),
            key.instance_id,
            key.chain_id,
            key.sequence_no,
            self.extension
        ))
    }

    /// Write `bytes` for `key`. Returns the written path, or `None` when
    /// preservation is disabled. An existing artifact is overwritten.
    pub fn preserve(&self, target: &LedgerTarget, key: RowKey, bytes: &[u8]) -> LedgerResult<Option<PathBuf>> {
        let Some(dir) = &self.dir else {
            return Ok(None);
        };
        std::fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;
        let path = dir.join(self.artifact_name(target, key));
        std::fs::write(&path, bytes).map_err(|e| io_error(&path, e))?;
        tracing::info!(row = %key, path = %path.display(), bytes = bytes.len(), "Preserved failed row");
        Ok(Some(path))
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }
}
