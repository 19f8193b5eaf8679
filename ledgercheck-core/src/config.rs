//! Run configuration.

use crate::error::{ConfigError, LedgerResult};
use crate::VerifyScope;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default delay between scheduled runs.
pub const DEFAULT_INTERVAL_SECS: u64 = 300;
/// Outcome logs above this size are rotated at the end of a run.
pub const DEFAULT_LOG_ROTATE_BYTES: u64 = 1024 * 1024 * 1024;
/// Extension of preserved canonical buffers.
pub const DEFAULT_EVIDENCE_EXTENSION: &str = "dat";

/// Where verification progress and outcomes are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointMode {
    /// Every run rescans the whole table; nothing is persisted.
    #[default]
    Off,
    /// Checkpoints and outcome logs live in the state directory.
    Local,
    /// Checkpoints and outcomes go to the anchoring service.
    Remote,
}

impl CheckpointMode {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, CheckpointMode::Off)
    }
}

impl FromStr for CheckpointMode {
    type Err = ConfigError;

    /// Accepts names and the numeric codes 0, 1 and 2.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "off" => Ok(CheckpointMode::Off),
            "1" | "local" => Ok(CheckpointMode::Local),
            "2" | "remote" | "obp" => Ok(CheckpointMode::Remote),
            other => Err(ConfigError::InvalidValue {
                field: "mode".to_string(),
                value: other.to_string(),
                reason: "expected off, local or remote".to_string(),
            }),
        }
    }
}

impl fmt::Display for CheckpointMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CheckpointMode::Off => "off",
            CheckpointMode::Local => "local",
            CheckpointMode::Remote => "remote",
        };
        f.write_str(name)
    }
}

// ============================================================================
// VERIFY CONFIG
// ============================================================================

/// Settings shared by every verification run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyConfig {
    pub checkpoint_mode: CheckpointMode,
    /// Keep the canonical bytes of rows whose hash did not match.
    pub preserve_failed_rows: bool,
    /// Directory for checkpoint files, outcome logs and preserved rows.
    pub state_dir: PathBuf,
    pub evidence_extension: String,
    pub log_rotate_bytes: u64,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            checkpoint_mode: CheckpointMode::Off,
            preserve_failed_rows: false,
            state_dir: PathBuf::from("."),
            evidence_extension: DEFAULT_EVIDENCE_EXTENSION.to_string(),
            log_rotate_bytes: DEFAULT_LOG_ROTATE_BYTES,
        }
    }
}

impl VerifyConfig {
    /// Create VerifyConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `LEDGERCHECK_MODE`: off, local or remote (default: off)
    /// - `LEDGERCHECK_PRESERVE_FAILED`: keep mismatching row bytes (default: false)
    /// - `LEDGERCHECK_STATE_DIR`: state directory (default: current directory)
    /// - `LEDGERCHECK_LOG_ROTATE_BYTES`: outcome log rotation threshold (default: 1 GiB)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let checkpoint_mode = std::env::var("LEDGERCHECK_MODE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.checkpoint_mode);

        let preserve_failed_rows = std::env::var("LEDGERCHECK_PRESERVE_FAILED")
            .ok()
            .map(|s| s.eq_ignore_ascii_case("true") || s == "1")
            .unwrap_or(defaults.preserve_failed_rows);

        let state_dir = std::env::var("LEDGERCHECK_STATE_DIR")
            .ok()
            .map(PathBuf::from)
            .unwrap_or(defaults.state_dir);

        let log_rotate_bytes = std::env::var("LEDGERCHECK_LOG_ROTATE_BYTES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.log_rotate_bytes);

        Self {
            checkpoint_mode,
            preserve_failed_rows,
            state_dir,
            evidence_extension: defaults.evidence_extension,
            log_rotate_bytes,
        }
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.log_rotate_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "log_rotate_bytes".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            }
            .into());
        }
        if self.evidence_extension.is_empty()
            || self.evidence_extension.contains(&['/', '\\', '.'][..])
        {
            return Err(ConfigError::InvalidValue {
                field: "evidence_extension".to_string(),
                value: self.evidence_extension.clone(),
                reason: "must be a bare file extension".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

// ============================================================================
// SCHEDULE CONFIG
// ============================================================================

/// When runs happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    /// Repeat after the first run.
    pub continuous: bool,
    pub interval: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            continuous: false,
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
        }
    }
}

impl ScheduleConfig {
    /// Continuous whenever progress is persisted, unless a single pass is
    /// requested.
    pub fn for_mode(mode: CheckpointMode, once: bool) -> Self {
        Self {
            continuous: mode.is_enabled() && !once,
            ..Self::default()
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Reject settings that cannot be scheduled for `scope`.
    pub fn validate(&self, scope: &VerifyScope) -> LedgerResult<()> {
        if self.continuous && scope.is_single_row() {
            return Err(ConfigError::IncompatibleOptions {
                option_a: "continuous mode".to_string(),
                option_b: "single-row verification".to_string(),
            }
            .into());
        }
        if self.continuous && self.interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "interval".to_string(),
                value: "0".to_string(),
                reason: "continuous mode needs a positive interval".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
