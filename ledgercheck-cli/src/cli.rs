use clap::{Args, Parser, Subcommand};
use ledgercheck_core::{
    CheckpointMode, LedgerResult, RowKey, ScheduleConfig, VerifyConfig, VerifyScope,
    DEFAULT_INTERVAL_SECS,
};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "ledgercheck",
    version,
    about = "Verify the hash chains of blockchain ledger tables",
    long_about = "ledgercheck recomputes the hash of every row of a ledger table from its \
                  column values and the stored hash of the previous row in its chain, and \
                  reports every row whose stored hash no longer matches."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "LEDGERCHECK_LOG_JSON")]
    pub log_json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Verify a table, an instance, a chain or a single row
    Verify(VerifyArgs),

    /// Anchor the stored hash of one row
    PublishHash(RowArgs),

    /// Read back an anchored row hash
    ReadHash(RowArgs),
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Schema owning the ledger table
    pub schema: String,

    /// Ledger table name
    pub table: String,

    /// Restrict to one instance
    pub instance_id: Option<u32>,

    /// Restrict to one chain of the instance
    pub chain_id: Option<u32>,

    /// Verify a single row of the chain
    pub sequence_no: Option<i64>,

    /// Where progress and outcomes are kept: off, local or remote
    #[arg(long, default_value = "off", env = "LEDGERCHECK_MODE")]
    pub mode: CheckpointMode,

    /// Keep the canonical bytes of rows whose hash does not match
    #[arg(long)]
    pub preserve_failed: bool,

    /// Rotate the outcome log once it grows past this many bytes
    #[arg(long, value_name = "BYTES")]
    pub log_rotate_bytes: Option<u64>,

    /// Ledger snapshot to verify
    #[arg(long, value_name = "PATH", env = "LEDGERCHECK_SNAPSHOT")]
    pub snapshot: PathBuf,

    /// Directory for checkpoints, outcome logs and preserved rows
    #[arg(long, value_name = "DIR", default_value = ".", env = "LEDGERCHECK_STATE_DIR")]
    pub state_dir: PathBuf,

    /// Seconds between runs in continuous mode
    #[arg(long, default_value_t = DEFAULT_INTERVAL_SECS)]
    pub interval_secs: u64,

    /// Run once even when progress is persisted
    #[arg(long)]
    pub once: bool,

    /// Anchoring service endpoint file, required in remote mode
    #[arg(long, value_name = "PATH", env = "LEDGERCHECK_ANCHOR_CONFIG")]
    pub anchor_config: Option<PathBuf>,

    /// Print the final report as JSON
    #[arg(long)]
    pub json: bool,
}

impl VerifyArgs {
    pub fn scope(&self) -> LedgerResult<VerifyScope> {
        Ok(VerifyScope::from_parts(
            self.instance_id,
            self.chain_id,
            self.sequence_no,
        )?)
    }

    /// Environment settings, overridden by whatever was given on the command
    /// line.
    pub fn verify_config(&self) -> VerifyConfig {
        let mut config = VerifyConfig::from_env();
        config.checkpoint_mode = self.mode;
        config.state_dir = self.state_dir.clone();
        config.preserve_failed_rows |= self.preserve_failed;
        if let Some(bytes) = self.log_rotate_bytes {
            config.log_rotate_bytes = bytes;
        }
        config
    }

    pub fn schedule_config(&self) -> ScheduleConfig {
        ScheduleConfig::for_mode(self.mode, self.once)
            .with_interval(Duration::from_secs(self.interval_secs))
    }
}

#[derive(Args, Debug)]
pub struct RowArgs {
    pub schema: String,
    pub table: String,
    pub instance_id: u32,
    pub chain_id: u32,
    pub sequence_no: i64,

    /// Ledger snapshot holding the row
    #[arg(long, value_name = "PATH", env = "LEDGERCHECK_SNAPSHOT")]
    pub snapshot: PathBuf,

    /// Anchoring service endpoint file
    #[arg(long, value_name = "PATH", env = "LEDGERCHECK_ANCHOR_CONFIG")]
    pub anchor_config: PathBuf,
}

impl RowArgs {
    pub fn row_key(&self) -> RowKey {
        RowKey::new(self.instance_id, self.chain_id, self.sequence_no)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_verify_defaults() {
        let cli = Cli::try_parse_from(["ledgercheck", "verify", "bank", "ledger", "--snapshot", "l.json"]).unwrap();
        let Commands::Verify(args) = cli.command else {
            panic!("expected verify");
        };
        assert_eq!(args.mode, CheckpointMode::Off);
        assert_eq!(args.scope().unwrap(), VerifyScope::Table);
        assert!(!args.schedule_config().continuous);
        assert_eq!(args.schedule_config().interval, Duration::from_secs(DEFAULT_INTERVAL_SECS));
    }

    #[test]
    fn test_verify_single_row_in_local_mode() {
        let cli = Cli::try_parse_from([
            "ledgercheck", "verify", "BANK", "LEDGER", "1", "0", "7", "--mode", "local", "--snapshot",
            "l.json", "--preserve-failed",
        ])
        .unwrap();
        let Commands::Verify(args) = cli.command else {
            panic!("expected verify");
        };
        assert_eq!(args.scope().unwrap(), VerifyScope::Row(RowKey::new(1, 0, 7)));
        assert!(args.verify_config().preserve_failed_rows);
        assert_eq!(args.verify_config().checkpoint_mode, CheckpointMode::Local);
        // Local mode is continuous, which a single row cannot be.
        assert!(args.schedule_config().validate(&args.scope().unwrap()).is_err());
    }

    #[test]
    fn test_flags_override_environment() {
        let cli = Cli::try_parse_from([
            "ledgercheck", "verify", "BANK", "LEDGER", "--snapshot", "l.json", "--state-dir", "/tmp/lc",
            "--log-rotate-bytes", "2048",
        ])
        .unwrap();
        let Commands::Verify(args) = cli.command else {
            panic!("expected verify");
        };
        let config = args.verify_config();
        assert_eq!(config.state_dir, PathBuf::from("/tmp/lc"));
        assert_eq!(config.log_rotate_bytes, 2048);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_numeric_mode_and_once() {
        let cli = Cli::try_parse_from([
            "ledgercheck", "verify", "BANK", "LEDGER", "--mode", "2", "--once", "--snapshot", "l.json",
        ])
        .unwrap();
        let Commands::Verify(args) = cli.command else {
            panic!("expected verify");
        };
        assert_eq!(args.mode, CheckpointMode::Remote);
        assert!(!args.schedule_config().continuous);
    }

    #[test]
    fn test_invalid_arguments_rejected() {
        assert!(Cli::try_parse_from(["ledgercheck", "verify", "BANK", "LEDGER", "--mode", "sometimes"]).is_err());
        assert!(Cli::try_parse_from(["ledgercheck", "verify", "BANK", "LEDGER", "x", "--snapshot", "l"]).is_err());
        assert!(Cli::try_parse_from(["ledgercheck", "read-hash", "BANK", "LEDGER", "1", "0"]).is_err());
    }
}
