//! ledgercheck entry point.

use clap::Parser;
use std::process;

mod cli;
mod commands;
mod telemetry;

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    telemetry::init(cli.log_json);

    let result = match cli.command {
        Commands::Verify(args) => commands::verify(args).await,
        Commands::PublishHash(args) => commands::publish_hash(args).await,
        Commands::ReadHash(args) => commands::read_hash(args).await,
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            tracing::error!(error = %e, "ledgercheck failed");
            eprintln!("Error: {}", e);
            process::exit(commands::exit_code(&e));
        }
    }
}
