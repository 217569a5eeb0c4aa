//! Binary crate for the `concierge-weather` command-line tool.
//!
//! This crate focuses on:
//! - Parsing CLI arguments
//! - Interactive provider configuration
//! - Human-friendly output of weather, health and metrics

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cmd = cli::Cli::parse();

    // Logs go to stderr so `--json` output stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cmd.default_log_filter())),
        )
        .with_writer(std::io::stderr)
        .init();

    cmd.run().await
}
