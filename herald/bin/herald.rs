use std::path::PathBuf;

use clap::Parser;
use herald::{Herald, find_config_file};

/// Outbound message dispatch engine
///
/// Reads JSON-lines commands from stdin and writes one JSON reply per line.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Configuration file; otherwise `HERALD_CONFIG` or the default locations
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config_path = find_config_file(args.config.as_deref())?;
    let herald = Herald::load(&config_path)?;

    herald.run().await
}
