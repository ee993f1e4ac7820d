mod cli;

use anyhow::Result;
use clap::Parser;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cli::logging::init_tracing(&cli.log_level);
    cli::run(cli).await
}
