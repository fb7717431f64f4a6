//! EPPN CLI: runs the coordination core of the document pipeline.
//!
//! Routes typed stage messages, keeps the participant registry and the
//! coordination ledger, and inspects both from the command line.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
