//! ContentFlow CLI: run a document through the configured extraction pipeline.
//!
//! Loads configuration, wires the object store, schema catalog, and analysis
//! service clients together, and drives one run per invocation.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let config = commands::resolve_config(&cli)?;
    commands::init_tracing(&cli, &config.logging);
    commands::run(cli, config).await
}
