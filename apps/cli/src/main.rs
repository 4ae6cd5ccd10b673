//! Blackboard CLI: operate the shared plan/result store and the content cache.
//!
//! Every store and cache operation is exposed as a subcommand; reads print
//! JSON so the output can be piped into other tools.

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
