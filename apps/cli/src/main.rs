//! trackdocs CLI — harvest issue tracker content into indexable documents.
//!
//! Fetches every issue with its comments and text attachments and writes
//! one self-contained JSON document per issue.

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
