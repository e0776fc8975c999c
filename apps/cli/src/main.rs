//! DocMuse CLI: ask questions of your knowledge bases.
//!
//! Runs the retrieval/summarize/critique agent locally or serves it over
//! HTTP with streamed progress.

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
