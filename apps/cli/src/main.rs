//! Regional Radar CLI. Watches a roster of company websites for adoption
//! of a technology topic.
//!
//! Runs the fetch → classify → geocode → persist → alert pipeline and renders
//! reports from the local store.

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
