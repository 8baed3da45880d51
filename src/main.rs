mod catalog;
mod cli;
mod client;
mod config;
mod markup;
mod model;
mod orchestrator;
mod resolver;
mod runner;
mod text_summary;
mod transcript;
#[cfg(feature = "tui")]
mod tui;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    match cli::run(args).await {
        Ok(()) => {
            // Detached tasks (signal watcher, pending queries) must not keep us alive.
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}
