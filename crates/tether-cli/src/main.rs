use clap::Parser;
use tracing::Level;

mod cli;
mod commands;
mod config;
mod loader;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    // stdout carries frames in worker mode.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .init();
    commands::run_command(cli).await
}
