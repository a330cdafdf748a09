use std::io;

use clap::Parser;
use dsse_cli::{Cli, Commands};
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_subscriber::EnvFilter;

mod commands;

fn init_logging(level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(LevelFilter::from_level(level).into()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    match &cli.command {
        Commands::Estimate(args) => commands::estimate::handle(args),
        Commands::Cosim(args) => commands::cosim::handle(args),
        Commands::Analyze(args) => commands::analyze::handle(args),
    }
}
