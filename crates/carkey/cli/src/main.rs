//! Command-line driver that runs the carkey protocols between simulated principals.

use std::time::Duration;

use carkey::config::ProtocolConfig;
use clap::{Parser, Subcommand};

mod commands;
mod office;

#[derive(Parser)]
#[command(version, about = "Run the carkey protocols between simulated principals")]
struct Cli {
    /// Debug level output
    #[arg(short, long)]
    verbose: bool,

    /// How long terminals wait for the authority, in milliseconds
    #[arg(long, default_value_t = 10_000)]
    mailbox_timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Issue a card, rent a vehicle, drive it and return it
    FullRun {
        /// Usage updates per rental
        #[arg(long, default_value_t = 3)]
        updates: u32,

        /// Successive rentals of the same card
        #[arg(long, default_value_t = 1)]
        runs: u32,

        /// Run the card on its own thread
        #[arg(long)]
        threaded: bool,
    },

    /// Block an issued card and show that it reaches end of life
    Block,

    /// Tamper with a usage update and show that it is detected
    Tamper,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = ProtocolConfig::default()
        .with_mailbox_timeout(Duration::from_millis(cli.mailbox_timeout_ms));

    match cli.command {
        Commands::FullRun {
            updates,
            runs,
            threaded,
        } => commands::full_run(config, updates, runs, threaded),
        Commands::Block => commands::block(config),
        Commands::Tamper => commands::tamper(config),
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(true)
        .init();
}
