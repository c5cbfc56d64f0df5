//! smartvestor: automation runner, TUI client, and migration tooling.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod automation;
mod cutover;
mod legacy;
mod migrate;
mod run;

/// Automated crypto-investment agent.
#[derive(Parser, Debug)]
#[command(name = "smartvestor")]
#[command(about = "Automated crypto-investment agent", long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the automation loop and publish state on the bus.
    Run {
        /// Execution mode label.
        #[arg(long, default_value = "paper")]
        mode: String,

        /// State bus socket path.
        #[arg(long, default_value = sv_tui::publisher::DEFAULT_SOCKET_PATH)]
        socket: PathBuf,

        /// Seconds between automation executions.
        #[arg(long, default_value_t = 5)]
        interval: u64,
    },

    /// Attach a terminal client to the state bus.
    Tui {
        /// State bus socket path.
        #[arg(long, default_value = sv_tui::publisher::DEFAULT_SOCKET_PATH)]
        socket: PathBuf,
    },

    /// Migration tooling against a legacy transaction file.
    #[command(subcommand)]
    Migrate(migrate::MigrateCommand),

    /// Drive the legacy-store cutover phase machine.
    #[command(subcommand)]
    Cutover(cutover::CutoverCommand),

    /// Generate a synthetic legacy transaction fixture.
    Gen {
        /// Number of transactions.
        #[arg(long, default_value_t = 1000)]
        transactions: usize,

        /// Output file.
        #[arg(long, default_value = "legacy.json")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .init();

    match args.command {
        Command::Run {
            mode,
            socket,
            interval,
        } => run::run(&mode, &socket, interval).await,
        Command::Tui { socket } => {
            sv_tui::app::run(socket, sv_tui::TuiOptions::from_env()).await?;
            Ok(())
        }
        Command::Migrate(command) => migrate::run(command).await,
        Command::Cutover(command) => cutover::run(command).await,
        Command::Gen { transactions, out } => {
            let fixture = legacy::generate(
                transactions,
                &["kraken", "coinbase"],
                &["BTC", "ETH", "USDC", "USD"],
                std::process::id() as u64,
            );
            legacy::write_fixture(&out, &fixture)?;
            println!("wrote {} transactions to {}", fixture.len(), out.display());
            Ok(())
        }
    }
}
