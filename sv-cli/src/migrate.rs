//! Migration subcommands.
//!
//! Each invocation replays the legacy transaction file into a fresh
//! in-process ledger, then runs the requested tooling against it.

use std::error::Error;
use std::path::PathBuf;

use clap::Subcommand;
use rust_decimal::Decimal;
use sv_ledger::migrate::{ExportedTransfer, MigrationReplayer};
use sv_ledger::{AssetScaleRegistry, LedgerStore};

use crate::legacy::FileLegacyStore;

/// Migration tooling.
#[derive(Subcommand, Debug)]
pub enum MigrateCommand {
    /// Replay the legacy file into the ledger and check parity.
    Replay {
        /// Legacy transaction file.
        #[arg(long)]
        input: PathBuf,
    },

    /// Replay, then export every transfer committed after the marker.
    Export {
        /// Legacy transaction file.
        #[arg(long)]
        input: PathBuf,

        /// Marker timestamp in nanoseconds (0 = everything).
        #[arg(long, default_value_t = 0)]
        marker: u64,

        /// Output file.
        #[arg(long, default_value = "ledger-export.json")]
        out: PathBuf,
    },

    /// Replay, then diff the since-marker export against a baseline.
    Diff {
        /// Legacy transaction file.
        #[arg(long)]
        input: PathBuf,

        /// Marker timestamp in nanoseconds.
        #[arg(long, default_value_t = 0)]
        marker: u64,

        /// Baseline export file to compare against.
        #[arg(long)]
        baseline: PathBuf,
    },

    /// Replay, then verify against a sandbox replay.
    Verify {
        /// Legacy transaction file.
        #[arg(long)]
        input: PathBuf,
    },
}

/// Replay the input and return the pieces the subcommands share.
async fn replayed(
    input: &PathBuf,
) -> Result<
    (
        FileLegacyStore,
        sv_ledger::actor::LedgerHandle,
        AssetScaleRegistry,
    ),
    Box<dyn Error>,
> {
    let legacy = FileLegacyStore::open(input)?;
    let ledger = sv_ledger::actor::spawn(LedgerStore::new());
    let mut scales = AssetScaleRegistry::new();
    let stats = MigrationReplayer::replay(&legacy, &ledger, &mut scales, Decimal::ZERO).await?;
    tracing::info!(
        accounts = stats.accounts_created,
        transfers = stats.transfers_applied,
        skipped = stats.duplicates_skipped,
        "replay complete"
    );
    Ok((legacy, ledger, scales))
}

/// Run one migration subcommand.
pub async fn run(command: MigrateCommand) -> Result<(), Box<dyn Error>> {
    match command {
        MigrateCommand::Replay { input } => {
            let (legacy, _ledger, _scales) = replayed(&input).await?;
            println!(
                "replayed {} transactions, parity ok",
                legacy.records().len()
            );
        }
        MigrateCommand::Export { input, marker, out } => {
            let (_legacy, ledger, _scales) = replayed(&input).await?;
            let export = MigrationReplayer::export_since(&ledger, marker).await?;
            std::fs::write(&out, serde_json::to_string_pretty(&export)?)?;
            println!("exported {} transfers to {}", export.len(), out.display());
        }
        MigrateCommand::Diff {
            input,
            marker,
            baseline,
        } => {
            let (_legacy, ledger, _scales) = replayed(&input).await?;
            let baseline: Vec<ExportedTransfer> =
                serde_json::from_str(&std::fs::read_to_string(&baseline)?)?;
            let diff = MigrationReplayer::diff_since(&ledger, marker, &baseline).await?;
            if diff.is_empty() {
                println!("no divergence since marker {}", marker);
            } else {
                for id in &diff {
                    println!("diverged: {}", id);
                }
                return Err(format!("{} transfers diverged", diff.len()).into());
            }
        }
        MigrateCommand::Verify { input } => {
            let (legacy, ledger, scales) = replayed(&input).await?;
            let ok =
                MigrationReplayer::verify(legacy.records(), &ledger, &scales).await?;
            if !ok {
                return Err("verification failed: per-asset totals diverge".into());
            }
            println!("verified: sandbox replay matches ledger");
        }
    }
    Ok(())
}
