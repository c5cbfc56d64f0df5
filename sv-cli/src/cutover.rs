//! Cutover subcommands.
//!
//! The phase machine persists between invocations in a JSON state file
//! beside the automation state. `run` performs the fast sequence against
//! the legacy transaction file; `rollback` restores the mirror flags and
//! writes the ledger export the legacy store is rebuilt from.

use std::error::Error;
use std::path::PathBuf;

use chrono::Utc;
use clap::Subcommand;
use rust_decimal::Decimal;
use sv_ledger::cutover::{CutoverConfig, CutoverController, CutoverOutcome, CutoverState};
use sv_ledger::migrate::MigrationReplayer;
use sv_ledger::slo::SloMonitor;
use sv_ledger::{AssetScaleRegistry, LedgerStore};

use crate::legacy::FileLegacyStore;

/// Where the phase machine persists between invocations.
pub const CUTOVER_STATE_FILE: &str = ".cutover-state.json";

/// Cutover phase-machine commands.
#[derive(Subcommand, Debug)]
pub enum CutoverCommand {
    /// Show the current phase, flags, and gate progress.
    Status,

    /// Record today's reconciliation verdict.
    RecordDay {
        /// Whether the day ended with zero drift.
        #[arg(long)]
        drift: bool,
    },

    /// Advance one phase if the gates allow it.
    Advance,

    /// Run the cutover fast sequence.
    Run {
        /// Legacy transaction file (also snapshotted as the backup).
        #[arg(long)]
        input: PathBuf,

        /// Directory for cutover artifacts.
        #[arg(long, default_value = ".")]
        artifacts: PathBuf,
    },

    /// Revert to mirror and emit the legacy rebuild export.
    Rollback {
        /// Legacy transaction file to rebuild the ledger from.
        #[arg(long)]
        input: PathBuf,

        /// Where to write the rebuild export.
        #[arg(long, default_value = "legacy-rebuild.json")]
        out: PathBuf,
    },
}

fn load_controller() -> CutoverController {
    let config = CutoverConfig::default();
    match std::fs::read_to_string(CUTOVER_STATE_FILE)
        .ok()
        .and_then(|raw| serde_json::from_str::<CutoverState>(&raw).ok())
    {
        Some(state) => CutoverController::restore(config, state),
        None => CutoverController::new(config, Utc::now()),
    }
}

fn save_controller(controller: &CutoverController) -> Result<(), Box<dyn Error>> {
    let json = serde_json::to_string_pretty(&controller.snapshot())?;
    std::fs::write(CUTOVER_STATE_FILE, json)?;
    Ok(())
}

/// Run one cutover subcommand.
pub async fn run(command: CutoverCommand) -> Result<(), Box<dyn Error>> {
    let mut controller = load_controller();

    match command {
        CutoverCommand::Status => {
            let state = controller.snapshot();
            println!("phase:        {:?}", state.phase);
            println!("flags:        {:?}", state.flags);
            println!("entered:      {}", state.phase_entered.to_rfc3339());
            println!("clean days:   {}", state.clean_days);
        }
        CutoverCommand::RecordDay { drift } => {
            controller.record_day(!drift);
            save_controller(&controller)?;
            println!(
                "recorded {} day, streak {}",
                if drift { "drifted" } else { "clean" },
                controller.clean_days()
            );
        }
        CutoverCommand::Advance => {
            let phase = controller.advance(Utc::now())?;
            save_controller(&controller)?;
            println!("advanced to {:?}", phase);
        }
        CutoverCommand::Run { input, artifacts } => {
            let legacy = FileLegacyStore::open(&input)?;
            let ledger = sv_ledger::actor::spawn(LedgerStore::new());
            let mut scales = AssetScaleRegistry::new();
            MigrationReplayer::replay(&legacy, &ledger, &mut scales, Decimal::ZERO).await?;

            let mut slo = SloMonitor::default();
            let (outcome, produced) = controller
                .run_cutover(
                    &legacy,
                    Some(legacy.db_path()),
                    &ledger,
                    &scales,
                    &mut slo,
                    &artifacts,
                    Utc::now(),
                )
                .await?;
            save_controller(&controller)?;

            match outcome {
                CutoverOutcome::Success => {
                    println!("cutover complete");
                }
                CutoverOutcome::PartialSuccess { failures } => {
                    for failure in &failures {
                        eprintln!("smoke failure: {}", failure);
                    }
                    println!("cutover partial_success; consider rollback");
                }
            }
            if let Some(backup) = produced.backup {
                println!("legacy backup: {}", backup.display());
            }
            println!("ledger export: {}", produced.ledger_export.display());
        }
        CutoverCommand::Rollback { input, out } => {
            let legacy = FileLegacyStore::open(&input)?;
            let ledger = sv_ledger::actor::spawn(LedgerStore::new());
            let mut scales = AssetScaleRegistry::new();
            MigrationReplayer::replay(&legacy, &ledger, &mut scales, Decimal::ZERO).await?;

            let export = controller.rollback(&ledger, Utc::now()).await?;
            save_controller(&controller)?;
            std::fs::write(&out, serde_json::to_string_pretty(&export)?)?;
            println!(
                "rolled back to mirror; rebuild export ({} transfers) at {}",
                export.len(),
                out.display()
            );
        }
    }
    Ok(())
}
