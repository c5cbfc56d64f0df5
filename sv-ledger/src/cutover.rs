//! Legacy-store cutover.
//!
//! A phase machine governing the two-store period: writes are mirrored
//! into both stores, reads move to the ledger once drift has stayed at
//! zero long enough, and finally legacy writes are disabled. Rollback is
//! always available and restores the mirror flags before any rebuild I/O.

use std::error::Error;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::actor::LedgerHandle;
use crate::error::LedgerError;
use crate::migrate::{ExportedTransfer, LegacyStore, MigrateError, MigrationReplayer};
use crate::scale::AssetScaleRegistry;
use crate::slo::SloMonitor;

/// Flags governing which store serves reads and receives writes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Writes are applied to both stores.
    pub mirror_writes: bool,
    /// Reads are served by the ledger.
    pub read_from_ledger: bool,
    /// The legacy store no longer receives writes.
    pub disable_legacy_writes: bool,
}

impl FeatureFlags {
    /// The mirror-phase flag set.
    pub fn mirror() -> Self {
        Self {
            mirror_writes: true,
            read_from_ledger: false,
            disable_legacy_writes: false,
        }
    }
}

/// Cutover phases.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum CutoverPhase {
    /// Dual writes, reads from legacy.
    Mirror,
    /// Dual writes, reads from the ledger.
    ReadShadow,
    /// Ledger only.
    DisableShadow,
    /// Explicitly reverted to mirror.
    Rollback,
}

/// Advancement gates.
#[derive(Clone, Copy, Debug)]
pub struct CutoverConfig {
    /// Consecutive zero-drift days required to leave `Mirror`.
    pub required_clean_days: u32,
    /// Minimum days spent in `Mirror`.
    pub min_mirror_days: i64,
    /// Minimum days spent in `ReadShadow`.
    pub min_read_days: i64,
}

impl Default for CutoverConfig {
    fn default() -> Self {
        Self {
            required_clean_days: 7,
            min_mirror_days: 7,
            min_read_days: 30,
        }
    }
}

/// Cutover failures.
#[derive(Debug)]
pub enum CutoverError {
    /// The requested move is invalid from the current phase.
    WrongPhase(CutoverPhase),
    /// An advancement gate is not met.
    GateNotMet(String),
    /// Artifact I/O failed.
    Io(std::io::Error),
    /// Serialising an artifact failed.
    Json(serde_json::Error),
    /// Migration tooling failed.
    Migrate(MigrateError),
    /// The ledger actor is unavailable.
    Ledger(LedgerError),
}

impl fmt::Display for CutoverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CutoverError::WrongPhase(phase) => write!(f, "invalid from phase {:?}", phase),
            CutoverError::GateNotMet(gate) => write!(f, "gate not met: {}", gate),
            CutoverError::Io(e) => write!(f, "artifact io error: {}", e),
            CutoverError::Json(e) => write!(f, "artifact encode error: {}", e),
            CutoverError::Migrate(e) => write!(f, "migration error: {}", e),
            CutoverError::Ledger(e) => write!(f, "ledger error: {}", e),
        }
    }
}

impl Error for CutoverError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CutoverError::Io(e) => Some(e),
            CutoverError::Json(e) => Some(e),
            CutoverError::Migrate(e) => Some(e),
            CutoverError::Ledger(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CutoverError {
    fn from(err: std::io::Error) -> Self {
        CutoverError::Io(err)
    }
}

impl From<serde_json::Error> for CutoverError {
    fn from(err: serde_json::Error) -> Self {
        CutoverError::Json(err)
    }
}

impl From<MigrateError> for CutoverError {
    fn from(err: MigrateError) -> Self {
        CutoverError::Migrate(err)
    }
}

impl From<LedgerError> for CutoverError {
    fn from(err: LedgerError) -> Self {
        CutoverError::Ledger(err)
    }
}

/// Outcome of the cutover fast sequence.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CutoverOutcome {
    /// Every step and every smoke check passed.
    Success,
    /// The flip happened but a smoke check failed; rollback is advised.
    PartialSuccess {
        /// Human-readable smoke failures.
        failures: Vec<String>,
    },
}

/// Artifacts written by the fast sequence.
#[derive(Clone, Debug)]
pub struct CutoverArtifacts {
    /// Byte-exact copy of the legacy database, if a path was given.
    pub backup: Option<PathBuf>,
    /// Pretty-printed export of every ledger transfer.
    pub ledger_export: PathBuf,
    /// Marker timestamp taken at the flip.
    pub marker: u64,
}

/// Persistable controller state, for CLIs that drive the phase machine
/// across process runs.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CutoverState {
    /// Current phase.
    pub phase: CutoverPhase,
    /// Current flag set.
    pub flags: FeatureFlags,
    /// When the current phase was entered.
    pub phase_entered: DateTime<Utc>,
    /// Consecutive zero-drift days recorded.
    pub clean_days: u32,
}

/// Phase machine for the two-store migration period.
pub struct CutoverController {
    config: CutoverConfig,
    phase: CutoverPhase,
    flags: FeatureFlags,
    phase_entered: DateTime<Utc>,
    clean_days: u32,
    writes_frozen: bool,
}

impl CutoverController {
    /// Start in `Mirror` at `now`.
    pub fn new(config: CutoverConfig, now: DateTime<Utc>) -> Self {
        Self {
            config,
            phase: CutoverPhase::Mirror,
            flags: FeatureFlags::mirror(),
            phase_entered: now,
            clean_days: 0,
            writes_frozen: false,
        }
    }

    /// Rebuild a controller from persisted state.
    pub fn restore(config: CutoverConfig, state: CutoverState) -> Self {
        Self {
            config,
            phase: state.phase,
            flags: state.flags,
            phase_entered: state.phase_entered,
            clean_days: state.clean_days,
            writes_frozen: false,
        }
    }

    /// Snapshot the controller for persistence.
    pub fn snapshot(&self) -> CutoverState {
        CutoverState {
            phase: self.phase,
            flags: self.flags,
            phase_entered: self.phase_entered,
            clean_days: self.clean_days,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> CutoverPhase {
        self.phase
    }

    /// Current flag set.
    pub fn flags(&self) -> FeatureFlags {
        self.flags
    }

    /// Whether the fast sequence currently holds writes.
    pub fn writes_frozen(&self) -> bool {
        self.writes_frozen
    }

    /// Record the daily reconciliation verdict.
    pub fn record_day(&mut self, zero_drift: bool) {
        if zero_drift {
            self.clean_days += 1;
        } else {
            self.clean_days = 0;
        }
    }

    /// Consecutive zero-drift days recorded.
    pub fn clean_days(&self) -> u32 {
        self.clean_days
    }

    fn days_in_phase(&self, now: DateTime<Utc>) -> i64 {
        (now - self.phase_entered).num_days()
    }

    /// Advance one phase, if the gates allow it.
    pub fn advance(&mut self, now: DateTime<Utc>) -> Result<CutoverPhase, CutoverError> {
        match self.phase {
            CutoverPhase::Mirror | CutoverPhase::Rollback => {
                if self.clean_days < self.config.required_clean_days {
                    return Err(CutoverError::GateNotMet(format!(
                        "zero-drift days {} < {}",
                        self.clean_days, self.config.required_clean_days
                    )));
                }
                if self.days_in_phase(now) < self.config.min_mirror_days {
                    return Err(CutoverError::GateNotMet(format!(
                        "mirror days {} < {}",
                        self.days_in_phase(now),
                        self.config.min_mirror_days
                    )));
                }
                self.phase = CutoverPhase::ReadShadow;
                self.flags.read_from_ledger = true;
            }
            CutoverPhase::ReadShadow => {
                if self.clean_days < self.config.required_clean_days {
                    return Err(CutoverError::GateNotMet(format!(
                        "zero-drift days {} < {}",
                        self.clean_days, self.config.required_clean_days
                    )));
                }
                if self.days_in_phase(now) < self.config.min_read_days {
                    return Err(CutoverError::GateNotMet(format!(
                        "read days {} < {}",
                        self.days_in_phase(now),
                        self.config.min_read_days
                    )));
                }
                self.phase = CutoverPhase::DisableShadow;
                self.flags.disable_legacy_writes = true;
                self.flags.mirror_writes = false;
            }
            CutoverPhase::DisableShadow => {
                return Err(CutoverError::WrongPhase(self.phase));
            }
        }
        self.phase_entered = now;
        tracing::info!(phase = ?self.phase, "cutover advanced");
        Ok(self.phase)
    }

    /// Run the cutover fast sequence.
    ///
    /// Freeze writes, snapshot legacy and export the ledger, replay and
    /// verify, flip the flags, unfreeze, then the smoke checks. Smoke
    /// failures still leave the flags flipped; the caller decides between
    /// accepting the partial success and [`CutoverController::rollback`].
    #[allow(clippy::too_many_arguments)]
    pub async fn run_cutover(
        &mut self,
        legacy: &dyn LegacyStore,
        legacy_db: Option<&Path>,
        ledger: &LedgerHandle,
        scales: &AssetScaleRegistry,
        slo: &mut SloMonitor,
        artifact_dir: &Path,
        now: DateTime<Utc>,
    ) -> Result<(CutoverOutcome, CutoverArtifacts), CutoverError> {
        if self.phase != CutoverPhase::ReadShadow {
            return Err(CutoverError::WrongPhase(self.phase));
        }

        // 1. Freeze writes.
        self.writes_frozen = true;
        tracing::info!("cutover: writes frozen");

        // 2. Snapshot legacy, export ledger.
        let backup = match legacy_db {
            Some(db) => {
                let backup = db.with_extension(
                    db.extension()
                        .map(|e| format!("{}.pre_cutover.backup", e.to_string_lossy()))
                        .unwrap_or_else(|| "pre_cutover.backup".to_string()),
                );
                fs::copy(db, &backup)?;
                Some(backup)
            }
            None => None,
        };
        let export = MigrationReplayer::export_since(ledger, 0).await?;
        let export_path = artifact_dir.join("pre_cutover_ledger.json");
        fs::write(&export_path, serde_json::to_string_pretty(&export)?)?;

        // 3. Replay and verify.
        let transactions = legacy
            .transactions()
            .await
            .map_err(MigrateError::Source)?;
        let verified = MigrationReplayer::verify(&transactions, ledger, scales).await?;
        if !verified {
            self.writes_frozen = false;
            return Err(CutoverError::Migrate(MigrateError::ParityFailed {
                legacy: transactions.iter().map(|t| t.amount).sum(),
                ledger: rust_decimal::Decimal::ZERO,
            }));
        }

        // 4. Flip.
        let marker = ledger.last_timestamp().await?;
        self.phase = CutoverPhase::DisableShadow;
        self.phase_entered = now;
        self.flags = FeatureFlags {
            mirror_writes: false,
            read_from_ledger: true,
            disable_legacy_writes: true,
        };
        tracing::info!("cutover: flags flipped, reads and writes on ledger");

        // 5. Unfreeze.
        self.writes_frozen = false;

        // 6. Smoke.
        let mut failures = Vec::new();

        let first = balance_export(ledger).await?;
        let second = balance_export(ledger).await?;
        if first != second {
            failures.push("balance export is not deterministic".to_string());
        }

        let diff = MigrationReplayer::diff_since(ledger, marker, &[]).await?;
        if !diff.is_empty() {
            failures.push(format!("unexpected transfers since marker: {}", diff.len()));
        }

        let report = slo.report();
        if !report.healthy() {
            failures.push(format!(
                "slo gates failing: latency_ok={} error_ok={} backlog_ok={} drift_ok={}",
                report.latency_ok, report.error_ok, report.backlog_ok, report.drift_ok
            ));
        }

        let artifacts = CutoverArtifacts {
            backup,
            ledger_export: export_path,
            marker,
        };

        if failures.is_empty() {
            tracing::info!("cutover: smoke passed");
            Ok((CutoverOutcome::Success, artifacts))
        } else {
            tracing::warn!(?failures, "cutover: smoke failed");
            Ok((CutoverOutcome::PartialSuccess { failures }, artifacts))
        }
    }

    /// Revert to the mirror configuration.
    ///
    /// The flag set is restored first — `read_from_ledger=false`,
    /// `disable_legacy_writes=false`, `mirror_writes=true` — then the
    /// ledger export to rebuild the legacy store from is produced. The
    /// caller owns the actual legacy write-back.
    pub async fn rollback(
        &mut self,
        ledger: &LedgerHandle,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExportedTransfer>, CutoverError> {
        self.flags = FeatureFlags::mirror();
        self.phase = CutoverPhase::Rollback;
        self.phase_entered = now;
        self.clean_days = 0;
        self.writes_frozen = false;
        tracing::warn!("cutover rolled back to mirror");

        Ok(MigrationReplayer::export_since(ledger, 0).await?)
    }
}

/// Deterministic per-account balance export used by the smoke check.
async fn balance_export(ledger: &LedgerHandle) -> Result<Vec<(String, i128)>, CutoverError> {
    let mut accounts = ledger.accounts().await?;
    accounts.sort_by_key(|a| a.id);
    Ok(accounts
        .iter()
        .map(|a| (format!("{:032x}", a.id), a.balance()))
        .collect())
}
