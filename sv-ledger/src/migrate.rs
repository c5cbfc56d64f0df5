//! Legacy-store migration.
//!
//! Bulk-copies accounts and then transactions from the legacy store into
//! the ledger, with an exact parity check at the end. Also provides the
//! cutover tooling: export-since-marker, diff-since-marker, and
//! replay-and-verify against an isolated sandbox store.

use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::account_id::account_id;
use crate::actor::LedgerHandle;
use crate::error::{CreateTransferError, LedgerError};
use crate::scale::AssetScaleRegistry;
use crate::store::LedgerStore;
use crate::types::{Account, Transfer};

/// Scale assigned to assets first seen during migration.
const MIGRATION_SCALE: u32 = 8;

/// Business code stamped on replayed transfers.
const CODE_MIGRATION: u16 = 9;

/// Connector error for legacy-store I/O.
pub type SourceError = Box<dyn Error + Send + Sync>;

/// A transaction as recorded by the legacy store.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LegacyTransaction {
    /// Legacy row id; replayed transfer ids are derived from it, so
    /// re-running a migration is idempotent.
    pub id: String,
    /// Exchange the position lives on.
    pub exchange: String,
    /// Asset symbol.
    pub asset: String,
    /// Signed amount in the asset's decimal units; positive = acquired.
    pub amount: Decimal,
    /// When the legacy store recorded it.
    pub timestamp: DateTime<Utc>,
}

/// Read access to the legacy store.
#[async_trait]
pub trait LegacyStore: Send + Sync {
    /// Every transaction, oldest first.
    async fn transactions(&self) -> Result<Vec<LegacyTransaction>, SourceError>;

    /// Sum of all transaction amounts, as the legacy store computes it.
    async fn total(&self) -> Result<Decimal, SourceError>;
}

/// Migration failures.
#[derive(Debug)]
pub enum MigrateError {
    /// The replayer only accepts an exact migration.
    NonZeroTolerance,
    /// Post-replay sums diverged.
    ParityFailed {
        /// Sum per the legacy store.
        legacy: Decimal,
        /// Sum per the ledger.
        ledger: Decimal,
    },
    /// A legacy amount did not fit the asset's scale.
    BadAmount(String),
    /// Legacy store I/O failed.
    Source(SourceError),
    /// The ledger rejected a replayed transfer.
    Rejected {
        /// Legacy transaction id.
        id: String,
        /// Store error code.
        error: CreateTransferError,
    },
    /// The ledger actor is unavailable.
    Ledger(LedgerError),
}

impl fmt::Display for MigrateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrateError::NonZeroTolerance => {
                write!(f, "migration tolerance must be zero")
            }
            MigrateError::ParityFailed { legacy, ledger } => {
                write!(f, "parity_failed: legacy sum {} != ledger sum {}", legacy, ledger)
            }
            MigrateError::BadAmount(id) => write!(f, "legacy amount out of scale: {}", id),
            MigrateError::Source(e) => write!(f, "legacy store error: {}", e),
            MigrateError::Rejected { id, error } => {
                write!(f, "ledger rejected legacy transaction {}: {}", id, error)
            }
            MigrateError::Ledger(e) => write!(f, "ledger error: {}", e),
        }
    }
}

impl Error for MigrateError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MigrateError::Source(e) => Some(e.as_ref()),
            MigrateError::Ledger(e) => Some(e),
            _ => None,
        }
    }
}

impl From<LedgerError> for MigrateError {
    fn from(err: LedgerError) -> Self {
        MigrateError::Ledger(err)
    }
}

/// Counters from a completed replay.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReplayStats {
    /// Accounts created (funding accounts included).
    pub accounts_created: usize,
    /// Transfers applied.
    pub transfers_applied: usize,
    /// Transfers skipped because an identical id already existed.
    pub duplicates_skipped: usize,
}

/// A ledger transfer in export form, ISO-8601 timestamps and hex ids.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct ExportedTransfer {
    /// Transfer id, 32 hex digits.
    pub id: String,
    /// Debit account id, 32 hex digits.
    pub debit_account: String,
    /// Credit account id, 32 hex digits.
    pub credit_account: String,
    /// Amount in integer units at the ledger's scale.
    pub amount: String,
    /// Ledger number.
    pub ledger: u32,
    /// Business code.
    pub code: u16,
    /// Commit time.
    pub timestamp: DateTime<Utc>,
}

impl ExportedTransfer {
    fn from_transfer(t: &Transfer) -> Self {
        let secs = (t.timestamp / 1_000_000_000) as i64;
        let nanos = (t.timestamp % 1_000_000_000) as u32;
        Self {
            id: format!("{:032x}", t.id),
            debit_account: format!("{:032x}", t.debit_account),
            credit_account: format!("{:032x}", t.credit_account),
            amount: t.amount.to_string(),
            ledger: t.ledger,
            code: t.code,
            timestamp: Utc
                .timestamp_opt(secs, nanos)
                .single()
                .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().unwrap_or_default()),
        }
    }
}

/// Derive the deterministic transfer id for a legacy transaction.
fn replay_transfer_id(legacy_id: &str) -> u128 {
    let name = format!("migration:{}", legacy_id.to_lowercase());
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).as_u128()
}

/// The funding counter-account absorbing replayed value for an exchange.
fn funding_account(exchange: &str, asset: &str) -> u128 {
    account_id(exchange, &format!("{}.EXTERNAL", asset), None)
}

/// Bulk copier from the legacy store into the ledger.
pub struct MigrationReplayer;

impl MigrationReplayer {
    /// Replay the whole legacy store into the ledger.
    ///
    /// `tolerance` must be zero; migration is exact or it fails. Assets
    /// unknown to the registry are registered at the migration scale
    /// under the explicit migration override.
    pub async fn replay(
        legacy: &dyn LegacyStore,
        ledger: &LedgerHandle,
        scales: &mut AssetScaleRegistry,
        tolerance: Decimal,
    ) -> Result<ReplayStats, MigrateError> {
        if tolerance != Decimal::ZERO {
            return Err(MigrateError::NonZeroTolerance);
        }

        let transactions = legacy.transactions().await.map_err(MigrateError::Source)?;
        let mut stats = ReplayStats::default();

        // Accounts first: one asset account and one funding account per
        // observed (exchange, asset) pair.
        let mut pairs: BTreeSet<(String, String)> = BTreeSet::new();
        for tx in &transactions {
            pairs.insert((tx.exchange.clone(), tx.asset.to_uppercase()));
        }

        let mut batch = Vec::new();
        for (exchange, asset) in &pairs {
            let ledger_id = scales
                .register(asset, MIGRATION_SCALE, true)
                .map_err(MigrateError::Ledger)?;
            batch.push(Account::asset(account_id(exchange, asset, None), ledger_id));
            batch.push(Account::asset(funding_account(exchange, asset), ledger_id));
        }
        let created = batch.len();
        let errors = ledger.create_accounts(batch).await?;
        // Existing accounts are fine on a re-run; anything else is not.
        for row in &errors {
            if row.error != crate::CreateAccountError::AccountExists {
                return Err(MigrateError::Rejected {
                    id: format!("account[{}]", row.index),
                    error: CreateTransferError::InvalidTransfer,
                });
            }
        }
        stats.accounts_created = created - errors.len();

        // Then the transactions, one transfer each, oldest first.
        for tx in &transactions {
            let asset = tx.asset.to_uppercase();
            let entry = scales.get(&asset).map_err(MigrateError::Ledger)?;
            let magnitude = tx.amount.abs();
            let units = scales
                .to_units(&asset, magnitude)
                .map_err(MigrateError::Ledger)?
                .ok_or_else(|| MigrateError::BadAmount(tx.id.clone()))?;
            if units == 0 {
                // Zero-value rows carry no balance; nothing to replay.
                continue;
            }

            let holdings = account_id(&tx.exchange, &asset, None);
            let funding = funding_account(&tx.exchange, &asset);
            let (debit, credit) = if tx.amount.is_sign_negative() {
                (holdings, funding)
            } else {
                (funding, holdings)
            };

            let rows = ledger
                .create_transfers(vec![Transfer {
                    id: replay_transfer_id(&tx.id),
                    debit_account: debit,
                    credit_account: credit,
                    amount: units,
                    ledger: entry.ledger,
                    code: CODE_MIGRATION,
                    ..Default::default()
                }])
                .await?;

            match rows.first() {
                None => stats.transfers_applied += 1,
                Some(row) if row.error == CreateTransferError::DuplicateTransfer => {
                    stats.duplicates_skipped += 1;
                }
                Some(row) => {
                    return Err(MigrateError::Rejected {
                        id: tx.id.clone(),
                        error: row.error,
                    });
                }
            }
        }

        // Parity: the legacy sum must equal the ledger's holdings sum.
        let legacy_total = legacy.total().await.map_err(MigrateError::Source)?;
        let ledger_total = Self::holdings_total(ledger, scales, &pairs).await?;
        let divergence = (legacy_total - ledger_total).abs();
        if divergence > Decimal::new(1, 8) {
            return Err(MigrateError::ParityFailed {
                legacy: legacy_total,
                ledger: ledger_total,
            });
        }

        tracing::info!(
            accounts = stats.accounts_created,
            transfers = stats.transfers_applied,
            skipped = stats.duplicates_skipped,
            "migration replay complete"
        );
        Ok(stats)
    }

    /// Sum of holdings balances over the given (exchange, asset) pairs.
    async fn holdings_total(
        ledger: &LedgerHandle,
        scales: &AssetScaleRegistry,
        pairs: &BTreeSet<(String, String)>,
    ) -> Result<Decimal, MigrateError> {
        let mut total = Decimal::ZERO;
        for (exchange, asset) in pairs {
            let id = account_id(exchange, asset, None);
            let accounts = ledger.lookup_accounts(vec![id]).await?;
            let Some(account) = accounts.first() else {
                continue;
            };
            let balance = account.balance();
            let magnitude = scales
                .to_decimal(asset, balance.unsigned_abs())
                .map_err(MigrateError::Ledger)?;
            total += if balance < 0 { -magnitude } else { magnitude };
        }
        Ok(total)
    }

    /// Export every transfer committed strictly after the marker.
    pub async fn export_since(
        ledger: &LedgerHandle,
        marker: u64,
    ) -> Result<Vec<ExportedTransfer>, MigrateError> {
        let transfers = ledger.transfers_since(marker).await?;
        Ok(transfers.iter().map(ExportedTransfer::from_transfer).collect())
    }

    /// Ids present in exactly one of the baseline and the current
    /// since-marker export. Empty means nothing changed.
    pub async fn diff_since(
        ledger: &LedgerHandle,
        marker: u64,
        baseline: &[ExportedTransfer],
    ) -> Result<Vec<String>, MigrateError> {
        let current = Self::export_since(ledger, marker).await?;
        let baseline_ids: BTreeSet<&str> = baseline.iter().map(|t| t.id.as_str()).collect();
        let current_ids: BTreeSet<&str> = current.iter().map(|t| t.id.as_str()).collect();
        Ok(baseline_ids
            .symmetric_difference(&current_ids)
            .map(|id| id.to_string())
            .collect())
    }

    /// Replay the transaction list into an isolated sandbox store and
    /// compare per-(exchange, asset) totals with the live ledger.
    pub async fn verify(
        transactions: &[LegacyTransaction],
        ledger: &LedgerHandle,
        scales: &AssetScaleRegistry,
    ) -> Result<bool, MigrateError> {
        let mut sandbox = LedgerStore::new();
        let mut sandbox_scales = AssetScaleRegistry::new();
        let mut expected: BTreeMap<(String, String), Decimal> = BTreeMap::new();

        for tx in transactions {
            let asset = tx.asset.to_uppercase();
            let ledger_id = sandbox_scales
                .register(&asset, MIGRATION_SCALE, false)
                .map_err(MigrateError::Ledger)?;
            let holdings = account_id(&tx.exchange, &asset, None);
            let funding = funding_account(&tx.exchange, &asset);
            // Sandbox account creation is idempotent by construction.
            sandbox.create_accounts(&[
                Account::asset(holdings, ledger_id),
                Account::asset(funding, ledger_id),
            ]);

            let magnitude = tx.amount.abs();
            let units = sandbox_scales
                .to_units(&asset, magnitude)
                .map_err(MigrateError::Ledger)?
                .ok_or_else(|| MigrateError::BadAmount(tx.id.clone()))?;
            if units == 0 {
                continue;
            }
            let (debit, credit) = if tx.amount.is_sign_negative() {
                (holdings, funding)
            } else {
                (funding, holdings)
            };
            let rows = sandbox.create_transfers(&[Transfer {
                id: replay_transfer_id(&tx.id),
                debit_account: debit,
                credit_account: credit,
                amount: units,
                ledger: ledger_id,
                code: CODE_MIGRATION,
                ..Default::default()
            }]);
            if let Some(row) = rows.first() {
                if row.error != CreateTransferError::DuplicateTransfer {
                    return Err(MigrateError::Rejected {
                        id: tx.id.clone(),
                        error: row.error,
                    });
                }
            }
            expected.entry((tx.exchange.clone(), asset)).or_default();
        }

        for ((exchange, asset), slot) in expected.iter_mut() {
            let id = account_id(exchange, asset, None);
            let balance = sandbox
                .lookup_accounts(&[id])
                .first()
                .map(|a| a.balance())
                .unwrap_or(0);
            let magnitude = sandbox_scales
                .to_decimal(asset, balance.unsigned_abs())
                .map_err(MigrateError::Ledger)?;
            *slot = if balance < 0 { -magnitude } else { magnitude };
        }

        for ((exchange, asset), expected_total) in &expected {
            let id = account_id(exchange, asset, None);
            let accounts = ledger.lookup_accounts(vec![id]).await?;
            let balance = accounts.first().map(|a| a.balance()).unwrap_or(0);
            let magnitude = scales
                .to_decimal(asset, balance.unsigned_abs())
                .map_err(MigrateError::Ledger)?;
            let actual = if balance < 0 { -magnitude } else { magnitude };
            if actual != *expected_total {
                tracing::warn!(
                    exchange,
                    asset,
                    %expected_total,
                    %actual,
                    "verify mismatch"
                );
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor;
    use std::str::FromStr;

    struct FixedLegacy {
        transactions: Vec<LegacyTransaction>,
    }

    #[async_trait]
    impl LegacyStore for FixedLegacy {
        async fn transactions(&self) -> Result<Vec<LegacyTransaction>, SourceError> {
            Ok(self.transactions.clone())
        }

        async fn total(&self) -> Result<Decimal, SourceError> {
            Ok(self.transactions.iter().map(|t| t.amount).sum())
        }
    }

    fn tx(id: &str, amount: &str) -> LegacyTransaction {
        LegacyTransaction {
            id: id.to_string(),
            exchange: "kraken".into(),
            asset: "USD".into(),
            amount: Decimal::from_str(amount).unwrap(),
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).single().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_replay_parity_exact() {
        // 1000 rows of $12.34567 each: $12,345.67 exactly.
        let transactions: Vec<LegacyTransaction> =
            (0..1000).map(|i| tx(&format!("row-{}", i), "12.34567")).collect();
        let legacy = FixedLegacy {
            transactions: transactions.clone(),
        };
        assert_eq!(
            legacy.total().await.unwrap(),
            Decimal::from_str("12345.67").unwrap()
        );

        let ledger = actor::spawn(LedgerStore::new());
        let mut scales = AssetScaleRegistry::new();
        scales.freeze(); // migration override must still work

        let stats = MigrationReplayer::replay(&legacy, &ledger, &mut scales, Decimal::ZERO)
            .await
            .unwrap();
        assert_eq!(stats.transfers_applied, 1000);
        assert_eq!(stats.accounts_created, 2);

        // Re-run is idempotent.
        let stats = MigrationReplayer::replay(&legacy, &ledger, &mut scales, Decimal::ZERO)
            .await
            .unwrap();
        assert_eq!(stats.transfers_applied, 0);
        assert_eq!(stats.duplicates_skipped, 1000);

        assert!(
            MigrationReplayer::verify(&transactions, &ledger, &scales)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_nonzero_tolerance_rejected() {
        let legacy = FixedLegacy {
            transactions: vec![],
        };
        let ledger = actor::spawn(LedgerStore::new());
        let mut scales = AssetScaleRegistry::new();
        let err =
            MigrationReplayer::replay(&legacy, &ledger, &mut scales, Decimal::new(1, 2))
                .await
                .unwrap_err();
        assert!(matches!(err, MigrateError::NonZeroTolerance));
    }

    #[tokio::test]
    async fn test_verify_detects_divergence() {
        let transactions = vec![tx("a", "100"), tx("b", "-25.5")];
        let legacy = FixedLegacy {
            transactions: transactions.clone(),
        };
        let ledger = actor::spawn(LedgerStore::new());
        let mut scales = AssetScaleRegistry::new();
        MigrationReplayer::replay(&legacy, &ledger, &mut scales, Decimal::ZERO)
            .await
            .unwrap();

        // Clean verify first.
        assert!(MigrationReplayer::verify(&transactions, &ledger, &scales)
            .await
            .unwrap());

        // An extra ledger transfer breaks per-pair parity.
        let holdings = account_id("kraken", "USD", None);
        let funding = funding_account("kraken", "USD");
        ledger
            .create_transfers(vec![Transfer {
                id: crate::transfer_id(),
                debit_account: funding,
                credit_account: holdings,
                amount: 1,
                ledger: scales.get("USD").unwrap().ledger,
                code: 1,
                ..Default::default()
            }])
            .await
            .unwrap();
        assert!(!MigrationReplayer::verify(&transactions, &ledger, &scales)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_export_and_diff_since() {
        let legacy = FixedLegacy {
            transactions: vec![tx("a", "10")],
        };
        let ledger = actor::spawn(LedgerStore::new());
        let mut scales = AssetScaleRegistry::new();
        MigrationReplayer::replay(&legacy, &ledger, &mut scales, Decimal::ZERO)
            .await
            .unwrap();

        let marker = 0;
        let baseline = MigrationReplayer::export_since(&ledger, marker).await.unwrap();
        assert_eq!(baseline.len(), 1);

        // Nothing new: empty diff.
        let diff = MigrationReplayer::diff_since(&ledger, marker, &baseline)
            .await
            .unwrap();
        assert!(diff.is_empty());

        // One more transfer shows up in the diff.
        let holdings = account_id("kraken", "USD", None);
        let funding = funding_account("kraken", "USD");
        ledger
            .create_transfers(vec![Transfer {
                id: crate::transfer_id(),
                debit_account: funding,
                credit_account: holdings,
                amount: 5,
                ledger: scales.get("USD").unwrap().ledger,
                code: 1,
                ..Default::default()
            }])
            .await
            .unwrap();
        let diff = MigrationReplayer::diff_since(&ledger, marker, &baseline)
            .await
            .unwrap();
        assert_eq!(diff.len(), 1);
    }
}
