//! Legacy-store fixtures.
//!
//! The migration subcommands read the legacy store as a JSON file of
//! transactions; `gen` produces synthetic ones for rehearsals.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use sv_ledger::migrate::{LegacyStore, LegacyTransaction, SourceError};

/// A legacy store backed by a JSON transaction file.
pub struct FileLegacyStore {
    path: PathBuf,
    transactions: Vec<LegacyTransaction>,
}

impl FileLegacyStore {
    /// Load the transaction file.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let raw = std::fs::read_to_string(&path)?;
        let transactions: Vec<LegacyTransaction> = serde_json::from_str(&raw)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Self { path, transactions })
    }

    /// The backing file path (used for the byte-exact cutover backup).
    pub fn db_path(&self) -> &Path {
        &self.path
    }

    /// Borrow the loaded transactions.
    pub fn records(&self) -> &[LegacyTransaction] {
        &self.transactions
    }
}

#[async_trait]
impl LegacyStore for FileLegacyStore {
    async fn transactions(&self) -> Result<Vec<LegacyTransaction>, SourceError> {
        Ok(self.transactions.clone())
    }

    async fn total(&self) -> Result<Decimal, SourceError> {
        Ok(self.transactions.iter().map(|t| t.amount).sum())
    }
}

/// Generate synthetic legacy transactions for migration rehearsal.
pub fn generate(count: usize, exchanges: &[&str], assets: &[&str], seed_hint: u64) -> Vec<LegacyTransaction> {
    let mut rng = rand::rng();
    let base = Utc
        .timestamp_opt(1_700_000_000, 0)
        .single()
        .unwrap_or_default();

    (0..count)
        .map(|i| {
            let exchange = exchanges[rng.random_range(0..exchanges.len())];
            let asset = assets[rng.random_range(0..assets.len())];
            // Scale-8 amounts; buys outnumber sells and sells are
            // smaller, so rehearsal balances stay positive.
            let amount = if rng.random_range(0..4) == 0 {
                -Decimal::new(rng.random_range(1..12_500_000), 8)
            } else {
                Decimal::new(rng.random_range(1..50_000_000), 8)
            };
            LegacyTransaction {
                id: format!("gen-{}-{}", seed_hint, i),
                exchange: exchange.to_string(),
                asset: asset.to_string(),
                amount,
                timestamp: base + chrono::Duration::seconds(i as i64 * 60),
            }
        })
        .collect()
}

/// Write transactions as pretty JSON.
pub fn write_fixture(path: impl AsRef<Path>, transactions: &[LegacyTransaction]) -> io::Result<()> {
    let json = serde_json::to_string_pretty(transactions)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    std::fs::write(path, json)
}
