//! Drift reconciliation against exchange snapshots.
//!
//! Each sweep fetches `(asset, balance)` snapshots from every configured
//! connector and compares them with the ledger's view of the matching
//! account. Connector failures are logged and skipped; they never abort
//! the sweep.

use async_trait::async_trait;

use crate::account_id::account_id;
use crate::actor::LedgerHandle;
use crate::error::LedgerError;
use crate::scale::AssetScaleRegistry;

/// One balance as reported by an external source.
#[derive(Clone, Debug, PartialEq)]
pub struct AssetBalance {
    /// Asset symbol.
    pub asset: String,
    /// Total balance in the asset's own decimal units.
    pub balance: f64,
}

/// Connector error string; connectors are external collaborators and
/// their failures are only ever logged.
pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

/// An external source of truth for account balances.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    /// Connector name; also the exchange component of the account id.
    fn name(&self) -> &str;

    /// Fetch the current balance snapshot.
    async fn fetch_balances(&self) -> Result<Vec<AssetBalance>, SourceError>;
}

/// Incident severity.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DriftSeverity {
    /// Over the threshold.
    Warning,
    /// Over ten times the threshold.
    Critical,
}

/// One detected divergence.
#[derive(Clone, Debug)]
pub struct DriftIncident {
    /// Connector that reported the external balance.
    pub source: String,
    /// Asset in question.
    pub asset: String,
    /// Balance per the external source.
    pub external: f64,
    /// Balance per the ledger.
    pub ledger: f64,
    /// Absolute difference.
    pub drift: f64,
    /// Severity class.
    pub severity: DriftSeverity,
}

/// Reconciler configuration.
#[derive(Clone, Copy, Debug)]
pub struct ReconcilerConfig {
    /// Drift above which an incident is emitted.
    pub threshold: f64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self { threshold: 1e-8 }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Default)]
pub struct SweepOutcome {
    /// Incidents found, worst drift first.
    pub incidents: Vec<DriftIncident>,
    /// Connectors that failed and were skipped.
    pub failed_sources: Vec<String>,
    /// Balances compared.
    pub compared: usize,
}

impl SweepOutcome {
    /// Largest drift seen, zero when clean.
    pub fn max_drift(&self) -> f64 {
        self.incidents.first().map(|i| i.drift).unwrap_or(0.0)
    }
}

/// Periodic drift checker.
pub struct Reconciler {
    config: ReconcilerConfig,
    sources: Vec<Box<dyn BalanceSource>>,
    /// Consecutive sweeps with zero incidents (feeds the cutover gate).
    clean_streak: u32,
}

impl Reconciler {
    /// Create a reconciler over the given connectors.
    pub fn new(config: ReconcilerConfig, sources: Vec<Box<dyn BalanceSource>>) -> Self {
        Self {
            config,
            sources,
            clean_streak: 0,
        }
    }

    /// Run one sweep against the ledger.
    pub async fn sweep(
        &mut self,
        ledger: &LedgerHandle,
        scales: &AssetScaleRegistry,
    ) -> Result<SweepOutcome, LedgerError> {
        let mut outcome = SweepOutcome::default();

        for source in &self.sources {
            let balances = match source.fetch_balances().await {
                Ok(balances) => balances,
                Err(err) => {
                    tracing::warn!(source = source.name(), error = %err, "connector fetch failed, skipping");
                    outcome.failed_sources.push(source.name().to_string());
                    continue;
                }
            };

            for snapshot in balances {
                let id = account_id(source.name(), &snapshot.asset, None);
                let accounts = ledger.lookup_accounts(vec![id]).await?;
                let ledger_units = accounts.first().map(|a| a.balance()).unwrap_or(0);
                let scale = match scales.get(&snapshot.asset) {
                    Ok(entry) => entry.scale,
                    Err(_) => {
                        tracing::warn!(asset = %snapshot.asset, "snapshot for unregistered asset, skipping");
                        continue;
                    }
                };
                let ledger_balance = ledger_units as f64 / 10f64.powi(scale as i32);

                outcome.compared += 1;
                let drift = (snapshot.balance - ledger_balance).abs();
                if drift > self.config.threshold {
                    let severity = if drift > 10.0 * self.config.threshold {
                        DriftSeverity::Critical
                    } else {
                        DriftSeverity::Warning
                    };
                    tracing::warn!(
                        source = source.name(),
                        asset = %snapshot.asset,
                        drift,
                        ?severity,
                        "reconciliation drift"
                    );
                    outcome.incidents.push(DriftIncident {
                        source: source.name().to_string(),
                        asset: snapshot.asset,
                        external: snapshot.balance,
                        ledger: ledger_balance,
                        drift,
                        severity,
                    });
                }
            }
        }

        outcome
            .incidents
            .sort_by(|a, b| b.drift.partial_cmp(&a.drift).unwrap_or(std::cmp::Ordering::Equal));

        if outcome.incidents.is_empty() && outcome.failed_sources.is_empty() {
            self.clean_streak += 1;
        } else if !outcome.incidents.is_empty() {
            self.clean_streak = 0;
        }

        Ok(outcome)
    }

    /// Consecutive fully clean sweeps.
    pub fn clean_streak(&self) -> u32 {
        self.clean_streak
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LedgerStore;
    use crate::types::{Account, Transfer};
    use crate::{actor, transfer_id};

    struct FixedSource {
        name: String,
        balances: Result<Vec<AssetBalance>, String>,
    }

    #[async_trait]
    impl BalanceSource for FixedSource {
        fn name(&self) -> &str {
            &self.name
        }

        async fn fetch_balances(&self) -> Result<Vec<AssetBalance>, SourceError> {
            match &self.balances {
                Ok(balances) => Ok(balances.clone()),
                Err(msg) => Err(msg.clone().into()),
            }
        }
    }

    async fn funded_ledger(scales: &mut AssetScaleRegistry) -> LedgerHandle {
        let btc_ledger = scales.register("BTC", 8, false).unwrap();
        let ledger = actor::spawn(LedgerStore::new());
        let holdings = account_id("kraken", "BTC", None);
        let external = account_id("kraken", "EXTERNAL", None);
        ledger
            .create_accounts(vec![
                Account::asset(holdings, btc_ledger),
                Account::asset(external, btc_ledger),
            ])
            .await
            .unwrap();
        // 1.5 BTC at scale 8.
        ledger
            .create_transfers(vec![Transfer {
                id: transfer_id(),
                debit_account: external,
                credit_account: holdings,
                amount: 150_000_000,
                ledger: btc_ledger,
                code: 1,
                ..Default::default()
            }])
            .await
            .unwrap();
        ledger
    }

    #[tokio::test]
    async fn test_clean_sweep() {
        let mut scales = AssetScaleRegistry::new();
        let ledger = funded_ledger(&mut scales).await;

        let mut reconciler = Reconciler::new(
            ReconcilerConfig::default(),
            vec![Box::new(FixedSource {
                name: "kraken".into(),
                balances: Ok(vec![AssetBalance {
                    asset: "BTC".into(),
                    balance: 1.5,
                }]),
            })],
        );

        let outcome = reconciler.sweep(&ledger, &scales).await.unwrap();
        assert!(outcome.incidents.is_empty());
        assert_eq!(outcome.compared, 1);
        assert_eq!(reconciler.clean_streak(), 1);
    }

    #[tokio::test]
    async fn test_drift_severity() {
        let mut scales = AssetScaleRegistry::new();
        let ledger = funded_ledger(&mut scales).await;

        let config = ReconcilerConfig { threshold: 0.01 };
        let mut reconciler = Reconciler::new(
            config,
            vec![Box::new(FixedSource {
                name: "kraken".into(),
                balances: Ok(vec![
                    AssetBalance {
                        asset: "BTC".into(),
                        balance: 1.52, // drift 0.02: warning
                    },
                ]),
            })],
        );
        let outcome = reconciler.sweep(&ledger, &scales).await.unwrap();
        assert_eq!(outcome.incidents.len(), 1);
        assert_eq!(outcome.incidents[0].severity, DriftSeverity::Warning);
        assert_eq!(reconciler.clean_streak(), 0);

        let mut reconciler = Reconciler::new(
            config,
            vec![Box::new(FixedSource {
                name: "kraken".into(),
                balances: Ok(vec![AssetBalance {
                    asset: "BTC".into(),
                    balance: 2.0, // drift 0.5 > 10 * threshold: critical
                }]),
            })],
        );
        let outcome = reconciler.sweep(&ledger, &scales).await.unwrap();
        assert_eq!(outcome.incidents[0].severity, DriftSeverity::Critical);
    }

    #[tokio::test]
    async fn test_connector_failure_does_not_abort() {
        let mut scales = AssetScaleRegistry::new();
        let ledger = funded_ledger(&mut scales).await;

        let mut reconciler = Reconciler::new(
            ReconcilerConfig::default(),
            vec![
                Box::new(FixedSource {
                    name: "downed".into(),
                    balances: Err("connection refused".into()),
                }),
                Box::new(FixedSource {
                    name: "kraken".into(),
                    balances: Ok(vec![AssetBalance {
                        asset: "BTC".into(),
                        balance: 1.5,
                    }]),
                }),
            ],
        );

        let outcome = reconciler.sweep(&ledger, &scales).await.unwrap();
        assert_eq!(outcome.failed_sources, vec!["downed".to_string()]);
        assert_eq!(outcome.compared, 1);
        assert!(outcome.incidents.is_empty());
        // Failed connector keeps the streak from advancing but does not
        // reset it.
        assert_eq!(reconciler.clean_streak(), 0);
    }

    #[tokio::test]
    async fn test_missing_account_reads_as_zero() {
        let mut scales = AssetScaleRegistry::new();
        scales.register("ETH", 18, false).unwrap();
        let ledger = actor::spawn(LedgerStore::new());

        let mut reconciler = Reconciler::new(
            ReconcilerConfig::default(),
            vec![Box::new(FixedSource {
                name: "kraken".into(),
                balances: Ok(vec![AssetBalance {
                    asset: "ETH".into(),
                    balance: 3.0,
                }]),
            })],
        );
        let outcome = reconciler.sweep(&ledger, &scales).await.unwrap();
        assert_eq!(outcome.incidents.len(), 1);
        assert!((outcome.incidents[0].drift - 3.0).abs() < 1e-12);
    }
}
