//! The automation loop.
//!
//! Holds the single-instance lock, owns the ledger actor and its guard
//! pipeline, and publishes portfolio state on the bus every interval.
//! `EXECUTIONENGINE_WRITES=false` pauses ledger writes without stopping
//! the publisher.

use std::collections::BTreeMap;
use std::error::Error;
use std::path::Path;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::Utc;
use sv_ledger::ingest::{IngestEvent, IngestPipeline};
use sv_ledger::slo::SloMonitor;
use sv_ledger::{account_id, Account, AssetScaleRegistry, LedgerStore, Transfer};
use sv_tui::publisher::StatePublisher;
use sv_tui::update::{Balance, EngineState, FrameKind, Update, UpdateData};

/// Assets the paper portfolio tracks, with their scales.
const ASSETS: [(&str, u32); 4] = [("USD", 2), ("USDC", 6), ("BTC", 8), ("ETH", 18)];

const EXCHANGE: &str = "kraken";

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Whether the pause gate allows ledger writes.
fn writes_enabled() -> bool {
    !matches!(
        std::env::var("EXECUTIONENGINE_WRITES").ok().as_deref(),
        Some("false")
    )
}

/// Run the automation loop until Ctrl-C.
pub async fn run(mode: &str, socket: &Path, interval_secs: u64) -> Result<(), Box<dyn Error>> {
    let _lock = crate::automation::PidLock::acquire(crate::automation::PID_FILE)?;

    let mut scales = AssetScaleRegistry::new();
    let mut ledgers = BTreeMap::new();
    for (asset, scale) in ASSETS {
        ledgers.insert(asset, scales.register(asset, scale, false)?);
    }
    scales.freeze();

    let ledger = sv_ledger::actor::spawn(LedgerStore::new());

    // One holdings account and one funding account per asset; funds are
    // seeded from funding so balances start non-zero.
    let mut accounts = Vec::new();
    for (asset, _) in ASSETS {
        accounts.push(Account::asset(
            account_id(EXCHANGE, asset, None),
            ledgers[asset],
        ));
        accounts.push(Account::asset(
            account_id(EXCHANGE, &format!("{}.EXTERNAL", asset), None),
            ledgers[asset],
        ));
    }
    let errors = ledger.create_accounts(accounts).await?;
    if !errors.is_empty() {
        return Err(format!("bootstrap accounts rejected: {:?}", errors).into());
    }

    let pipeline = IngestPipeline::new(ledger.clone());
    let mut slo = SloMonitor::default();
    let publisher = StatePublisher::bind(socket).await?;

    let mut state = crate::automation::AutomationState::started(mode, Utc::now());
    state.save(crate::automation::STATE_FILE)?;

    let mut tick = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    let mut error_count = 0u64;
    let mut round = 0u64;

    tracing::info!(mode, socket = %socket.display(), "automation started");
    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
        }
        round += 1;

        if writes_enabled() {
            let started = Instant::now();
            let outcome = pipeline
                .apply(rebalance_event(&ledgers, round))
                .await;
            slo.record_latency(started.elapsed());
            slo.record_outcome(outcome.is_ok());
            if let Err(err) = outcome {
                error_count += 1;
                tracing::warn!(error = %err, "rebalance rejected");
            }
        } else {
            tracing::debug!("writes paused by EXECUTIONENGINE_WRITES");
        }

        let update = portfolio_update(
            mode,
            &ledger,
            &scales,
            &pipeline,
            error_count,
            round,
            interval_secs,
        )
        .await?;
        publisher.publish(
            if round == 1 {
                FrameKind::InitialRender
            } else {
                FrameKind::UpdateRender
            },
            update,
        )?;

        state.last_execution_time = Some(Utc::now());
        state.next_execution_time =
            Some(Utc::now() + chrono::Duration::seconds(interval_secs as i64));
        state.save(crate::automation::STATE_FILE)?;

        let report = slo.report();
        pipeline.observe_load(report.p99_latency, report.backlog);
        if !report.healthy() {
            tracing::warn!(?report, "slo objectives failing");
        }
    }

    state.is_running = false;
    state.save(crate::automation::STATE_FILE)?;
    tracing::info!("automation stopped");
    Ok(())
}

/// The demo rebalance: drip funding into holdings so every tick moves
/// value through the guarded write path.
fn rebalance_event(ledgers: &BTreeMap<&str, u32>, round: u64) -> IngestEvent {
    let asset = ASSETS[(round % ASSETS.len() as u64) as usize].0;
    let holdings = account_id(EXCHANGE, asset, None);
    let funding = account_id(EXCHANGE, &format!("{}.EXTERNAL", asset), None);
    IngestEvent {
        source: "automation".into(),
        event_id: Some(format!("round-{}", round)),
        transfers: vec![Transfer {
            id: sv_ledger::transfer_id(),
            debit_account: funding,
            credit_account: holdings,
            amount: 1_000 + round as u128,
            ledger: ledgers[asset],
            code: 1,
            ..Default::default()
        }],
    }
}

async fn portfolio_update(
    mode: &str,
    ledger: &sv_ledger::actor::LedgerHandle,
    scales: &AssetScaleRegistry,
    pipeline: &IngestPipeline,
    error_count: u64,
    round: u64,
    interval_secs: u64,
) -> Result<Update, Box<dyn Error>> {
    let mut balances = Vec::new();
    let mut prices = BTreeMap::new();
    for (asset, _) in ASSETS {
        let id = account_id(EXCHANGE, asset, None);
        let accounts = ledger.lookup_accounts(vec![id]).await?;
        let Some(account) = accounts.first() else {
            continue;
        };
        let scale = scales.get(asset)?.scale;
        let unit = 10f64.powi(scale as i32);
        balances.push(Balance {
            exchange: EXCHANGE.to_string(),
            asset: asset.to_string(),
            available: account.available() as f64 / unit,
            total: account.balance() as f64 / unit,
        });
        prices.insert(asset.to_string(), mock_price(asset, round));
    }

    Ok(Update {
        seq: 0, // assigned by the publisher
        ts: now_ms(),
        state: EngineState {
            mode: mode.to_string(),
            running: true,
        },
        data: UpdateData {
            balances,
            recent_trades: Vec::new(),
            prices,
            swap_evals: Vec::new(),
            error_count,
            circuit_breaker_open: pipeline.breaker_open(),
            last_exec_ts: Some(now_ms()),
            next_exec_ts: Some(now_ms() + interval_secs * 1_000),
        },
    })
}

/// A slowly drifting mock price; real quotes come from exchange
/// connectors outside this binary.
fn mock_price(asset: &str, round: u64) -> f64 {
    let base = match asset {
        "BTC" => 64_000.0,
        "ETH" => 3_400.0,
        _ => 1.0,
    };
    base * (1.0 + ((round % 60) as f64 - 30.0) / 10_000.0)
}
