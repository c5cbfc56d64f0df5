//! State-bus payload types.
//!
//! Frames on the bus are newline-delimited JSON. All field names are
//! camelCase on the wire; u128-sized values never appear (balances and
//! prices are display-rounded floats by the time they reach the UI).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Envelope kind for a bus frame.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum FrameKind {
    /// First payload after a subscriber connects.
    #[serde(rename = "initialRender")]
    InitialRender,
    /// Periodic full-state refresh.
    #[serde(rename = "updateRender")]
    UpdateRender,
    /// Engine mode or run-state change.
    #[serde(rename = "stateChange")]
    StateChange,
    /// Partial refresh after a delta.
    #[serde(rename = "diffRender")]
    DiffRender,
}

/// One frame on the bus.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Frame {
    /// Envelope kind.
    #[serde(rename = "type")]
    pub kind: FrameKind,
    /// The payload.
    #[serde(flatten)]
    pub update: Update,
}

/// A published state snapshot.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Update {
    /// Strictly monotonic per publisher run.
    pub seq: u64,
    /// Publish time, milliseconds since the epoch.
    pub ts: u64,
    /// Engine run state.
    pub state: EngineState,
    /// Portfolio data.
    pub data: UpdateData,
}

/// Engine run state.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineState {
    /// Execution mode label (e.g. "paper", "live").
    pub mode: String,
    /// Whether the automation loop is running.
    pub running: bool,
}

/// Portfolio data carried by an update.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateData {
    /// Balances per (exchange, asset).
    pub balances: Vec<Balance>,
    /// Most recent trades, newest first, bounded by the publisher.
    pub recent_trades: Vec<Trade>,
    /// Spot prices by symbol.
    pub prices: BTreeMap<String, f64>,
    /// Latest swap evaluations.
    pub swap_evals: Vec<SwapEval>,
    /// Errors observed since start.
    pub error_count: u64,
    /// Whether the ledger write breaker is open.
    pub circuit_breaker_open: bool,
    /// Last automation execution, epoch ms.
    pub last_exec_ts: Option<u64>,
    /// Next scheduled execution, epoch ms.
    pub next_exec_ts: Option<u64>,
}

/// A balance row.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    /// Exchange name.
    pub exchange: String,
    /// Asset symbol.
    pub asset: String,
    /// Spendable amount.
    pub available: f64,
    /// Total amount including reservations.
    pub total: f64,
}

/// A recent trade row.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    /// Execution time, epoch ms.
    pub ts: u64,
    /// Exchange name.
    pub exchange: String,
    /// Trading pair, e.g. "BTC/USDC".
    pub pair: String,
    /// "buy" or "sell".
    pub side: String,
    /// Base amount.
    pub amount: f64,
    /// Execution price.
    pub price: f64,
}

/// One swap evaluation row.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapEval {
    /// Asset to swap out of.
    pub from: String,
    /// Asset to swap into.
    pub to: String,
    /// Opportunity score.
    pub score: f64,
    /// Whether the swap was executed.
    pub executed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_field_names_are_camel_case() {
        let frame = Frame {
            kind: FrameKind::UpdateRender,
            update: Update {
                seq: 7,
                ts: 1_700_000_000_000,
                state: EngineState {
                    mode: "paper".into(),
                    running: true,
                },
                data: UpdateData {
                    error_count: 2,
                    circuit_breaker_open: false,
                    last_exec_ts: Some(1),
                    ..Default::default()
                },
            },
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"updateRender\""));
        assert!(json.contains("\"errorCount\":2"));
        assert!(json.contains("\"circuitBreakerOpen\":false"));
        assert!(json.contains("\"lastExecTs\":1"));
        assert!(!json.contains("error_count"));
    }

    #[test]
    fn test_frame_roundtrip() {
        let frame = Frame {
            kind: FrameKind::InitialRender,
            update: Update {
                seq: 1,
                ts: 2,
                state: EngineState::default(),
                data: UpdateData {
                    balances: vec![Balance {
                        exchange: "kraken".into(),
                        asset: "BTC".into(),
                        available: 0.5,
                        total: 0.75,
                    }],
                    ..Default::default()
                },
            },
        };
        let json = serde_json::to_string(&frame).unwrap();
        let back: Frame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame);
    }
}
