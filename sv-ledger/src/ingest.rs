//! Ingest write path.
//!
//! Every externally-sourced event passes, in order, the idempotency gate,
//! the backpressure throttle, and the circuit breaker before reaching the
//! ledger actor. Rejections are per-event and never abort the caller's
//! task.

use std::sync::Mutex;
use std::time::Duration;

use crate::actor::LedgerHandle;
use crate::breaker::{BreakerConfig, CircuitBreaker};
use crate::error::IngestError;
use crate::idempotency::IdempotencyGate;
use crate::throttle::{BackpressureThrottle, ThrottleConfig};
use crate::types::Transfer;

/// An externally-sourced batch of transfers.
#[derive(Clone, Debug)]
pub struct IngestEvent {
    /// Originating system, e.g. an exchange connector name.
    pub source: String,
    /// Source-assigned event id; `None` skips the idempotency gate.
    pub event_id: Option<String>,
    /// Transfers to apply as one batch.
    pub transfers: Vec<Transfer>,
}

/// The guarded write path in front of the ledger actor.
pub struct IngestPipeline {
    ledger: LedgerHandle,
    gate: IdempotencyGate,
    breaker: Mutex<CircuitBreaker>,
    throttle: Mutex<BackpressureThrottle>,
}

impl IngestPipeline {
    /// Build a pipeline with default guard tuning.
    pub fn new(ledger: LedgerHandle) -> Self {
        Self::with_config(ledger, BreakerConfig::default(), ThrottleConfig::default())
    }

    /// Build a pipeline with explicit guard tuning.
    pub fn with_config(
        ledger: LedgerHandle,
        breaker: BreakerConfig,
        throttle: ThrottleConfig,
    ) -> Self {
        Self {
            ledger,
            gate: IdempotencyGate::new(),
            breaker: Mutex::new(CircuitBreaker::new(breaker)),
            throttle: Mutex::new(BackpressureThrottle::new(throttle)),
        }
    }

    /// Apply one event. At most one call per `(source, event_id)` reaches
    /// the ledger within the gate's cap window.
    pub async fn apply(&self, event: IngestEvent) -> Result<(), IngestError> {
        if let Some(event_id) = &event.event_id {
            if !self.gate.verify_unique(&event.source, event_id) {
                return Err(IngestError::DuplicateEvent);
            }
        }

        if self.throttle.lock().unwrap_or_else(|e| e.into_inner()).is_throttled() {
            return Err(IngestError::Backpressure);
        }

        if !self
            .breaker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .can_attempt()
        {
            return Err(IngestError::BreakerOpen);
        }

        match self.ledger.create_transfers(event.transfers).await {
            Ok(rows) => {
                // Business rejections are a completed write attempt; only
                // actor failures count against the breaker.
                self.breaker
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .record_success();
                if rows.is_empty() {
                    Ok(())
                } else {
                    Err(IngestError::Rejected(rows))
                }
            }
            Err(err) => {
                self.breaker
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .record_failure();
                Err(err.into())
            }
        }
    }

    /// Feed the throttle the latest load sample.
    pub fn observe_load(&self, p99_latency: Duration, backlog_depth: usize) {
        self.throttle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .update(p99_latency, backlog_depth);
    }

    /// Whether the breaker is currently open (for the state bus).
    pub fn breaker_open(&self) -> bool {
        self.breaker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_open()
    }

    /// The ledger handle behind this pipeline.
    pub fn ledger(&self) -> &LedgerHandle {
        &self.ledger
    }
}
