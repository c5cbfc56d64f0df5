//! Service-level objective monitoring.
//!
//! Rolling windows over write latency, error outcomes, backlog depth, and
//! reconciliation drift. Gates consume the report; nothing here touches
//! the write path directly.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// SLO thresholds and window sizes.
#[derive(Clone, Copy, Debug)]
pub struct SloConfig {
    /// p95 write latency objective.
    pub p95_latency: Duration,
    /// Error-rate objective over the error window.
    pub error_rate: f64,
    /// Backlog-depth objective.
    pub backlog: usize,
    /// Drift objective (intra-system units).
    pub drift: f64,
    /// Drift that pages immediately.
    pub page_drift: f64,
    /// Latency sample retention.
    pub latency_window: Duration,
    /// Error sample retention.
    pub error_window: Duration,
    /// How long p99 must stay over 100 ms before alerting.
    pub p99_sustain: Duration,
    /// How long the error rate must stay over 1 % before alerting.
    pub error_sustain: Duration,
}

impl Default for SloConfig {
    fn default() -> Self {
        Self {
            p95_latency: Duration::from_millis(10),
            error_rate: 0.005,
            backlog: 1_000,
            drift: 1e-8,
            page_drift: 0.01,
            latency_window: Duration::from_secs(3_600),
            error_window: Duration::from_secs(60),
            p99_sustain: Duration::from_secs(300),
            error_sustain: Duration::from_secs(60),
        }
    }
}

/// Alert latency threshold for sustained p99.
const P99_ALERT: Duration = Duration::from_millis(100);
/// Alert error-rate threshold.
const ERROR_ALERT: f64 = 0.01;

/// Point-in-time SLO evaluation.
#[derive(Clone, Copy, Debug)]
pub struct SloReport {
    /// p95 latency over the window.
    pub p95_latency: Duration,
    /// p99 latency over the window.
    pub p99_latency: Duration,
    /// Error fraction over the window.
    pub error_rate: f64,
    /// Last observed backlog depth.
    pub backlog: usize,
    /// Largest drift currently outstanding.
    pub max_drift: f64,
    /// Whether each objective holds.
    pub latency_ok: bool,
    /// Error-rate objective holds.
    pub error_ok: bool,
    /// Backlog objective holds.
    pub backlog_ok: bool,
    /// Drift objective holds.
    pub drift_ok: bool,
}

impl SloReport {
    /// Whether every objective holds.
    pub fn healthy(&self) -> bool {
        self.latency_ok && self.error_ok && self.backlog_ok && self.drift_ok
    }
}

/// Raised alerts. Severity is implied by the variant.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SloAlert {
    /// p99 latency over 100 ms, sustained.
    SustainedHighLatency,
    /// Error rate over 1 %, sustained.
    SustainedErrorRate,
    /// Drift beyond the page threshold.
    DriftPage,
}

/// Rolling-window SLO monitor.
#[derive(Debug)]
pub struct SloMonitor {
    config: SloConfig,
    latencies: VecDeque<(Instant, Duration)>,
    outcomes: VecDeque<(Instant, bool)>,
    backlog: usize,
    max_drift: f64,
    p99_over_since: Option<Instant>,
    errors_over_since: Option<Instant>,
}

impl SloMonitor {
    /// Create a monitor with the given tuning.
    pub fn new(config: SloConfig) -> Self {
        Self {
            config,
            latencies: VecDeque::new(),
            outcomes: VecDeque::new(),
            backlog: 0,
            max_drift: 0.0,
            p99_over_since: None,
            errors_over_since: None,
        }
    }

    /// Record one write latency sample.
    pub fn record_latency(&mut self, latency: Duration) {
        self.latencies.push_back((Instant::now(), latency));
        self.trim();
    }

    /// Record one write outcome.
    pub fn record_outcome(&mut self, ok: bool) {
        self.outcomes.push_back((Instant::now(), ok));
        self.trim();
    }

    /// Record the current backlog depth.
    pub fn record_backlog(&mut self, depth: usize) {
        self.backlog = depth;
    }

    /// Record the worst outstanding reconciliation drift.
    pub fn record_drift(&mut self, drift: f64) {
        self.max_drift = drift;
    }

    fn trim(&mut self) {
        let now = Instant::now();
        while let Some((at, _)) = self.latencies.front() {
            if now.duration_since(*at) <= self.config.latency_window {
                break;
            }
            self.latencies.pop_front();
        }
        while let Some((at, _)) = self.outcomes.front() {
            if now.duration_since(*at) <= self.config.error_window {
                break;
            }
            self.outcomes.pop_front();
        }
    }

    fn percentile(&self, p: f64) -> Duration {
        if self.latencies.is_empty() {
            return Duration::ZERO;
        }
        let mut samples: Vec<Duration> = self.latencies.iter().map(|(_, d)| *d).collect();
        samples.sort_unstable();
        let rank = ((samples.len() as f64 * p).ceil() as usize).clamp(1, samples.len());
        samples[rank - 1]
    }

    fn error_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let errors = self.outcomes.iter().filter(|(_, ok)| !ok).count();
        errors as f64 / self.outcomes.len() as f64
    }

    /// Evaluate every objective.
    pub fn report(&mut self) -> SloReport {
        self.trim();
        let p95 = self.percentile(0.95);
        let p99 = self.percentile(0.99);
        let error_rate = self.error_rate();
        SloReport {
            p95_latency: p95,
            p99_latency: p99,
            error_rate,
            backlog: self.backlog,
            max_drift: self.max_drift,
            latency_ok: p95 <= self.config.p95_latency,
            error_ok: error_rate <= self.config.error_rate,
            backlog_ok: self.backlog <= self.config.backlog,
            drift_ok: self.max_drift <= self.config.drift,
        }
    }

    /// Evaluate alert conditions, updating sustain timers.
    pub fn alerts(&mut self) -> Vec<SloAlert> {
        let report = self.report();
        let now = Instant::now();
        let mut alerts = Vec::new();

        if report.p99_latency > P99_ALERT {
            let since = *self.p99_over_since.get_or_insert(now);
            if now.duration_since(since) >= self.config.p99_sustain {
                alerts.push(SloAlert::SustainedHighLatency);
            }
        } else {
            self.p99_over_since = None;
        }

        if report.error_rate > ERROR_ALERT {
            let since = *self.errors_over_since.get_or_insert(now);
            if now.duration_since(since) >= self.config.error_sustain {
                alerts.push(SloAlert::SustainedErrorRate);
            }
        } else {
            self.errors_over_since = None;
        }

        if report.max_drift > self.config.page_drift {
            alerts.push(SloAlert::DriftPage);
        }

        alerts
    }
}

impl Default for SloMonitor {
    fn default() -> Self {
        Self::new(SloConfig::default())
    }
}
