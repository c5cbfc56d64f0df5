//! Ingest backpressure.
//!
//! Fed coarse `(p99 latency, backlog depth)` samples; while either is over
//! its threshold, new ingest is rejected with `backpressure`. The coarse
//! update cadence provides the hysteresis.

use std::time::Duration;

/// Throttle thresholds.
#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// p99 write latency above which ingest is shed.
    pub latency_threshold: Duration,
    /// Backlog depth above which ingest is shed.
    pub backlog_threshold: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            latency_threshold: Duration::from_millis(100),
            backlog_threshold: 1_000,
        }
    }
}

/// Overload detector for the write path.
#[derive(Debug)]
pub struct BackpressureThrottle {
    config: ThrottleConfig,
    throttled: bool,
}

impl BackpressureThrottle {
    /// Create a throttle with the given thresholds.
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            throttled: false,
        }
    }

    /// Feed the latest load sample.
    pub fn update(&mut self, p99_latency: Duration, backlog_depth: usize) {
        let over = p99_latency > self.config.latency_threshold
            || backlog_depth > self.config.backlog_threshold;
        if over != self.throttled {
            if over {
                tracing::warn!(
                    p99_ms = p99_latency.as_millis() as u64,
                    backlog = backlog_depth,
                    "ingest throttled"
                );
            } else {
                tracing::info!("ingest throttle released");
            }
        }
        self.throttled = over;
    }

    /// Whether new ingest should be rejected.
    pub fn is_throttled(&self) -> bool {
        self.throttled
    }
}

impl Default for BackpressureThrottle {
    fn default() -> Self {
        Self::new(ThrottleConfig::default())
    }
}
