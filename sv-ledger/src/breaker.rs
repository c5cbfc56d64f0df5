//! Circuit breaker for ledger write paths.
//!
//! Converts repeated failures into a fast-fail window so a struggling
//! dependency is not hammered while it recovers.

use std::time::{Duration, Instant};

/// Breaker states.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BreakerState {
    /// Writes flow; consecutive failures are counted.
    Closed,
    /// Writes fast-fail until the recovery timeout elapses.
    Open,
    /// Probing: a few successes close the breaker, any failure reopens it.
    HalfOpen,
}

/// Breaker tuning.
#[derive(Clone, Copy, Debug)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker.
    pub failure_threshold: u32,
    /// How long to stay open before probing.
    pub recovery_timeout: Duration,
    /// Successful probes required to close again.
    pub half_open_successes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 10,
            recovery_timeout: Duration::from_secs(60),
            half_open_successes: 3,
        }
    }
}

/// Closed / Open / HalfOpen state machine.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: BreakerState,
    consecutive_failures: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    /// Create a breaker with the given tuning.
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            opened_at: None,
        }
    }

    /// Whether a write may be attempted right now.
    ///
    /// An open breaker flips to half-open once the recovery timeout has
    /// elapsed; the flip happens here so idle breakers still recover.
    pub fn can_attempt(&mut self) -> bool {
        if self.state == BreakerState::Open {
            let elapsed = self
                .opened_at
                .map(|at| at.elapsed() >= self.config.recovery_timeout)
                .unwrap_or(true);
            if elapsed {
                self.state = BreakerState::HalfOpen;
                self.half_open_successes = 0;
                tracing::info!("circuit breaker half-open, probing");
            }
        }
        self.state != BreakerState::Open
    }

    /// Record a successful write.
    pub fn record_success(&mut self) {
        match self.state {
            BreakerState::Closed => self.consecutive_failures = 0,
            BreakerState::HalfOpen => {
                self.half_open_successes += 1;
                if self.half_open_successes >= self.config.half_open_successes {
                    self.state = BreakerState::Closed;
                    self.consecutive_failures = 0;
                    self.opened_at = None;
                    tracing::info!("circuit breaker closed");
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Record a failed write.
    pub fn record_failure(&mut self) {
        match self.state {
            BreakerState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.config.failure_threshold {
                    self.trip();
                }
            }
            // Any probe failure reopens and resets the timer.
            BreakerState::HalfOpen => self.trip(),
            BreakerState::Open => {}
        }
    }

    fn trip(&mut self) {
        self.state = BreakerState::Open;
        self.opened_at = Some(Instant::now());
        tracing::warn!(
            failures = self.consecutive_failures,
            "circuit breaker open"
        );
    }

    /// Current state.
    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// Whether the breaker is currently open.
    pub fn is_open(&self) -> bool {
        self.state == BreakerState::Open
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_millis(10),
            half_open_successes: 2,
        }
    }

    #[test]
    fn test_trips_at_threshold() {
        let mut breaker = CircuitBreaker::new(fast_config());
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.can_attempt());
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.can_attempt());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let mut breaker = CircuitBreaker::new(fast_config());
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_then_closed() {
        let mut breaker = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(15));
        assert!(breaker.can_attempt());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let mut breaker = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(15));
        assert!(breaker.can_attempt());
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        // Timer reset: still open immediately after.
        assert!(!breaker.can_attempt());
    }
}
