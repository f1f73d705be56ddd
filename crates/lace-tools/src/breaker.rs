// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Per-tool circuit breaker.
//!
//! Keyed by tool name per executor (and therefore per agent); parent and
//! delegate agents never share breaker state.

use std::time::Instant;

use tracing::debug;

use lace_config::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Latch that short-circuits calls to a failing tool.
///
/// Transitions strictly closed → open → half_open → {closed | open}.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: BreakerState,
    failures: u32,
    last_failure: Option<Instant>,
    next_attempt: Option<Instant>,
    failure_threshold: u32,
    open_timeout: std::time::Duration,
}

impl CircuitBreaker {
    pub fn new(cfg: &BreakerConfig) -> Self {
        Self {
            state: BreakerState::Closed,
            failures: 0,
            last_failure: None,
            next_attempt: None,
            failure_threshold: cfg.failure_threshold,
            open_timeout: std::time::Duration::from_secs(cfg.open_timeout_secs),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Ask to run a call now.
    ///
    /// - `Closed`: always admitted.
    /// - `Open`: rejected until the open timeout elapses, then the breaker
    ///   moves to `HalfOpen` and admits a single probe.
    /// - `HalfOpen`: the probe is in flight; further calls are rejected
    ///   until [`record_success`] or [`record_failure`] resolves it.
    pub fn admit(&mut self, now: Instant) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                if self.next_attempt.is_some_and(|t| now >= t) {
                    debug!("circuit breaker half-open: admitting probe");
                    self.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => false,
        }
    }

    pub fn record_success(&mut self) {
        self.state = BreakerState::Closed;
        self.failures = 0;
        self.next_attempt = None;
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.last_failure = Some(now);
        match self.state {
            BreakerState::Closed => {
                self.failures += 1;
                if self.failures >= self.failure_threshold {
                    debug!(failures = self.failures, "circuit breaker opened");
                    self.state = BreakerState::Open;
                    self.next_attempt = Some(now + self.open_timeout);
                }
            }
            BreakerState::HalfOpen | BreakerState::Open => {
                // A failed probe re-opens and extends the timeout.
                self.failures += 1;
                self.state = BreakerState::Open;
                self.next_attempt = Some(now + self.open_timeout);
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(&BreakerConfig::default()) // threshold 5, 30s
    }

    #[test]
    fn starts_closed_and_admits() {
        let mut b = breaker();
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.admit(Instant::now()));
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let mut b = breaker();
        let now = Instant::now();
        for _ in 0..4 {
            b.record_failure(now);
            assert_eq!(b.state(), BreakerState::Closed);
        }
        b.record_failure(now);
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.admit(now), "open breaker rejects immediately");
    }

    #[test]
    fn success_resets_failure_count() {
        let mut b = breaker();
        let now = Instant::now();
        for _ in 0..4 {
            b.record_failure(now);
        }
        b.record_success();
        assert_eq!(b.failures(), 0);
        for _ in 0..4 {
            b.record_failure(now);
        }
        assert_eq!(b.state(), BreakerState::Closed, "count restarted after success");
    }

    #[test]
    fn admits_single_probe_after_timeout() {
        let mut b = breaker();
        let start = Instant::now();
        for _ in 0..5 {
            b.record_failure(start);
        }
        let after = start + Duration::from_secs(31);
        assert!(b.admit(after), "timeout elapsed: probe admitted");
        assert_eq!(b.state(), BreakerState::HalfOpen);
        assert!(!b.admit(after), "only one probe at a time");
    }

    #[test]
    fn probe_success_closes() {
        let mut b = breaker();
        let start = Instant::now();
        for _ in 0..5 {
            b.record_failure(start);
        }
        assert!(b.admit(start + Duration::from_secs(31)));
        b.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.admit(start + Duration::from_secs(31)));
    }

    #[test]
    fn probe_failure_reopens_and_extends_timeout() {
        let mut b = breaker();
        let start = Instant::now();
        for _ in 0..5 {
            b.record_failure(start);
        }
        let probe_at = start + Duration::from_secs(31);
        assert!(b.admit(probe_at));
        b.record_failure(probe_at);
        assert_eq!(b.state(), BreakerState::Open);
        // Still closed to traffic just after the failed probe.
        assert!(!b.admit(probe_at + Duration::from_secs(1)));
        // Reopens for a probe a full timeout later.
        assert!(b.admit(probe_at + Duration::from_secs(31)));
    }
}
