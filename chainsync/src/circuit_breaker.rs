// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::config::CircuitBreakerConfig;
use rand::Rng;
use std::time::Duration;

const JITTER_FACTOR: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
}

/// Counts consecutive failed passes. Opens once `failure_threshold` is reached.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    consecutive_failures: u32,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            consecutive_failures: 0,
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self) -> CircuitState {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.state()
    }

    pub fn state(&self) -> CircuitState {
        if self.consecutive_failures >= self.config.failure_threshold {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Wait before the next pass: doubles with every consecutive failure,
    /// +/-10% jitter, capped at `backoff_max_secs`.
    pub fn next_backoff(&self) -> Duration {
        let initial = Duration::from_secs(self.config.backoff_initial_secs);
        let max = Duration::from_secs(self.config.backoff_max_secs);
        let exponent = self.consecutive_failures.saturating_sub(1).min(16);
        let base = initial.saturating_mul(1u32 << exponent).min(max);
        let jitter = rand::thread_rng().gen_range(1.0 - JITTER_FACTOR..=1.0 + JITTER_FACTOR);
        Duration::try_from_secs_f64(base.as_secs_f64() * jitter)
            .unwrap_or(max)
            .min(max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            backoff_initial_secs: 10,
            backoff_max_secs: 60,
        })
    }

    #[test]
    fn test_opens_at_threshold_and_resets_on_success() {
        let mut breaker = breaker(3);
        assert_eq!(breaker.record_failure(), CircuitState::Closed);
        assert_eq!(breaker.record_failure(), CircuitState::Closed);
        breaker.record_success();
        assert_eq!(breaker.consecutive_failures(), 0);

        assert_eq!(breaker.record_failure(), CircuitState::Closed);
        assert_eq!(breaker.record_failure(), CircuitState::Closed);
        assert_eq!(breaker.record_failure(), CircuitState::Open);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_backoff_grows_with_jitter_and_is_capped() {
        let mut breaker = breaker(100);
        breaker.record_failure();
        let first = breaker.next_backoff();
        assert!(first >= Duration::from_millis(8_900) && first <= Duration::from_millis(11_100));

        breaker.record_failure();
        let second = breaker.next_backoff();
        assert!(second >= Duration::from_millis(17_900) && second <= Duration::from_millis(22_100));

        for _ in 0..20 {
            breaker.record_failure();
        }
        let capped = breaker.next_backoff();
        assert!(capped <= Duration::from_secs(60));
        assert!(capped >= Duration::from_millis(53_900));
    }
}
