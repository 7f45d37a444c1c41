// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Backoff and retry state for admin API operations.
//!
//! Retries are modelled as explicit state ([`RetryState`]: attempt count plus the
//! instant the next attempt becomes eligible) rather than a sleep loop, so the
//! executor can race the wait against the cycle deadline and shutdown.

use rand::Rng;
use reqwest::StatusCode;
use std::time::{Duration, Instant};

/// Initial admin API retry interval (50ms)
const ADMIN_INITIAL_INTERVAL_MILLIS: u64 = 50;

/// Maximum interval between admin API retries (5 seconds)
const ADMIN_MAX_INTERVAL_SECS: u64 = 5;

/// Initial delay before re-running a cycle that failed fatally (1 second)
const CYCLE_INITIAL_INTERVAL_SECS: u64 = 1;

/// Maximum delay before re-running a cycle that failed fatally (5 minutes)
const CYCLE_MAX_INTERVAL_SECS: u64 = 300;

/// Backoff multiplier (exponential growth factor)
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Randomization factor to prevent thundering herd (±10%)
const RANDOMIZATION_FACTOR: f64 = 0.1;

/// Simple exponential backoff implementation.
///
/// Provides exponential backoff with randomization (jitter) to prevent thundering herd.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Current interval duration
    pub current_interval: Duration,
    /// Initial interval duration, restored by [`ExponentialBackoff::reset`]
    pub initial_interval: Duration,
    /// Maximum interval duration
    pub max_interval: Duration,
    /// Backoff multiplier (typically 2.0 for doubling)
    pub multiplier: f64,
    /// Randomization factor (e.g., 0.1 for ±10%)
    pub randomization_factor: f64,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with specified parameters.
    #[must_use]
    pub fn new(
        initial_interval: Duration,
        max_interval: Duration,
        multiplier: f64,
        randomization_factor: f64,
    ) -> Self {
        Self {
            current_interval: initial_interval,
            initial_interval,
            max_interval,
            multiplier,
            randomization_factor,
        }
    }

    /// Get the next backoff interval and grow the following one, capped at `max_interval`.
    pub fn next_backoff(&mut self) -> Duration {
        let interval = self.current_interval;
        let jittered = self.apply_jitter(interval);

        let next = interval.as_secs_f64() * self.multiplier;
        self.current_interval = Duration::from_secs_f64(next).min(self.max_interval);

        jittered
    }

    /// Start over from the initial interval.
    pub fn reset(&mut self) {
        self.current_interval = self.initial_interval;
    }

    /// Apply randomization (jitter) to an interval.
    fn apply_jitter(&self, interval: Duration) -> Duration {
        if self.randomization_factor == 0.0 {
            return interval;
        }

        let secs = interval.as_secs_f64();
        let delta = secs * self.randomization_factor;
        let min = secs - delta;
        let max = secs + delta;

        let mut rng = rand::thread_rng();
        let jittered = rng.gen_range(min..=max);

        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// Backoff for individual admin API operations.
///
/// Retries occur at approximately 50ms, 100ms, 200ms, 400ms, ... capped at `max_interval`.
#[must_use]
pub fn admin_backoff(initial_interval: Duration, max_interval: Duration) -> ExponentialBackoff {
    ExponentialBackoff::new(
        initial_interval,
        max_interval,
        BACKOFF_MULTIPLIER,
        RANDOMIZATION_FACTOR,
    )
}

/// Default admin API backoff: 50ms initial, 5s cap.
#[must_use]
pub fn default_admin_backoff() -> ExponentialBackoff {
    admin_backoff(
        Duration::from_millis(ADMIN_INITIAL_INTERVAL_MILLIS),
        Duration::from_secs(ADMIN_MAX_INTERVAL_SECS),
    )
}

/// Backoff used to re-trigger whole cycles after a fatal error: 1s initial, 5 minute cap.
#[must_use]
pub fn cycle_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(
        Duration::from_secs(CYCLE_INITIAL_INTERVAL_SECS),
        Duration::from_secs(CYCLE_MAX_INTERVAL_SECS),
        BACKOFF_MULTIPLIER,
        RANDOMIZATION_FACTOR,
    )
}

/// Determine if an HTTP status code is retryable.
///
/// # Retryable Status Codes
///
/// - **429** (Too Many Requests) - Rate limiting
/// - **500** (Internal Server Error) - Server error
/// - **502** (Bad Gateway) - Proxy/gateway error
/// - **503** (Service Unavailable) - Temporary unavailability
/// - **504** (Gateway Timeout) - Gateway timeout
#[must_use]
pub fn is_retryable_http_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Retry bookkeeping attached to one pending operation.
#[derive(Debug, Clone)]
pub struct RetryState {
    attempt: u32,
    max_attempts: u32,
    next_eligible: Option<Instant>,
    backoff: ExponentialBackoff,
}

impl RetryState {
    #[must_use]
    pub fn new(max_attempts: u32, backoff: ExponentialBackoff) -> Self {
        Self {
            attempt: 0,
            max_attempts: max_attempts.max(1),
            next_eligible: None,
            backoff,
        }
    }

    /// Number of attempts started so far.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Instant the next attempt may start, `None` if it may start immediately.
    #[must_use]
    pub fn next_eligible(&self) -> Option<Instant> {
        self.next_eligible
    }

    /// Record that an attempt is starting.
    pub fn begin_attempt(&mut self) {
        self.attempt += 1;
        self.next_eligible = None;
    }

    /// Record a transient failure and compute when the next attempt is eligible.
    ///
    /// Returns `None` once the attempt budget is exhausted.
    pub fn schedule_retry(&mut self, now: Instant) -> Option<Instant> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        let eligible = now + self.backoff.next_backoff();
        self.next_eligible = Some(eligible);
        Some(eligible)
    }

    /// True once no further attempt will be scheduled.
    #[must_use]
    pub fn exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod retry_tests;
