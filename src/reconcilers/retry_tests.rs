// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `retry.rs`

use super::*;

fn no_jitter(initial_ms: u64, max_ms: u64) -> ExponentialBackoff {
    ExponentialBackoff::new(
        Duration::from_millis(initial_ms),
        Duration::from_millis(max_ms),
        2.0,
        0.0,
    )
}

/// Test that backoff configuration has expected values
#[test]
fn test_default_admin_backoff_configuration() {
    let backoff = default_admin_backoff();

    assert_eq!(backoff.initial_interval, Duration::from_millis(50));
    assert_eq!(backoff.max_interval, Duration::from_secs(5));
    #[allow(clippy::float_cmp)]
    {
        assert_eq!(backoff.multiplier, 2.0);
        assert_eq!(backoff.randomization_factor, 0.1);
    }
}

#[test]
fn test_backoff_grows_exponentially_and_caps() {
    let mut backoff = no_jitter(100, 500);

    assert_eq!(backoff.next_backoff(), Duration::from_millis(100));
    assert_eq!(backoff.next_backoff(), Duration::from_millis(200));
    assert_eq!(backoff.next_backoff(), Duration::from_millis(400));
    assert_eq!(backoff.next_backoff(), Duration::from_millis(500));
    assert_eq!(backoff.next_backoff(), Duration::from_millis(500));

    backoff.reset();
    assert_eq!(backoff.next_backoff(), Duration::from_millis(100));
}

#[test]
fn test_jitter_stays_within_bounds() {
    let mut backoff = admin_backoff(Duration::from_millis(1000), Duration::from_secs(10));
    let interval = backoff.next_backoff();
    assert!(interval >= Duration::from_millis(900));
    assert!(interval <= Duration::from_millis(1100));
}

#[test]
fn test_retryable_statuses() {
    assert!(is_retryable_http_status(StatusCode::TOO_MANY_REQUESTS));
    assert!(is_retryable_http_status(StatusCode::SERVICE_UNAVAILABLE));
    assert!(!is_retryable_http_status(StatusCode::BAD_REQUEST));
    assert!(!is_retryable_http_status(StatusCode::CONFLICT));
    assert!(!is_retryable_http_status(StatusCode::NOT_FOUND));
}

#[test]
fn test_retry_state_exhausts_after_max_attempts() {
    let mut state = RetryState::new(3, no_jitter(10, 100));
    let now = Instant::now();

    state.begin_attempt();
    let first = state.schedule_retry(now).unwrap();
    assert_eq!(first, now + Duration::from_millis(10));
    assert_eq!(state.next_eligible(), Some(first));

    state.begin_attempt();
    let second = state.schedule_retry(now).unwrap();
    assert_eq!(second, now + Duration::from_millis(20));

    state.begin_attempt();
    assert!(state.schedule_retry(now).is_none());
    assert!(state.exhausted());
    assert_eq!(state.attempt(), 3);
}

#[test]
fn test_retry_state_allows_at_least_one_attempt() {
    let mut state = RetryState::new(0, no_jitter(10, 100));
    assert!(!state.exhausted());
    state.begin_attempt();
    assert!(state.exhausted());
}
