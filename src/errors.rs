// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for the reconcile pipeline.
//!
//! - [`AdminError`] - failures talking to the gateway admin API, split into
//!   transient (retried) and permanent (failed immediately)
//! - [`SnapshotError`] - the watch caches could not produce a snapshot
//! - [`CycleError`] - errors that abort a whole reconcile cycle
//!
//! Per-object translation problems are not errors; they are reported as
//! [`crate::reconcilers::types::Problem`] values and never abort a cycle.

use crate::reconcilers::retry::is_retryable_http_status;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by the gateway admin API client.
#[derive(Error, Debug, Clone)]
pub enum AdminError {
    /// The request never produced an HTTP response (connection refused, reset, DNS).
    #[error("failed to reach admin API at {url}: {message}")]
    Transport {
        /// Request URL
        url: String,
        /// Underlying transport error
        message: String,
    },

    /// No response within the per-call timeout.
    #[error("admin API call to {url} timed out after {timeout:?}")]
    Timeout {
        /// Request URL
        url: String,
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// The admin API answered with a non-success status.
    #[error("admin API returned HTTP {status} for {method} {url}: {body}")]
    Status {
        /// HTTP method
        method: String,
        /// Request URL
        url: String,
        /// HTTP status code
        status: u16,
        /// Response body, for diagnostics
        body: String,
    },

    /// The response body could not be decoded.
    #[error("failed to decode admin API response from {url}: {message}")]
    Decode {
        /// Request URL
        url: String,
        /// Decoder error
        message: String,
    },

    /// An entity with the same name exists on the gateway without the
    /// ownership tag. It is never overwritten.
    #[error("{kind} {name} already exists on the gateway and is not managed by kingress")]
    NotOwned {
        /// Collection of the entity
        kind: String,
        /// Entity name
        name: String,
    },

    /// The configured admin URL cannot carry path segments.
    #[error("invalid admin API URL: {0}")]
    InvalidUrl(String),
}

impl AdminError {
    /// Transient errors are worth retrying: transport failures, timeouts, 429 and 5xx.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            AdminError::Transport { .. } | AdminError::Timeout { .. } => true,
            AdminError::Status { status, .. } => StatusCode::from_u16(*status)
                .map(is_retryable_http_status)
                .unwrap_or(false),
            AdminError::Decode { .. } | AdminError::NotOwned { .. } | AdminError::InvalidUrl(_) => {
                false
            }
        }
    }

    /// True when the request may have been applied even though it failed.
    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        matches!(
            self,
            AdminError::Transport { .. } | AdminError::Timeout { .. }
        )
    }

    /// HTTP status code, when the admin API answered.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            AdminError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Errors obtaining a snapshot of the watched objects.
#[derive(Error, Debug, Clone)]
pub enum SnapshotError {
    /// A watch cache has not completed its initial list in time.
    #[error("watch cache for {kind} not ready after {timeout:?}")]
    NotReady {
        /// Kind of the cache
        kind: &'static str,
        /// How long we waited
        timeout: Duration,
    },

    /// The task feeding a watch cache has stopped.
    #[error("watch cache for {kind} is no longer fed")]
    StoreDropped {
        /// Kind of the cache
        kind: &'static str,
    },
}

/// Errors that abort an entire reconcile cycle.
///
/// Previously applied gateway configuration is left untouched and the whole
/// cycle is retried after a backoff.
#[derive(Error, Debug, Clone)]
pub enum CycleError {
    #[error("cannot obtain a snapshot: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("administrative API unreachable: {0}")]
    AdminUnreachable(#[source] AdminError),

    #[error("cannot read applied gateway configuration: {0}")]
    FetchApplied(#[source] AdminError),

    #[error("reconcile cycle cancelled by shutdown")]
    Cancelled,

    #[error("{stage} did not finish before the cycle deadline")]
    DeadlineExceeded { stage: &'static str },
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
