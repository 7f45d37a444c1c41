// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Admin API error mapping to Kubernetes status condition reasons.
//!
//! # Usage
//!
//! ```rust
//! use kingress::http_errors::map_http_error_to_reason;
//!
//! let (reason, message) = map_http_error_to_reason(409);
//! assert_eq!(reason, "AdminConflict");
//! assert!(message.contains("409"));
//!
//! let (reason, message) = map_http_error_to_reason(503);
//! assert_eq!(reason, "GatewayError");
//! assert!(message.contains("503"));
//! ```

use crate::errors::AdminError;
use crate::status_reasons::{
    REASON_ADMIN_AUTH_FAILED, REASON_ADMIN_BAD_REQUEST, REASON_ADMIN_CONFLICT,
    REASON_ADMIN_DECODE_ERROR, REASON_ADMIN_INTERNAL_ERROR, REASON_ADMIN_NOT_FOUND,
    REASON_ADMIN_RATE_LIMITED, REASON_ADMIN_TIMEOUT, REASON_ADMIN_UNPROCESSABLE,
    REASON_ADMIN_UNREACHABLE, REASON_FOREIGN_ENTITY, REASON_GATEWAY_ERROR,
};

/// Map an admin API HTTP status code to a condition reason and message.
///
/// # HTTP Code Mapping
///
/// | HTTP Code | Reason | Meaning |
/// |-----------|--------|---------|
/// | 400 | `AdminBadRequest` | Invalid entity body |
/// | 401, 403 | `AdminAuthFailed` | Token missing or refused |
/// | 404 | `AdminNotFound` | Unknown entity or collection |
/// | 409 | `AdminConflict` | Uniqueness or reference violation |
/// | 422 | `AdminUnprocessable` | Schema violation |
/// | 429 | `AdminRateLimited` | Too many requests |
/// | 500 | `AdminInternalError` | Internal server error |
/// | 502, 503, 504 | `GatewayError` | Admin API behind a failing proxy |
/// | Other | `AdminUnreachable` | Unexpected status |
#[must_use]
pub fn map_http_error_to_reason(status_code: u16) -> (&'static str, String) {
    match status_code {
        400 => (
            REASON_ADMIN_BAD_REQUEST,
            "Admin API rejected the entity as invalid (400)".into(),
        ),
        401 => (
            REASON_ADMIN_AUTH_FAILED,
            "Admin API authentication required (401)".into(),
        ),
        403 => (
            REASON_ADMIN_AUTH_FAILED,
            "Admin API authorization failed (403)".into(),
        ),
        404 => (
            REASON_ADMIN_NOT_FOUND,
            "Entity or collection not found on the admin API (404)".into(),
        ),
        409 => (
            REASON_ADMIN_CONFLICT,
            "Admin API reported a conflicting entity (409)".into(),
        ),
        422 => (
            REASON_ADMIN_UNPROCESSABLE,
            "Admin API could not process the entity (422)".into(),
        ),
        429 => (
            REASON_ADMIN_RATE_LIMITED,
            "Admin API is rate limiting requests (429)".into(),
        ),
        500 => (
            REASON_ADMIN_INTERNAL_ERROR,
            "Admin API internal error (500)".into(),
        ),
        502 => (
            REASON_GATEWAY_ERROR,
            "Bad gateway reaching the admin API (502)".into(),
        ),
        503 => (
            REASON_GATEWAY_ERROR,
            "Admin API unavailable (503)".into(),
        ),
        504 => (
            REASON_GATEWAY_ERROR,
            "Gateway timeout reaching the admin API (504)".into(),
        ),
        _ => (
            REASON_ADMIN_UNREACHABLE,
            format!("Unexpected HTTP status from the admin API ({status_code})"),
        ),
    }
}

/// Map any [`AdminError`] to a condition reason and message.
///
/// The message carries the reason's explanation followed by the error detail.
#[must_use]
pub fn map_admin_error(error: &AdminError) -> (&'static str, String) {
    match error {
        AdminError::Status { status, body, .. } => {
            let (reason, message) = map_http_error_to_reason(*status);
            if body.is_empty() {
                (reason, message)
            } else {
                (reason, format!("{message}: {}", truncate(body)))
            }
        }
        AdminError::Timeout { .. } => (REASON_ADMIN_TIMEOUT, error.to_string()),
        AdminError::Decode { .. } => (REASON_ADMIN_DECODE_ERROR, error.to_string()),
        AdminError::NotOwned { .. } => (REASON_FOREIGN_ENTITY, error.to_string()),
        AdminError::Transport { .. } | AdminError::InvalidUrl(_) => {
            (REASON_ADMIN_UNREACHABLE, error.to_string())
        }
    }
}

/// Response bodies can be large HTML error pages.
const MAX_BODY_IN_MESSAGE: usize = 256;

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(MAX_BODY_IN_MESSAGE) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[cfg(test)]
#[path = "http_errors_tests.rs"]
mod http_errors_tests;
