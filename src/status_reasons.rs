// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Standard Kubernetes status condition types and reasons for kingress resources.
//!
//! Reasons are programmatic identifiers in CamelCase that explain why a
//! condition has a particular status.
//!
//! # Condition Types
//!
//! Every custom resource carries an encompassing `type: Ready` condition plus
//! one condition naming its outcome when it is not ready:
//!
//! - `Conflicting` - another object already claims one of its listen points
//! - `Invalid` - the object cannot be translated (bad annotation, missing reference)
//! - `SyncFailed` - the gateway rejected or did not accept its entities
//!
//! # Example Status
//!
//! ```yaml
//! status:
//!   observedGeneration: 3
//!   conditions:
//!     - type: Ready
//!       status: "False"
//!       reason: ListenPointConflict
//!       message: "http a.example.com/ is already claimed by Ingress default/echo"
//!       observedGeneration: 3
//!     - type: Conflicting
//!       status: "True"
//!       reason: ListenPointConflict
//!       message: "http a.example.com/ is already claimed by Ingress default/echo"
//!       observedGeneration: 3
//! ```

// ============================================================================
// Condition Types
// ============================================================================

/// Encompassing readiness condition.
pub const CONDITION_TYPE_READY: &str = "Ready";

/// The object lost a listen point to another object.
pub const CONDITION_TYPE_CONFLICTING: &str = "Conflicting";

/// The object cannot be translated into gateway entities.
pub const CONDITION_TYPE_INVALID: &str = "Invalid";

/// Some derived entities could not be written to the gateway.
pub const CONDITION_TYPE_SYNC_FAILED: &str = "SyncFailed";

// ============================================================================
// Ready
// ============================================================================

/// Every entity derived from the object is applied on the gateway.
///
/// Also used when the object derives no entities at all (e.g. an `Ingress`
/// without rules), since there is nothing left to apply.
pub const REASON_APPLIED: &str = "Applied";

// ============================================================================
// Invalid
// ============================================================================

/// The object itself is malformed: an annotation or a required field is invalid.
pub const REASON_INVALID_SPEC: &str = "InvalidSpec";

/// A referenced `Service`, port or `Secret` does not exist or is unusable.
pub const REASON_MISSING_REFERENCE: &str = "MissingReference";

/// A `GatewayPlugin` target does not resolve to any derived entity.
pub const REASON_SCOPE_NOT_FOUND: &str = "ScopeNotFound";

/// A derived entity was dropped because an entity it depends on was excluded.
pub const REASON_DANGLING_REFERENCE: &str = "DanglingReference";

// ============================================================================
// Conflicting
// ============================================================================

/// Another object created earlier claims the same listen point.
pub const REASON_LISTEN_POINT_CONFLICT: &str = "ListenPointConflict";

// ============================================================================
// SyncFailed
// ============================================================================

/// The admin API rejected the request body (400).
pub const REASON_ADMIN_BAD_REQUEST: &str = "AdminBadRequest";

/// The admin API refused the credentials (401/403).
pub const REASON_ADMIN_AUTH_FAILED: &str = "AdminAuthFailed";

/// The admin API does not know the entity or its collection (404).
pub const REASON_ADMIN_NOT_FOUND: &str = "AdminNotFound";

/// The admin API reported a uniqueness or reference violation (409).
pub const REASON_ADMIN_CONFLICT: &str = "AdminConflict";

/// The admin API rejected the entity schema (422).
pub const REASON_ADMIN_UNPROCESSABLE: &str = "AdminUnprocessable";

/// Retries exhausted on 429 responses.
pub const REASON_ADMIN_RATE_LIMITED: &str = "AdminRateLimited";

/// Retries exhausted on 500 responses.
pub const REASON_ADMIN_INTERNAL_ERROR: &str = "AdminInternalError";

/// Retries exhausted on 502/503/504 responses.
pub const REASON_GATEWAY_ERROR: &str = "GatewayError";

/// No HTTP response (connection refused, reset, DNS, unexpected status).
pub const REASON_ADMIN_UNREACHABLE: &str = "AdminUnreachable";

/// No response within the per-call timeout. The change may have been applied.
pub const REASON_ADMIN_TIMEOUT: &str = "AdminTimeout";

/// The admin API answered with a body that could not be decoded.
pub const REASON_ADMIN_DECODE_ERROR: &str = "AdminDecodeError";

/// A gateway entity with the same name exists but is not managed by kingress.
pub const REASON_FOREIGN_ENTITY: &str = "ForeignEntity";

/// A prerequisite entity failed, so this one was never attempted.
pub const REASON_DEPENDENCY_FAILED: &str = "DependencyFailed";

/// The cycle deadline passed before the operation completed.
pub const REASON_DEADLINE_EXCEEDED: &str = "DeadlineExceeded";

/// The controller is shutting down.
pub const REASON_CANCELLED: &str = "Cancelled";

/// The whole cycle aborted before any change was attempted.
pub const REASON_CYCLE_FAILED: &str = "CycleFailed";

#[cfg(test)]
#[path = "status_reasons_tests.rs"]
mod status_reasons_tests;
