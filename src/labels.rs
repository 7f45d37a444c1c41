// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Annotation and tag constants shared across the translation pipeline.
//!
//! Annotations are read from the watched Kubernetes objects to tune the derived
//! gateway entities. Tags are written onto every gateway entity the controller
//! owns so that foreign configuration is never touched.

// ============================================================================
// Ingress Class
// ============================================================================

/// Legacy ingress class annotation, honored on every translated kind
pub const INGRESS_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";

// ============================================================================
// Ingress Annotations
// ============================================================================

/// Strip the matched path prefix before proxying (`true`/`false`)
pub const STRIP_PATH_ANNOTATION: &str = "kingress.io/strip-path";

/// Preserve the client `Host` header when proxying (`true`/`false`)
pub const PRESERVE_HOST_ANNOTATION: &str = "kingress.io/preserve-host";

/// Status code used when redirecting plain HTTP to HTTPS
pub const HTTPS_REDIRECT_STATUS_CODE_ANNOTATION: &str = "kingress.io/https-redirect-status-code";

// ============================================================================
// Service Annotations
// ============================================================================

/// Upstream protocol for HTTP gateway services
pub const PROTOCOL_ANNOTATION: &str = "kingress.io/protocol";

/// Upstream path prefix
pub const PATH_ANNOTATION: &str = "kingress.io/path";

/// Number of upstream retries
pub const RETRIES_ANNOTATION: &str = "kingress.io/retries";

/// Upstream connect timeout in milliseconds
pub const CONNECT_TIMEOUT_ANNOTATION: &str = "kingress.io/connect-timeout";

/// Upstream read timeout in milliseconds
pub const READ_TIMEOUT_ANNOTATION: &str = "kingress.io/read-timeout";

/// Upstream write timeout in milliseconds
pub const WRITE_TIMEOUT_ANNOTATION: &str = "kingress.io/write-timeout";

/// Upstream load-balancing algorithm
pub const LB_ALGORITHM_ANNOTATION: &str = "kingress.io/lb-algorithm";

// ============================================================================
// Gateway Tags
// ============================================================================

/// Ownership tag written onto every entity the controller creates.
///
/// Only entities carrying this tag are read back, diffed, or deleted.
pub const OWNERSHIP_TAG: &str = "managed-by-kingress";

// ============================================================================
// EndpointSlice Labels
// ============================================================================

/// Label linking an `EndpointSlice` to its `Service`
pub const ENDPOINT_SLICE_SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";
