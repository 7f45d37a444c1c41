// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the kingress controller.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// API Constants
// ============================================================================

/// API group for all kingress CRDs
pub const API_GROUP: &str = "configuration.kingress.io";

/// API version for all kingress CRDs
pub const API_VERSION: &str = "v1alpha1";

/// Fully qualified API version (group/version)
pub const API_GROUP_VERSION: &str = "configuration.kingress.io/v1alpha1";

/// Kind name for `Ingress` resource
pub const KIND_INGRESS: &str = "Ingress";

/// Kind name for `TCPIngress` resource
pub const KIND_TCP_INGRESS: &str = "TCPIngress";

/// Kind name for `UDPIngress` resource
pub const KIND_UDP_INGRESS: &str = "UDPIngress";

/// Kind name for `GatewayPlugin` resource
pub const KIND_GATEWAY_PLUGIN: &str = "GatewayPlugin";

/// Kind name for `GatewayConsumer` resource
pub const KIND_GATEWAY_CONSUMER: &str = "GatewayConsumer";

/// Kind name for `Secret` resource
pub const KIND_SECRET: &str = "Secret";

/// Kind name for `Service` resource
pub const KIND_SERVICE: &str = "Service";

/// Kind name for `EndpointSlice` resource
pub const KIND_ENDPOINT_SLICE: &str = "EndpointSlice";

/// Name the controller reports as in Kubernetes Events
pub const CONTROLLER_NAME: &str = "kingress-controller";

/// Default ingress class handled by the controller
pub const DEFAULT_INGRESS_CLASS: &str = "kingress";

// ============================================================================
// Gateway Entity Defaults
// ============================================================================

/// Default number of upstream retries for a gateway Service
pub const DEFAULT_SERVICE_RETRIES: u32 = 5;

/// Default connect/read/write timeout for a gateway Service (milliseconds)
pub const DEFAULT_SERVICE_TIMEOUT_MS: u32 = 60_000;

/// Default weight for an upstream Target
pub const DEFAULT_TARGET_WEIGHT: u32 = 100;

/// Default load-balancing algorithm for an Upstream
pub const DEFAULT_LB_ALGORITHM: &str = "round-robin";

/// Default HTTP redirect status code for routes
pub const DEFAULT_HTTPS_REDIRECT_STATUS_CODE: u16 = 426;

/// Key in a TLS secret holding the certificate chain
pub const TLS_CERT_KEY: &str = "tls.crt";

/// Key in a TLS secret holding the private key
pub const TLS_PRIVATE_KEY_KEY: &str = "tls.key";

/// Key in a credential secret naming the credential type
pub const CREDENTIAL_TYPE_KEY: &str = "credType";

/// Credential types the gateway understands
pub const SUPPORTED_CREDENTIAL_TYPES: &[&str] = &[
    "key-auth",
    "basic-auth",
    "hmac-auth",
    "jwt",
    "oauth2",
    "acl",
];

/// Load-balancing algorithms the gateway understands
pub const SUPPORTED_LB_ALGORITHMS: &[&str] = &[
    "round-robin",
    "consistent-hashing",
    "least-connections",
    "latency",
];

/// Upstream protocols accepted for HTTP gateway Services
pub const SUPPORTED_HTTP_PROTOCOLS: &[&str] = &["http", "https", "grpc", "grpcs"];

// ============================================================================
// Reconcile Loop Defaults
// ============================================================================

/// Default minimum interval between two reconcile cycles (milliseconds)
pub const DEFAULT_MIN_CYCLE_INTERVAL_MILLIS: u64 = 500;

/// Default overall deadline for a single reconcile cycle (seconds)
pub const DEFAULT_CYCLE_DEADLINE_SECS: u64 = 120;

/// Default requeue interval after a partially failed cycle (seconds)
pub const DEFAULT_REQUEUE_SECS: u64 = 30;

/// Default time to wait for the watch caches to be populated (seconds)
pub const DEFAULT_SNAPSHOT_READY_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Admin API Defaults
// ============================================================================

/// Default admin API base URL
pub const DEFAULT_ADMIN_URL: &str = "http://localhost:8001";

/// Default per-call timeout for admin API requests (seconds)
pub const DEFAULT_ADMIN_CALL_TIMEOUT_SECS: u64 = 10;

/// Default number of concurrent admin API operations in a cycle
pub const DEFAULT_SYNC_CONCURRENCY: usize = 10;

/// Default number of attempts per admin API operation
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Concurrent status writes after a cycle
pub const STATUS_WRITE_CONCURRENCY: usize = 8;

/// Page size used when reading collections from the admin API
pub const ADMIN_PAGE_SIZE: u32 = 1000;

/// Header carrying the admin API token
pub const ADMIN_TOKEN_HEADER: &str = "Kingress-Admin-Token";

// ============================================================================
// Metrics Server
// ============================================================================

/// Default bind address for the Prometheus metrics endpoint
pub const DEFAULT_METRICS_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Metrics endpoint path
pub const METRICS_SERVER_PATH: &str = "/metrics";
