// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions (CRDs) for gateway configuration.
//!
//! This module defines the Kubernetes Custom Resource Definitions kingress
//! translates into gateway entities, next to the built-in `Ingress`, `Secret`,
//! `Service` and `EndpointSlice` kinds.
//!
//! # Resource Types
//!
//! ## Stream Ingress
//!
//! - [`TCPIngress`] - TCP (and TLS-SNI) listen ports routed to a backend service
//! - [`UDPIngress`] - UDP listen ports routed to a backend service
//!
//! ## Behavior
//!
//! - [`GatewayPlugin`] - Plugin configuration attached globally or to a service, route, or consumer
//! - [`GatewayConsumer`] - Client identity with credentials sourced from Secrets
//!
//! # Example: Exposing a UDP DNS resolver
//!
//! ```rust,no_run
//! use kingress::crd::{StreamBackend, UDPIngressSpec, UdpIngressRule};
//!
//! let spec = UDPIngressSpec {
//!     rules: vec![UdpIngressRule {
//!         port: 9999,
//!         backend: StreamBackend {
//!             service_name: "coredns".to_string(),
//!             service_port: 53,
//!         },
//!     }],
//! };
//! ```

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition represents an observation of a resource's current state.
///
/// Conditions are used in status subresources to communicate the reconcile
/// outcome of a resource to users and controllers.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition: Ready, Conflicting, Invalid, or SyncFailed.
    pub r#type: String,

    /// Status of the condition: True, False, or Unknown.
    pub status: String,

    /// Brief CamelCase reason for the condition's last transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message indicating details about the transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Generation of the resource this condition was computed from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Last time the condition transitioned from one status to another (RFC3339 format).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

/// Status shared by every kingress custom resource.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourceStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Backend service reference for stream ingress rules.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StreamBackend {
    /// Name of a `Service` in the same namespace.
    pub service_name: String,

    /// Port of that `Service` (the `port` field, not the target port).
    #[schemars(range(min = 1, max = 65535))]
    pub service_port: i32,
}

/// A single TCP listen rule.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TcpIngressRule {
    /// SNI hostname to match. When set, the rule matches TLS connections for
    /// this hostname only and the gateway terminates TLS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Port the gateway listens on.
    #[schemars(range(min = 1, max = 65535))]
    pub port: i32,

    /// Backend receiving the stream.
    pub backend: StreamBackend,
}

/// TLS material for `TCPIngress` hostnames.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StreamTls {
    /// Hostnames served with this certificate.
    #[serde(default)]
    pub hosts: Vec<String>,

    /// Name of a `kubernetes.io/tls` Secret in the same namespace.
    pub secret_name: String,
}

/// `TCPIngress` exposes TCP services on gateway listen ports.
///
/// # Example
///
/// ```yaml
/// apiVersion: configuration.kingress.io/v1alpha1
/// kind: TCPIngress
/// metadata:
///   name: postgres
///   annotations:
///     kubernetes.io/ingress.class: kingress
/// spec:
///   rules:
///     - port: 5432
///       backend:
///         serviceName: postgres
///         servicePort: 5432
/// ```
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "configuration.kingress.io",
    version = "v1alpha1",
    kind = "TCPIngress",
    plural = "tcpingresses",
    shortname = "tcping",
    namespaced,
    doc = "TCPIngress routes TCP connections arriving on a gateway listen port to a backend Service."
)]
#[kube(status = "SourceStatus")]
#[serde(rename_all = "camelCase")]
pub struct TCPIngressSpec {
    /// Listen rules.
    #[serde(default)]
    pub rules: Vec<TcpIngressRule>,

    /// TLS certificates for SNI-matched rules.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tls: Vec<StreamTls>,
}

/// A single UDP listen rule.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UdpIngressRule {
    /// Port the gateway listens on.
    #[schemars(range(min = 1, max = 65535))]
    pub port: i32,

    /// Backend receiving the datagrams.
    pub backend: StreamBackend,
}

/// `UDPIngress` exposes UDP services on gateway listen ports.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "configuration.kingress.io",
    version = "v1alpha1",
    kind = "UDPIngress",
    plural = "udpingresses",
    shortname = "udping",
    namespaced,
    doc = "UDPIngress routes UDP datagrams arriving on a gateway listen port to a backend Service."
)]
#[kube(status = "SourceStatus")]
#[serde(rename_all = "camelCase")]
pub struct UDPIngressSpec {
    /// Listen rules.
    #[serde(default)]
    pub rules: Vec<UdpIngressRule>,
}

/// Kind of entity a `GatewayPlugin` attaches to.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord)]
pub enum PluginTargetKind {
    /// Every request handled by the gateway.
    Global,
    /// Gateway services derived from a Kubernetes `Service`.
    Service,
    /// Routes derived from an `Ingress`.
    Ingress,
    /// Routes derived from a `TCPIngress`.
    #[serde(rename = "TCPIngress")]
    TcpIngress,
    /// Routes derived from a `UDPIngress`.
    #[serde(rename = "UDPIngress")]
    UdpIngress,
    /// A `GatewayConsumer`.
    Consumer,
}

/// Scope a plugin is attached to.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PluginTarget {
    pub kind: PluginTargetKind,

    /// Name of the target object in the plugin's namespace. Required for all
    /// kinds except `Global`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Restrict a `Service` target to a single service port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

fn preserve_unknown_fields(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}

/// `GatewayPlugin` attaches a gateway plugin with its configuration.
///
/// # Example
///
/// ```yaml
/// apiVersion: configuration.kingress.io/v1alpha1
/// kind: GatewayPlugin
/// metadata:
///   name: rate-limit
/// spec:
///   plugin: rate-limiting
///   config:
///     minute: 5
///   target:
///     kind: Ingress
///     name: echo
/// ```
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "configuration.kingress.io",
    version = "v1alpha1",
    kind = "GatewayPlugin",
    plural = "gatewayplugins",
    namespaced,
    doc = "GatewayPlugin attaches a gateway plugin globally or to the services, routes, or consumer derived from a named object."
)]
#[kube(status = "SourceStatus")]
#[serde(rename_all = "camelCase")]
pub struct GatewayPluginSpec {
    /// Plugin name as known by the gateway (e.g. `rate-limiting`).
    pub plugin: String,

    /// Plugin configuration, passed through verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub config: Option<serde_json::Value>,

    /// Keep the plugin configured but inactive.
    #[serde(default)]
    pub disabled: bool,

    /// What the plugin applies to.
    pub target: PluginTarget,
}

/// `GatewayConsumer` declares a client identity.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "configuration.kingress.io",
    version = "v1alpha1",
    kind = "GatewayConsumer",
    plural = "gatewayconsumers",
    namespaced,
    doc = "GatewayConsumer declares a gateway consumer identity and the Secrets holding its credentials."
)]
#[kube(status = "SourceStatus")]
#[serde(rename_all = "camelCase")]
pub struct GatewayConsumerSpec {
    /// Username, unique across the gateway.
    pub username: String,

    /// Optional external identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_id: Option<String>,

    /// Names of Secrets in the same namespace, each holding one credential.
    #[serde(default)]
    pub credentials: Vec<String>,
}

#[cfg(test)]
#[path = "crd_tests.rs"]
mod crd_tests;
