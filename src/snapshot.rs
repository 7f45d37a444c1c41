// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Point-in-time view of the watched Kubernetes objects.
//!
//! The reconcile pipeline consumes a [`Snapshot`] and never reads the cluster
//! directly. Change notifications are only triggers: every cycle re-derives the
//! full desired state, so duplicate or out-of-order [`ChangeEvent`]s are harmless.

use crate::constants::{
    KIND_ENDPOINT_SLICE, KIND_GATEWAY_CONSUMER, KIND_GATEWAY_PLUGIN, KIND_INGRESS, KIND_SECRET,
    KIND_SERVICE, KIND_TCP_INGRESS, KIND_UDP_INGRESS,
};
use crate::crd::{GatewayConsumer, GatewayPlugin, SourceStatus, TCPIngress, UDPIngress};
use crate::errors::SnapshotError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Kinds of watched objects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    Ingress,
    TcpIngress,
    UdpIngress,
    Plugin,
    Consumer,
    Secret,
    Service,
    EndpointSlice,
}

impl SourceKind {
    /// Kubernetes kind name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Ingress => KIND_INGRESS,
            SourceKind::TcpIngress => KIND_TCP_INGRESS,
            SourceKind::UdpIngress => KIND_UDP_INGRESS,
            SourceKind::Plugin => KIND_GATEWAY_PLUGIN,
            SourceKind::Consumer => KIND_GATEWAY_CONSUMER,
            SourceKind::Secret => KIND_SECRET,
            SourceKind::Service => KIND_SERVICE,
            SourceKind::EndpointSlice => KIND_ENDPOINT_SLICE,
        }
    }

    /// Custom resources carrying a status subresource.
    #[must_use]
    pub fn has_status(self) -> bool {
        matches!(
            self,
            SourceKind::TcpIngress
                | SourceKind::UdpIngress
                | SourceKind::Plugin
                | SourceKind::Consumer
        )
    }

    /// Kinds whose reconcile outcome is surfaced to users.
    #[must_use]
    pub fn is_reported(self) -> bool {
        self == SourceKind::Ingress || self.has_status()
    }

    /// Kinds whose changes are tracked by generation and metadata digest.
    ///
    /// These are the kinds whose status the controller writes, which bumps
    /// only their resourceVersion. Every other kind is tracked by resourceVersion.
    #[must_use]
    pub fn tracks_generation(self) -> bool {
        self.has_status()
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a watched object.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    pub kind: SourceKind,
    pub namespace: String,
    pub name: String,
}

impl SourceRef {
    #[must_use]
    pub fn new(kind: SourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Metadata of a source object needed after the build stage.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceMeta {
    pub generation: Option<i64>,
    pub created: DateTime<Utc>,
    pub uid: Option<String>,
    /// Status currently stored on the object, for custom resources.
    pub status: Option<SourceStatus>,
}

impl SourceMeta {
    /// Extract the fields used by conflict ordering and status reporting.
    #[must_use]
    pub fn from_object_meta(meta: &ObjectMeta, status: Option<SourceStatus>) -> Self {
        Self {
            generation: meta.generation,
            created: creation_time(meta),
            uid: meta.uid.clone(),
            status,
        }
    }
}

/// Creation timestamp of an object, the Unix epoch when unset.
///
/// Objects without a timestamp only exist in tests and sort first.
#[must_use]
pub fn creation_time(meta: &ObjectMeta) -> DateTime<Utc> {
    meta.creation_timestamp
        .as_ref()
        .and_then(|t| serde_json::to_value(t).ok())
        .and_then(|v| v.as_str().map(str::to_owned))
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map_or(DateTime::<Utc>::UNIX_EPOCH, |t| t.with_timezone(&Utc))
}

/// All watched objects as of one instant.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    pub ingresses: Vec<Ingress>,
    pub tcp_ingresses: Vec<TCPIngress>,
    pub udp_ingresses: Vec<UDPIngress>,
    pub plugins: Vec<GatewayPlugin>,
    pub consumers: Vec<GatewayConsumer>,
    pub secrets: Vec<Secret>,
    pub services: Vec<Service>,
    pub endpoint_slices: Vec<EndpointSlice>,
}

impl Snapshot {
    /// Total number of objects across every kind.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ingresses.len()
            + self.tcp_ingresses.len()
            + self.udp_ingresses.len()
            + self.plugins.len()
            + self.consumers.len()
            + self.secrets.len()
            + self.services.len()
            + self.endpoint_slices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What happened to a watched object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    Applied,
    Deleted,
    /// A watch cache re-listed its kind. Carries no object identity.
    Resynced,
}

/// A change notification. Only used as a trigger, never as a delta.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: SourceKind,
    pub namespace: String,
    pub name: String,
    pub change: ChangeType,
    pub generation: Option<i64>,
    pub resource_version: Option<String>,
    /// Digest of labels and annotations, which change without a new generation.
    pub metadata_digest: Option<String>,
}

impl ChangeEvent {
    /// Build an event from an object's metadata.
    #[must_use]
    pub fn from_meta(kind: SourceKind, meta: &ObjectMeta, change: ChangeType) -> Self {
        Self {
            kind,
            namespace: meta.namespace.clone().unwrap_or_default(),
            name: meta.name.clone().unwrap_or_default(),
            change,
            generation: meta.generation,
            resource_version: meta.resource_version.clone(),
            metadata_digest: Some(metadata_digest(meta)),
        }
    }

    /// A resync of a whole kind.
    #[must_use]
    pub fn resynced(kind: SourceKind) -> Self {
        Self {
            kind,
            namespace: String::new(),
            name: String::new(),
            change: ChangeType::Resynced,
            generation: None,
            resource_version: None,
            metadata_digest: None,
        }
    }

    #[must_use]
    pub fn source_ref(&self) -> SourceRef {
        SourceRef::new(self.kind, self.namespace.clone(), self.name.clone())
    }
}

/// SHA-256 hex digest of an object's labels and annotations.
#[must_use]
pub fn metadata_digest(meta: &ObjectMeta) -> String {
    let mut hasher = Sha256::new();
    for (section, entries) in [("labels", &meta.labels), ("annotations", &meta.annotations)] {
        for (key, value) in entries.iter().flatten() {
            hasher.update(format!("{section}\0{key}\0{value}\0").as_bytes());
        }
    }
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

/// Supplies snapshots and change notifications.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// Consistent copy of every watched object.
    async fn snapshot(&self) -> Result<Snapshot, SnapshotError>;

    /// Stream of change notifications.
    fn subscribe(&self) -> BoxStream<'static, ChangeEvent>;
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod snapshot_tests;
