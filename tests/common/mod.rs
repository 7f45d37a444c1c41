// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

// Common test utilities for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::api::networking::v1::Ingress;
use kingress::errors::{AdminError, SnapshotError};
use kingress::gateway::{AdminApi, AppliedState, Entity, EntityKey};
use kingress::reconcilers::retry::admin_backoff;
use kingress::reconcilers::{EngineConfig, ExecutorConfig, SourceOutcome, StatusReporter};
use kingress::snapshot::{ChangeEvent, Snapshot, SnapshotProvider};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// Fakes
// ============================================================================

/// Snapshot provider serving whatever snapshot the test sets.
#[derive(Default)]
pub struct StaticProvider {
    snapshot: Mutex<Snapshot>,
}

impl StaticProvider {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
        }
    }

    pub fn set(&self, snapshot: Snapshot) {
        *self.snapshot.lock().unwrap() = snapshot;
    }
}

#[async_trait]
impl SnapshotProvider for StaticProvider {
    async fn snapshot(&self) -> Result<Snapshot, SnapshotError> {
        Ok(self.snapshot.lock().unwrap().clone())
    }

    fn subscribe(&self) -> BoxStream<'static, ChangeEvent> {
        stream::empty().boxed()
    }
}

/// Gateway holding its configuration in memory and logging every write.
#[derive(Default)]
pub struct InMemoryGateway {
    entities: Mutex<AppliedState>,
    writes: Mutex<Vec<String>>,
    rejects: Mutex<HashMap<EntityKey, u16>>,
}

impl InMemoryGateway {
    /// Answer every write to `key` with `status`.
    pub fn reject(&self, key: EntityKey, status: u16) {
        self.rejects.lock().unwrap().insert(key, status);
    }

    pub fn accept_all(&self) {
        self.rejects.lock().unwrap().clear();
    }

    /// Writes so far, as `"upsert route/name"` or `"delete route/name"`.
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    pub fn clear_writes(&self) {
        self.writes.lock().unwrap().clear();
    }

    pub fn stored(&self) -> AppliedState {
        self.entities.lock().unwrap().clone()
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entities.lock().unwrap().get(key).is_some()
    }

    fn check(&self, method: &str, key: &EntityKey) -> Result<(), AdminError> {
        self.writes.lock().unwrap().push(format!("{method} {key}"));
        match self.rejects.lock().unwrap().get(key) {
            Some(&status) => Err(AdminError::Status {
                method: method.to_uppercase(),
                url: format!("http://gateway:8001/{}/{}", key.kind.collection(), key.name),
                status,
                body: "{\"message\":\"schema violation\"}".to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl AdminApi for InMemoryGateway {
    async fn upsert(&self, entity: &Entity) -> Result<(), AdminError> {
        self.check("upsert", &entity.key())?;
        self.entities.lock().unwrap().insert(entity.clone());
        Ok(())
    }

    async fn delete(&self, key: &EntityKey) -> Result<(), AdminError> {
        self.check("delete", key)?;
        self.entities.lock().unwrap().entities.remove(key);
        Ok(())
    }

    async fn fetch_applied(&self) -> Result<AppliedState, AdminError> {
        Ok(self.stored())
    }

    async fn probe(&self) -> Result<(), AdminError> {
        Ok(())
    }
}

/// Reporter remembering the latest outcome per object.
#[derive(Default)]
pub struct RecordingReporter {
    latest: Mutex<HashMap<String, SourceOutcome>>,
}

impl RecordingReporter {
    /// Latest outcome for `Kind namespace/name`.
    pub fn outcome(&self, source: &str) -> Option<SourceOutcome> {
        self.latest.lock().unwrap().get(source).cloned()
    }
}

#[async_trait]
impl StatusReporter for RecordingReporter {
    async fn report(&self, outcome: &SourceOutcome) -> anyhow::Result<()> {
        self.latest
            .lock()
            .unwrap()
            .insert(outcome.source.to_string(), outcome.clone());
        Ok(())
    }
}

/// Engine settings with fast retries and no debounce.
pub fn test_engine_config() -> EngineConfig {
    EngineConfig {
        executor: ExecutorConfig {
            concurrency: 4,
            max_attempts: 2,
            backoff: admin_backoff(Duration::from_millis(1), Duration::from_millis(5)),
        },
        min_cycle_interval: Duration::ZERO,
        ..EngineConfig::default()
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// HTTP Ingress of class `kingress` routing `host` + `path` to `service:80`.
pub fn ingress(name: &str, created: &str, host: &str, path: &str, service: &str) -> Ingress {
    serde_json::from_value(json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "Ingress",
        "metadata": {
            "name": name,
            "namespace": "default",
            "uid": format!("uid-{name}"),
            "generation": 1,
            "creationTimestamp": created,
            "annotations": {"kubernetes.io/ingress.class": "kingress"}
        },
        "spec": {"rules": [{
            "host": host,
            "http": {"paths": [{
                "path": path,
                "pathType": "Prefix",
                "backend": {"service": {"name": service, "port": {"number": 80}}}
            }]}
        }]}
    }))
    .unwrap()
}

/// Service exposing port 80 on target port 8080.
pub fn service(name: &str) -> Service {
    serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {"name": name, "namespace": "default"},
        "spec": {"ports": [{"name": "http", "port": 80, "targetPort": 8080}]}
    }))
    .unwrap()
}

/// EndpointSlice with one ready endpoint for `service`.
pub fn endpoint_slice(service: &str, address: &str) -> EndpointSlice {
    serde_json::from_value(json!({
        "apiVersion": "discovery.k8s.io/v1",
        "kind": "EndpointSlice",
        "metadata": {
            "name": format!("{service}-abcde"),
            "namespace": "default",
            "labels": {"kubernetes.io/service-name": service}
        },
        "addressType": "IPv4",
        "endpoints": [{"addresses": [address], "conditions": {"ready": true}}],
        "ports": [{"name": "http", "port": 8080}]
    }))
    .unwrap()
}

/// `svc-a` with one endpoint and an Ingress routing `a.example.com/` to it.
pub fn example_snapshot() -> Snapshot {
    Snapshot {
        ingresses: vec![ingress(
            "web",
            "2024-01-01T00:00:00Z",
            "a.example.com",
            "/",
            "svc-a",
        )],
        services: vec![service("svc-a")],
        endpoint_slices: vec![endpoint_slice("svc-a", "10.0.0.1")],
        ..Snapshot::default()
    }
}
