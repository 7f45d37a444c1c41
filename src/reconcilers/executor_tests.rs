// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `executor.rs`

use super::*;
use crate::errors::AdminError;
use crate::gateway::{AppliedState, Consumer, EntityKind, Route, Service, Upstream};
use crate::reconcilers::diff::diff;
use crate::reconcilers::retry::admin_backoff;
use crate::reconcilers::types::DesiredGraph;
use crate::status_reasons::{
    REASON_ADMIN_BAD_REQUEST, REASON_ADMIN_TIMEOUT, REASON_CANCELLED, REASON_DEADLINE_EXCEEDED,
    REASON_FOREIGN_ENTITY,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

// =====================================================
// Fake admin API
// =====================================================

#[derive(Default)]
struct FakeAdmin {
    calls: Mutex<Vec<String>>,
    scripted: Mutex<HashMap<EntityKey, VecDeque<Result<(), AdminError>>>>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeAdmin {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn script(&self, key: EntityKey, results: Vec<Result<(), AdminError>>) {
        self.scripted
            .lock()
            .unwrap()
            .insert(key, results.into_iter().collect());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    async fn call(&self, label: String, key: &EntityKey) -> Result<(), AdminError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(label);
        self.scripted
            .lock()
            .unwrap()
            .get_mut(key)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(()))
    }
}

#[async_trait]
impl AdminApi for FakeAdmin {
    async fn upsert(&self, entity: &Entity) -> Result<(), AdminError> {
        self.call(format!("upsert {}", entity.key()), &entity.key())
            .await
    }

    async fn delete(&self, key: &EntityKey) -> Result<(), AdminError> {
        self.call(format!("delete {key}"), key).await
    }

    async fn fetch_applied(&self) -> Result<AppliedState, AdminError> {
        Ok(AppliedState::new())
    }

    async fn probe(&self) -> Result<(), AdminError> {
        Ok(())
    }
}

// =====================================================
// Fixtures
// =====================================================

fn status(code: u16) -> AdminError {
    AdminError::Status {
        method: "PUT".into(),
        url: "http://gw:8001/x".into(),
        status: code,
        body: String::new(),
    }
}

fn timeout() -> AdminError {
    AdminError::Timeout {
        url: "http://gw:8001/x".into(),
        timeout: Duration::from_secs(1),
    }
}

fn upstream(name: &str) -> Entity {
    Entity::Upstream(Upstream {
        name: name.into(),
        algorithm: "round-robin".into(),
    })
}

fn service() -> Entity {
    Entity::Service(Service {
        name: "default.svc-a.80".into(),
        protocol: "http".into(),
        host: "svc-a.default.80.svc".into(),
        port: 80,
        path: None,
        retries: 5,
        connect_timeout: 60_000,
        read_timeout: 60_000,
        write_timeout: 60_000,
    })
}

fn route() -> Entity {
    Entity::Route(Route {
        name: "default.web.0.0".into(),
        service: "default.svc-a.80".into(),
        protocols: vec!["http".into()],
        hosts: vec!["a.example.com".into()],
        paths: vec!["/".into()],
        snis: Vec::new(),
        destinations: Vec::new(),
        strip_path: false,
        preserve_host: true,
        https_redirect_status_code: 426,
    })
}

fn graph(entities: Vec<Entity>) -> DesiredGraph {
    let mut graph = DesiredGraph::default();
    for entity in entities {
        graph.entities.insert(entity.key(), entity);
    }
    graph
}

fn config() -> ExecutorConfig {
    ExecutorConfig {
        concurrency: 4,
        max_attempts: 3,
        backoff: admin_backoff(Duration::from_millis(1), Duration::from_millis(5)),
    }
}

fn far_deadline() -> Instant {
    Instant::now() + Duration::from_secs(30)
}

fn key(kind: EntityKind, name: &str) -> EntityKey {
    EntityKey::new(kind, name)
}

// =====================================================
// Tests
// =====================================================

#[tokio::test]
async fn test_applies_in_dependency_order() {
    let admin = FakeAdmin::default();
    let changeset = diff(
        &graph(vec![route(), service(), upstream("svc-a.default.80.svc")]),
        &AppliedState::new(),
    );
    let (_tx, rx) = watch::channel(false);

    let report = execute(&admin, &changeset, &config(), far_deadline(), &rx).await;

    assert!(report.all_applied());
    assert_eq!(
        admin.calls(),
        vec![
            "upsert upstream/svc-a.default.80.svc",
            "upsert service/default.svc-a.80",
            "upsert route/default.web.0.0",
        ]
    );
}

#[tokio::test]
async fn test_deletes_dependents_first() {
    let admin = FakeAdmin::default();
    let applied: AppliedState = vec![upstream("svc-a.default.80.svc"), service(), route()]
        .into_iter()
        .collect();
    let changeset = diff(&DesiredGraph::default(), &applied);
    let (_tx, rx) = watch::channel(false);

    let report = execute(&admin, &changeset, &config(), far_deadline(), &rx).await;

    assert!(report.all_applied());
    assert_eq!(
        admin.calls(),
        vec![
            "delete route/default.web.0.0",
            "delete service/default.svc-a.80",
            "delete upstream/svc-a.default.80.svc",
        ]
    );
}

#[tokio::test]
async fn test_transient_error_is_retried() {
    let admin = FakeAdmin::default();
    admin.script(
        key(EntityKind::Service, "default.svc-a.80"),
        vec![Err(status(503)), Ok(())],
    );
    let changeset = diff(
        &graph(vec![upstream("svc-a.default.80.svc"), service()]),
        &AppliedState::new(),
    );
    let (_tx, rx) = watch::channel(false);

    let report = execute(&admin, &changeset, &config(), far_deadline(), &rx).await;

    assert_eq!(
        report.outcome(&key(EntityKind::Service, "default.svc-a.80")),
        Some(&OpOutcome::Applied { attempts: 2 })
    );
    assert!(report.all_applied());
}

#[tokio::test]
async fn test_permanent_failure_skips_dependents_only() {
    let admin = FakeAdmin::default();
    admin.script(
        key(EntityKind::Service, "default.svc-a.80"),
        vec![Err(status(400))],
    );
    let changeset = diff(
        &graph(vec![
            upstream("svc-a.default.80.svc"),
            upstream("unrelated.default.80.svc"),
            service(),
            route(),
        ]),
        &AppliedState::new(),
    );
    let (_tx, rx) = watch::channel(false);

    let report = execute(&admin, &changeset, &config(), far_deadline(), &rx).await;

    let service_key = key(EntityKind::Service, "default.svc-a.80");
    match report.outcome(&service_key) {
        Some(OpOutcome::Failed {
            reason, ambiguous, ..
        }) => {
            assert_eq!(reason, REASON_ADMIN_BAD_REQUEST);
            assert!(!ambiguous);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(
        report.outcome(&key(EntityKind::Route, "default.web.0.0")),
        Some(&OpOutcome::Skipped {
            blocked_by: service_key
        })
    );
    assert!(report
        .outcome(&key(EntityKind::Upstream, "unrelated.default.80.svc"))
        .is_some_and(OpOutcome::is_applied));
    assert_eq!(
        admin
            .calls()
            .iter()
            .filter(|c| c.contains("service/"))
            .count(),
        1
    );
    assert!(!report.has_ambiguous());
}

#[tokio::test]
async fn test_exhausted_timeouts_are_ambiguous() {
    let admin = FakeAdmin::default();
    let upstream_key = key(EntityKind::Upstream, "svc-a.default.80.svc");
    admin.script(
        upstream_key.clone(),
        vec![Err(timeout()), Err(timeout()), Err(timeout())],
    );
    let changeset = diff(
        &graph(vec![upstream("svc-a.default.80.svc")]),
        &AppliedState::new(),
    );
    let (_tx, rx) = watch::channel(false);

    let report = execute(&admin, &changeset, &config(), far_deadline(), &rx).await;

    match report.outcome(&upstream_key) {
        Some(OpOutcome::Failed {
            reason,
            ambiguous,
            message,
        }) => {
            assert_eq!(reason, REASON_ADMIN_TIMEOUT);
            assert!(ambiguous);
            assert!(message.contains("3 attempt"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(report.has_ambiguous());
    assert_eq!(admin.calls().len(), 3);
}

#[tokio::test]
async fn test_expired_deadline_abandons_pending_work() {
    let admin = FakeAdmin::default();
    let changeset = diff(
        &graph(vec![upstream("svc-a.default.80.svc"), service()]),
        &AppliedState::new(),
    );
    let (_tx, rx) = watch::channel(false);

    let report = execute(&admin, &changeset, &config(), Instant::now(), &rx).await;

    assert!(admin.calls().is_empty());
    assert!(matches!(
        report.outcome(&key(EntityKind::Upstream, "svc-a.default.80.svc")),
        Some(OpOutcome::Failed { reason, ambiguous: false, .. }) if reason == REASON_DEADLINE_EXCEEDED
    ));
    assert!(matches!(
        report.outcome(&key(EntityKind::Service, "default.svc-a.80")),
        Some(OpOutcome::Skipped { .. })
    ));
}

#[tokio::test]
async fn test_shutdown_before_start_is_not_ambiguous() {
    let admin = FakeAdmin::default();
    let changeset = diff(
        &graph(vec![upstream("svc-a.default.80.svc")]),
        &AppliedState::new(),
    );
    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();

    let report = execute(&admin, &changeset, &config(), far_deadline(), &rx).await;

    assert!(matches!(
        report.outcome(&key(EntityKind::Upstream, "svc-a.default.80.svc")),
        Some(OpOutcome::Failed { reason, ambiguous: false, .. }) if reason == REASON_CANCELLED
    ));
    assert!(admin.calls().is_empty());
}

#[tokio::test]
async fn test_shutdown_interrupts_in_flight_call() {
    let admin = FakeAdmin::with_delay(Duration::from_secs(30));
    let changeset = diff(
        &graph(vec![upstream("svc-a.default.80.svc")]),
        &AppliedState::new(),
    );
    let (tx, rx) = watch::channel(false);
    let cfg = config();

    let (report, ()) = tokio::join!(
        execute(&admin, &changeset, &cfg, far_deadline(), &rx),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(true).unwrap();
        }
    );

    assert!(matches!(
        report.outcome(&key(EntityKind::Upstream, "svc-a.default.80.svc")),
        Some(OpOutcome::Failed { reason, ambiguous: true, .. }) if reason == REASON_CANCELLED
    ));
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let admin = FakeAdmin::with_delay(Duration::from_millis(20));
    let upstreams = (0..6)
        .map(|i| upstream(&format!("svc-{i}.default.80.svc")))
        .collect();
    let changeset = diff(&graph(upstreams), &AppliedState::new());
    let (_tx, rx) = watch::channel(false);
    let config = ExecutorConfig {
        concurrency: 2,
        ..config()
    };

    let report = execute(&admin, &changeset, &config, far_deadline(), &rx).await;

    assert_eq!(report.applied_count(), 6);
    assert_eq!(admin.max_in_flight.load(Ordering::SeqCst), 2);
}

#[test]
fn test_dependencies_follow_references() {
    let applied: AppliedState = vec![route()].into_iter().collect();
    let changeset = diff(
        &graph(vec![upstream("svc-a.default.80.svc"), service()]),
        &applied,
    );
    let ops = &changeset.operations;
    let deps = dependencies(ops);

    let index = |kind: EntityKind| ops.iter().position(|op| op.key.kind == kind).unwrap();
    assert!(deps[index(EntityKind::Upstream)].is_empty());
    assert_eq!(deps[index(EntityKind::Service)], vec![index(EntityKind::Upstream)]);
    assert!(deps[index(EntityKind::Route)].is_empty());
}

#[tokio::test]
async fn test_failing_upstream_does_not_hold_back_unrelated_chain() {
    let admin = FakeAdmin::default();
    let broken = key(EntityKind::Upstream, "broken");
    admin.script(broken.clone(), (0..10_000).map(|_| Err(status(503))).collect());
    let changeset = diff(
        &graph(vec![
            upstream("broken"),
            upstream("svc-a.default.80.svc"),
            service(),
            route(),
        ]),
        &AppliedState::new(),
    );
    let (_tx, rx) = watch::channel(false);
    let config = ExecutorConfig {
        max_attempts: 10_000,
        ..config()
    };
    let deadline = Instant::now() + Duration::from_millis(700);

    let report = execute(&admin, &changeset, &config, deadline, &rx).await;

    assert!(matches!(
        report.outcome(&broken),
        Some(OpOutcome::Failed { reason, .. }) if reason == REASON_DEADLINE_EXCEEDED
    ));
    assert!(report
        .outcome(&key(EntityKind::Service, "default.svc-a.80"))
        .is_some_and(OpOutcome::is_applied));
    assert!(report
        .outcome(&key(EntityKind::Route, "default.web.0.0"))
        .is_some_and(OpOutcome::is_applied));
}

#[tokio::test]
async fn test_freed_username_is_deleted_before_reuse() {
    let consumer = |name: &str| {
        Entity::Consumer(Consumer {
            name: name.into(),
            username: "alice".into(),
            custom_id: None,
        })
    };
    let admin = FakeAdmin::default();
    let applied: AppliedState = vec![consumer("default.old")].into_iter().collect();
    let changeset = diff(&graph(vec![consumer("default.new")]), &applied);
    let (_tx, rx) = watch::channel(false);

    let report = execute(&admin, &changeset, &config(), far_deadline(), &rx).await;

    assert!(report.all_applied());
    assert_eq!(
        admin.calls(),
        vec!["delete consumer/default.old", "upsert consumer/default.new"]
    );
}

#[test]
fn test_unique_attribute_edge_never_closes_a_cycle() {
    let consumer = |name: &str, username: &str| {
        Entity::Consumer(Consumer {
            name: name.into(),
            username: username.into(),
            custom_id: None,
        })
    };
    let applied: AppliedState = vec![consumer("default.old", "alice")].into_iter().collect();
    let changeset = diff(&graph(vec![consumer("default.new", "alice")]), &applied);
    let ops = &changeset.operations;
    let deps = dependencies(ops);

    let create = ops.iter().position(|op| op.action == Action::Create).unwrap();
    let delete = ops.iter().position(|op| op.action == Action::Delete).unwrap();
    assert_eq!(deps[create], vec![delete]);
    assert!(!depends_on(&deps, delete, create));
}

#[tokio::test]
async fn test_unmanaged_entity_fails_and_skips_dependents() {
    let admin = FakeAdmin::default();
    let upstream_key = key(EntityKind::Upstream, "svc-a.default.80.svc");
    admin.script(
        upstream_key.clone(),
        vec![Err(AdminError::NotOwned {
            kind: "upstream".into(),
            name: "svc-a.default.80.svc".into(),
        })],
    );
    let changeset = diff(
        &graph(vec![upstream("svc-a.default.80.svc"), service()]),
        &AppliedState::new(),
    );
    let (_tx, rx) = watch::channel(false);

    let report = execute(&admin, &changeset, &config(), far_deadline(), &rx).await;

    assert!(matches!(
        report.outcome(&upstream_key),
        Some(OpOutcome::Failed { reason, ambiguous: false, .. }) if reason == REASON_FOREIGN_ENTITY
    ));
    assert_eq!(
        report.outcome(&key(EntityKind::Service, "default.svc-a.80")),
        Some(&OpOutcome::Skipped {
            blocked_by: upstream_key
        })
    );
    assert_eq!(admin.calls().len(), 1);
}
