// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! End-to-end tests of the reconcile pipeline.
//!
//! Most tests drive the engine against an in-memory gateway. The last one
//! points the real HTTP admin client at a `wiremock` server.

mod common;

use common::*;
use kingress::gateway::{EntityKey, EntityKind, GatewayAdmin};
use kingress::reconcilers::{build, validate, BuildOptions, ConditionType, Engine};
use kingress::snapshot::Snapshot;
use kingress::status_reasons::{REASON_ADMIN_BAD_REQUEST, REASON_LISTEN_POINT_CONFLICT};
use std::time::Duration;
use tokio::sync::watch;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

type MemoryEngine = Engine<StaticProvider, InMemoryGateway, RecordingReporter>;

fn engine(snapshot: Snapshot) -> MemoryEngine {
    Engine::new(
        StaticProvider::new(snapshot),
        InMemoryGateway::default(),
        RecordingReporter::default(),
        test_engine_config(),
    )
}

fn position(writes: &[String], entry: &str) -> usize {
    writes
        .iter()
        .position(|w| w == entry)
        .unwrap_or_else(|| panic!("{entry} not found in {writes:?}"))
}

#[tokio::test]
async fn test_example_ingress_is_created_and_removed_in_dependency_order() {
    let engine = engine(example_snapshot());
    let (_tx, shutdown) = watch::channel(false);

    let summary = engine.reconcile_once(&shutdown).await.unwrap();
    assert!(summary.is_clean());

    let writes = engine.admin().writes();
    let upstream = position(&writes, "upsert upstream/svc-a.default.80.svc");
    let target = position(&writes, "upsert target/svc-a.default.80.svc@10.0.0.1:8080");
    let service = position(&writes, "upsert service/default.svc-a.80");
    let route = position(&writes, "upsert route/default.web.0.0");
    assert!(upstream < target);
    assert!(upstream < service);
    assert!(service < route);

    let outcome = engine.reporter().outcome("Ingress default/web").unwrap();
    assert_eq!(outcome.outcome, ConditionType::Ready);

    engine.admin().clear_writes();
    engine.provider().set(Snapshot::default());
    engine.reconcile_once(&shutdown).await.unwrap();

    let writes = engine.admin().writes();
    assert!(
        position(&writes, "delete route/default.web.0.0")
            < position(&writes, "delete service/default.svc-a.80")
    );
    assert!(
        position(&writes, "delete service/default.svc-a.80")
            < position(&writes, "delete upstream/svc-a.default.80.svc")
    );
    assert!(engine.admin().stored().is_empty());
}

#[tokio::test]
async fn test_repeated_cycles_are_idempotent() {
    let engine = engine(example_snapshot());
    let (_tx, shutdown) = watch::channel(false);

    engine.reconcile_once(&shutdown).await.unwrap();
    let stored = engine.admin().stored();
    engine.admin().clear_writes();

    for _ in 0..3 {
        let summary = engine.reconcile_once(&shutdown).await.unwrap();
        assert_eq!(summary.operations, 0);
    }
    assert!(engine.admin().writes().is_empty());
    assert_eq!(engine.admin().stored(), stored);
}

#[tokio::test]
async fn test_rejected_entity_only_fails_its_own_ingress() {
    let mut snapshot = example_snapshot();
    snapshot.ingresses.push(ingress(
        "web-b",
        "2024-01-02T00:00:00Z",
        "b.example.com",
        "/",
        "svc-b",
    ));
    snapshot.services.push(service("svc-b"));
    snapshot
        .endpoint_slices
        .push(endpoint_slice("svc-b", "10.0.0.2"));

    let engine = engine(snapshot);
    engine.admin().reject(
        EntityKey::new(EntityKind::Service, "default.svc-b.80"),
        400,
    );
    let (_tx, shutdown) = watch::channel(false);

    let summary = engine.reconcile_once(&shutdown).await.unwrap();

    assert_eq!(summary.failed, 1);
    assert!(summary.skipped >= 1, "route of web-b depends on the rejected service");
    assert!(!summary.cache_invalidated, "a 400 is a definite outcome");

    let ready = engine.reporter().outcome("Ingress default/web").unwrap();
    assert_eq!(ready.outcome, ConditionType::Ready);
    let failed = engine.reporter().outcome("Ingress default/web-b").unwrap();
    assert_eq!(failed.outcome, ConditionType::SyncFailed);
    assert_eq!(failed.reason, REASON_ADMIN_BAD_REQUEST);

    assert!(engine
        .admin()
        .contains(&EntityKey::new(EntityKind::Route, "default.web.0.0")));
    assert!(!engine
        .admin()
        .contains(&EntityKey::new(EntityKind::Route, "default.web-b.0.0")));

    // Once the gateway accepts the service, the next cycle finishes the job.
    engine.admin().accept_all();
    let summary = engine.reconcile_once(&shutdown).await.unwrap();
    assert!(summary.is_clean());
    let recovered = engine.reporter().outcome("Ingress default/web-b").unwrap();
    assert_eq!(recovered.outcome, ConditionType::Ready);
}

#[tokio::test]
async fn test_older_ingress_wins_a_listen_point_and_loser_takes_over_later() {
    let mut snapshot = example_snapshot();
    snapshot.ingresses.push(ingress(
        "web-late",
        "2024-06-01T00:00:00Z",
        "a.example.com",
        "/",
        "svc-a",
    ));

    let engine = engine(snapshot);
    let (_tx, shutdown) = watch::channel(false);
    engine.reconcile_once(&shutdown).await.unwrap();

    let winner = engine.reporter().outcome("Ingress default/web").unwrap();
    assert_eq!(winner.outcome, ConditionType::Ready);
    let loser = engine.reporter().outcome("Ingress default/web-late").unwrap();
    assert_eq!(loser.outcome, ConditionType::Conflicting);
    assert_eq!(loser.reason, REASON_LISTEN_POINT_CONFLICT);
    assert!(!engine
        .admin()
        .contains(&EntityKey::new(EntityKind::Route, "default.web-late.0.0")));

    // Remove the winner: the loser now owns the listen point.
    engine.provider().set(Snapshot {
        ingresses: vec![ingress(
            "web-late",
            "2024-06-01T00:00:00Z",
            "a.example.com",
            "/",
            "svc-a",
        )],
        ..example_snapshot()
    });
    engine.reconcile_once(&shutdown).await.unwrap();

    let promoted = engine.reporter().outcome("Ingress default/web-late").unwrap();
    assert_eq!(promoted.outcome, ConditionType::Ready);
    assert!(engine
        .admin()
        .contains(&EntityKey::new(EntityKind::Route, "default.web-late.0.0")));
    assert!(!engine
        .admin()
        .contains(&EntityKey::new(EntityKind::Route, "default.web.0.0")));
}

#[test]
fn test_fingerprint_ignores_object_order() {
    let mut first = example_snapshot();
    first.ingresses.push(ingress(
        "web-b",
        "2024-01-02T00:00:00Z",
        "b.example.com",
        "/",
        "svc-a",
    ));
    let mut second = first.clone();
    second.ingresses.reverse();

    let options = BuildOptions::default();
    let a = validate(build(&first, &options)).graph.fingerprint();
    let b = validate(build(&second, &options)).graph.fingerprint();

    assert_eq!(a, b);
}

#[tokio::test]
async fn test_http_admin_client_applies_example_against_mock_gateway() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/[a-z]+$"))
        .and(query_param("tags", "managed-by-kingress"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&server)
        .await;

    let admin = GatewayAdmin::new(&server.uri(), None, Duration::from_secs(5)).unwrap();
    let engine = Engine::new(
        StaticProvider::new(example_snapshot()),
        admin,
        RecordingReporter::default(),
        test_engine_config(),
    );
    let (_tx, shutdown) = watch::channel(false);

    let summary = engine.reconcile_once(&shutdown).await.unwrap();
    assert!(summary.is_clean());
    assert_eq!(summary.applied, 4);

    let puts: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.method.as_str() == "PUT")
        .map(|r| r.url.path().to_string())
        .collect();
    assert_eq!(puts.len(), 4);
    let service = position(&puts, "/services/default.svc-a.80");
    let route = position(&puts, "/routes/default.web.0.0");
    assert!(service < route, "route written before its service: {puts:?}");
}
