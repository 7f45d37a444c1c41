// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Tests for admin API operations against a mock HTTP server.

use crate::errors::AdminError;
use crate::gateway::{AdminApi, Entity, EntityKey, EntityKind, GatewayAdmin, Upstream};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn admin_for(server: &MockServer) -> GatewayAdmin {
    GatewayAdmin::new(&server.uri(), None, Duration::from_secs(2)).unwrap()
}

fn upstream() -> Entity {
    Entity::Upstream(Upstream {
        name: "echo.default.80.svc".into(),
        algorithm: "round-robin".into(),
    })
}

// =====================================================
// URL building
// =====================================================

#[test]
fn test_build_api_url_without_scheme() {
    let url = super::build_api_url("gateway-admin:8001").unwrap();
    assert_eq!(url.as_str(), "http://gateway-admin:8001/");
}

#[test]
fn test_build_api_url_trailing_slash_and_prefix() {
    let url = super::build_api_url("https://gateway.example.com/admin/").unwrap();
    let endpoint = super::endpoint(&url, &["routes", "default.echo.0.0"]).unwrap();
    assert_eq!(
        endpoint.as_str(),
        "https://gateway.example.com/admin/routes/default.echo.0.0"
    );
}

#[test]
fn test_endpoint_encodes_wildcard_and_slash() {
    let url = super::build_api_url("http://localhost:8001").unwrap();
    let endpoint = super::endpoint(&url, &["snis", "*.example.com"]).unwrap();
    assert!(endpoint.path().starts_with("/snis/"));

    let slashed = super::endpoint(&url, &["routes", "a/b"]).unwrap();
    assert_eq!(slashed.path(), "/routes/a%2Fb");
}

#[test]
fn test_build_api_url_rejects_garbage() {
    assert!(matches!(
        super::build_api_url("http://bad host:8001"),
        Err(AdminError::InvalidUrl(_))
    ));
}

// =====================================================
// Upsert / delete
// =====================================================

#[tokio::test]
async fn test_upsert_puts_body_with_ownership_tag() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/upstreams/echo.default.80.svc"))
        .and(body_partial_json(json!({
            "name": "echo.default.80.svc",
            "algorithm": "round-robin",
            "tags": ["managed-by-kingress"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "1"})))
        .expect(1)
        .mount(&server)
        .await;

    admin_for(&server).upsert(&upstream()).await.unwrap();
}

#[tokio::test]
async fn test_upsert_sends_admin_token() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(header("Kingress-Admin-Token", "s3cret"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let admin =
        GatewayAdmin::new(&server.uri(), Some("s3cret".into()), Duration::from_secs(2)).unwrap();
    admin.upsert(&upstream()).await.unwrap();
}

#[tokio::test]
async fn test_upsert_rejection_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(400).set_body_string("schema violation"))
        .mount(&server)
        .await;

    let err = admin_for(&server).upsert(&upstream()).await.unwrap_err();
    assert_eq!(err.status_code(), Some(400));
    assert!(!err.is_transient());
    assert!(err.to_string().contains("schema violation"));
}

#[tokio::test]
async fn test_upsert_unavailable_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = admin_for(&server).upsert(&upstream()).await.unwrap_err();
    assert!(err.is_transient());
    assert!(!err.is_ambiguous());
}

#[tokio::test]
async fn test_slow_response_maps_to_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let admin = GatewayAdmin::new(&server.uri(), None, Duration::from_millis(50)).unwrap();
    let err = admin.upsert(&upstream()).await.unwrap_err();
    assert!(matches!(err, AdminError::Timeout { .. }), "got {err:?}");
    assert!(err.is_ambiguous());
}

#[tokio::test]
async fn test_delete_missing_entity_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/routes/default.echo.0.0"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    admin_for(&server)
        .delete(&EntityKey::new(EntityKind::Route, "default.echo.0.0"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_delete_conflict_fails() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(409))
        .mount(&server)
        .await;

    let err = admin_for(&server)
        .delete(&EntityKey::new(EntityKind::Service, "default.echo.80"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), Some(409));
}

#[tokio::test]
async fn test_create_refuses_to_overwrite_unmanaged_entity() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/upstreams/echo.default.80.svc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "echo.default.80.svc",
            "algorithm": "round-robin",
            "tags": ["ops"]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = admin_for(&server).create(&upstream()).await.unwrap_err();

    assert!(matches!(err, AdminError::NotOwned { .. }), "got {err:?}");
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_create_writes_when_name_is_free() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/upstreams/echo.default.80.svc"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/upstreams/echo.default.80.svc"))
        .and(body_partial_json(json!({"tags": ["managed-by-kingress"]})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    admin_for(&server).create(&upstream()).await.unwrap();
}

#[tokio::test]
async fn test_create_replaces_entity_already_owned() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/upstreams/echo.default.80.svc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "echo.default.80.svc",
            "algorithm": "least-connections",
            "tags": ["managed-by-kingress"]
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    admin_for(&server).create(&upstream()).await.unwrap();
}

#[tokio::test]
async fn test_unreachable_server_is_transport_error() {
    let admin = GatewayAdmin::new("http://127.0.0.1:9", None, Duration::from_secs(2)).unwrap();
    let err = admin.probe().await.unwrap_err();
    assert!(err.is_transient());
    assert!(err.is_ambiguous());
}

// =====================================================
// Full configuration read
// =====================================================

async fn mount_empty_collections(server: &MockServer) {
    for kind in EntityKind::ALL {
        Mock::given(method("GET"))
            .and(path(format!("/{}", kind.collection())))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .mount(server)
            .await;
    }
}

#[tokio::test]
async fn test_fetch_applied_follows_pagination_and_skips_foreign() {
    let server = MockServer::start().await;

    // Mounted first so the cursor request does not match the first-page mock.
    Mock::given(method("GET"))
        .and(path("/upstreams"))
        .and(query_param("offset", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"name": "web.shop.8080.svc", "tags": ["managed-by-kingress"]}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/upstreams"))
        .and(query_param("tags", "managed-by-kingress"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"name": "echo.default.80.svc", "algorithm": "least-connections", "tags": ["managed-by-kingress"]},
                {"name": "hand-made", "tags": ["ops"]}
            ],
            "offset": "page-2"
        })))
        .mount(&server)
        .await;

    mount_empty_collections(&server).await;

    let applied = admin_for(&server).fetch_applied().await.unwrap();

    assert_eq!(applied.len(), 2);
    let Some(Entity::Upstream(echo)) =
        applied.get(&EntityKey::new(EntityKind::Upstream, "echo.default.80.svc"))
    else {
        panic!("expected echo upstream");
    };
    assert_eq!(echo.algorithm, "least-connections");
    assert!(applied
        .get(&EntityKey::new(EntityKind::Upstream, "web.shop.8080.svc"))
        .is_some());
    assert!(applied
        .get(&EntityKey::new(EntityKind::Upstream, "hand-made"))
        .is_none());
}

#[tokio::test]
async fn test_fetch_applied_reports_decode_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/upstreams"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = admin_for(&server).fetch_applied().await.unwrap_err();
    assert!(matches!(err, AdminError::Decode { .. }));
}

#[tokio::test]
async fn test_probe_hits_status_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"database": {"reachable": true}})))
        .expect(1)
        .mount(&server)
        .await;

    admin_for(&server).probe().await.unwrap();
}
