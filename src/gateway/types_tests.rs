// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `types.rs`

use super::*;
use serde_json::json;

fn route(name: &str) -> Route {
    Route {
        name: name.to_string(),
        service: "default.echo.80".to_string(),
        protocols: vec!["https".into(), "http".into()],
        hosts: vec!["b.example.com".into(), "a.example.com".into()],
        paths: vec!["/".into()],
        snis: vec![],
        destinations: vec![],
        strip_path: false,
        preserve_host: true,
        https_redirect_status_code: 426,
    }
}

#[test]
fn test_kind_rank_orders_dependencies_first() {
    assert!(EntityKind::Upstream.rank() < EntityKind::Service.rank());
    assert!(EntityKind::Service.rank() < EntityKind::Route.rank());
    assert!(EntityKind::Route.rank() < EntityKind::Plugin.rank());
    assert!(EntityKind::Certificate.rank() < EntityKind::Sni.rank());
    assert!(EntityKind::Consumer.rank() < EntityKind::Credential.rank());
}

#[test]
fn test_references_follow_entity_relationships() {
    let r = Entity::Route(route("default.echo.0.0"));
    assert_eq!(
        r.references(),
        vec![EntityKey::new(EntityKind::Service, "default.echo.80")]
    );

    let plugin = Entity::Plugin(Plugin {
        name: "default.auth.default.echo.0.0".into(),
        plugin: "key-auth".into(),
        config: json!({}),
        enabled: true,
        scope: PluginScope::Route("default.echo.0.0".into()),
    });
    assert_eq!(
        plugin.references(),
        vec![EntityKey::new(EntityKind::Route, "default.echo.0.0")]
    );

    let global = Entity::Plugin(Plugin {
        name: "default.cors".into(),
        plugin: "cors".into(),
        config: json!({}),
        enabled: true,
        scope: PluginScope::Global,
    });
    assert!(global.references().is_empty());
}

#[test]
fn test_body_carries_ownership_tag() {
    let entity = Entity::Upstream(Upstream {
        name: "echo.default.80.svc".into(),
        algorithm: "round-robin".into(),
    });
    let body = entity.to_body().unwrap();
    assert_eq!(body["name"], json!("echo.default.80.svc"));
    assert!(is_owned(&body));
}

#[test]
fn test_from_body_fills_defaults_and_normalizes() {
    let body = json!({
        "id": "8f1f3c5e-0000-0000-0000-000000000000",
        "name": "default.echo.0.0",
        "service": "default.echo.80",
        "protocols": ["https", "http"],
        "hosts": ["b.example.com", "a.example.com"],
        "paths": ["/"],
        "tags": ["managed-by-kingress"]
    });

    let decoded = Entity::from_body(EntityKind::Route, body).unwrap();
    let mut expected = Entity::Route(route("default.echo.0.0"));
    expected.normalize();

    assert_eq!(decoded, expected);
}

#[test]
fn test_service_defaults_match_builder_defaults() {
    let decoded = Entity::from_body(
        EntityKind::Service,
        json!({"name": "default.echo.80", "protocol": "http", "host": "echo.default.80.svc", "port": 80}),
    )
    .unwrap();

    let Entity::Service(service) = decoded else {
        panic!("expected a service");
    };
    assert_eq!(service.retries, 5);
    assert_eq!(service.connect_timeout, 60_000);
    assert_eq!(service.path, None);
}

#[test]
fn test_is_owned_rejects_foreign_entities() {
    assert!(!is_owned(&json!({"name": "manual", "tags": ["team-a"]})));
    assert!(!is_owned(&json!({"name": "manual"})));
}

#[test]
fn test_entity_key_display() {
    let key = EntityKey::new(EntityKind::Sni, "a.example.com");
    assert_eq!(key.to_string(), "sni/a.example.com");
}
