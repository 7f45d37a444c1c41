// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `snapshot.rs`

use super::*;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

fn meta_with_timestamp(ts: &str) -> ObjectMeta {
    let time: Time = serde_json::from_value(serde_json::json!(ts)).unwrap();
    ObjectMeta {
        name: Some("echo".into()),
        namespace: Some("default".into()),
        generation: Some(3),
        resource_version: Some("1234".into()),
        creation_timestamp: Some(time),
        ..ObjectMeta::default()
    }
}

#[test]
fn test_creation_time_parses_timestamp() {
    let meta = meta_with_timestamp("2024-05-01T10:00:00Z");
    let created = creation_time(&meta);
    assert_eq!(created.to_rfc3339(), "2024-05-01T10:00:00+00:00");
}

#[test]
fn test_creation_time_defaults_to_epoch() {
    assert_eq!(
        creation_time(&ObjectMeta::default()),
        DateTime::<Utc>::UNIX_EPOCH
    );
}

#[test]
fn test_change_event_from_meta() {
    let event = ChangeEvent::from_meta(
        SourceKind::Ingress,
        &meta_with_timestamp("2024-05-01T10:00:00Z"),
        ChangeType::Applied,
    );
    assert_eq!(event.namespace, "default");
    assert_eq!(event.name, "echo");
    assert_eq!(event.generation, Some(3));
    assert_eq!(event.resource_version.as_deref(), Some("1234"));
    assert_eq!(
        event.source_ref(),
        SourceRef::new(SourceKind::Ingress, "default", "echo")
    );
}

#[test]
fn test_metadata_digest_changes_with_annotations() {
    let meta = meta_with_timestamp("2024-05-01T10:00:00Z");
    let mut annotated = meta.clone();
    annotated.annotations = Some(
        [("kubernetes.io/ingress.class".to_string(), "kingress".to_string())]
            .into_iter()
            .collect(),
    );
    let mut bumped = meta.clone();
    bumped.resource_version = Some("1235".into());

    assert_eq!(metadata_digest(&meta), metadata_digest(&bumped));
    assert_ne!(metadata_digest(&meta), metadata_digest(&annotated));
    assert_eq!(
        ChangeEvent::from_meta(SourceKind::Plugin, &annotated, ChangeType::Applied).metadata_digest,
        Some(metadata_digest(&annotated))
    );
}

#[test]
fn test_kind_classification() {
    assert!(SourceKind::Ingress.is_reported());
    assert!(!SourceKind::Ingress.has_status());
    assert!(SourceKind::Plugin.has_status());
    assert!(!SourceKind::Secret.is_reported());
    assert!(!SourceKind::EndpointSlice.tracks_generation());
    assert!(!SourceKind::Ingress.tracks_generation());
    assert!(SourceKind::Consumer.tracks_generation());
    assert_eq!(SourceKind::TcpIngress.as_str(), "TCPIngress");
}

#[test]
fn test_source_ref_orders_by_kind_then_name() {
    let a = SourceRef::new(SourceKind::Ingress, "b", "x");
    let b = SourceRef::new(SourceKind::TcpIngress, "a", "a");
    assert!(a < b);
    assert_eq!(a.to_string(), "Ingress b/x");
}

#[test]
fn test_empty_snapshot() {
    assert!(Snapshot::default().is_empty());
}
