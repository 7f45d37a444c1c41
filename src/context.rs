// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cluster-backed snapshot provider built on reflector stores.
//!
//! One reflector per watched kind keeps an in-memory [`Store`]. A snapshot is a
//! copy of every store once all of them have completed their initial list.
//! Watch events are forwarded as [`ChangeEvent`]s on a broadcast channel.

use crate::crd::{GatewayConsumer, GatewayPlugin, TCPIngress, UDPIngress};
use crate::errors::SnapshotError;
use crate::snapshot::{ChangeEvent, ChangeType, Snapshot, SnapshotProvider, SourceKind};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::reflector::{self, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Capacity of the change notification channel. Lagging subscribers only
/// lose triggers, which the next event or requeue makes up for.
const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// Reflector stores for every watched kind.
#[derive(Clone)]
pub struct Stores {
    pub ingresses: Store<Ingress>,
    pub tcp_ingresses: Store<TCPIngress>,
    pub udp_ingresses: Store<UDPIngress>,
    pub plugins: Store<GatewayPlugin>,
    pub consumers: Store<GatewayConsumer>,
    pub secrets: Store<Secret>,
    pub services: Store<Service>,
    pub endpoint_slices: Store<EndpointSlice>,
}

/// [`SnapshotProvider`] backed by live watches against the API server.
#[derive(Clone)]
pub struct ClusterSnapshotProvider {
    stores: Stores,
    changes: broadcast::Sender<ChangeEvent>,
    ready_timeout: Duration,
}

impl ClusterSnapshotProvider {
    /// Start one reflector per kind and return the provider.
    ///
    /// When `namespace` is set, every watch is scoped to it.
    #[must_use]
    pub fn start(client: &Client, namespace: Option<&str>, ready_timeout: Duration) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        let stores = Stores {
            ingresses: spawn_reflector(api(client, namespace), SourceKind::Ingress, &changes),
            tcp_ingresses: spawn_reflector(api(client, namespace), SourceKind::TcpIngress, &changes),
            udp_ingresses: spawn_reflector(api(client, namespace), SourceKind::UdpIngress, &changes),
            plugins: spawn_reflector(api(client, namespace), SourceKind::Plugin, &changes),
            consumers: spawn_reflector(api(client, namespace), SourceKind::Consumer, &changes),
            secrets: spawn_reflector(api(client, namespace), SourceKind::Secret, &changes),
            services: spawn_reflector(api(client, namespace), SourceKind::Service, &changes),
            endpoint_slices: spawn_reflector(
                api(client, namespace),
                SourceKind::EndpointSlice,
                &changes,
            ),
        };

        info!(
            namespace = namespace.unwrap_or("<all>"),
            "Started watch caches for all source kinds"
        );

        Self {
            stores,
            changes,
            ready_timeout,
        }
    }

    /// Access the underlying stores.
    #[must_use]
    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    async fn ready<K>(&self, store: &Store<K>, kind: SourceKind) -> Result<Vec<K>, SnapshotError>
    where
        K: Resource + Clone + 'static,
        K::DynamicType: Eq + std::hash::Hash + Clone,
    {
        match tokio::time::timeout(self.ready_timeout, store.wait_until_ready()).await {
            Ok(Ok(())) => Ok(store.state().iter().map(|o| (**o).clone()).collect()),
            Ok(Err(_)) => Err(SnapshotError::StoreDropped {
                kind: kind.as_str(),
            }),
            Err(_) => Err(SnapshotError::NotReady {
                kind: kind.as_str(),
                timeout: self.ready_timeout,
            }),
        }
    }
}

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Spawn a reflector for `K` feeding a new store and forwarding change events.
fn spawn_reflector<K>(
    api: Api<K>,
    kind: SourceKind,
    changes: &broadcast::Sender<ChangeEvent>,
) -> Store<K>
where
    K: Resource + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector::reflector(writer, watcher(api, watcher::Config::default()))
        .default_backoff();
    let changes = changes.clone();

    tokio::spawn(async move {
        let mut stream = Box::pin(stream);
        while let Some(item) = stream.next().await {
            match item {
                Ok(event) => {
                    if let Some(change) = change_event(kind, &event) {
                        // No subscribers yet is fine: the first cycle reads the full snapshot.
                        let _ = changes.send(change);
                    }
                }
                Err(e) => warn!(kind = %kind, error = %e, "Watch error, backing off"),
            }
        }
        error!(kind = %kind, "Watch stream terminated");
    });

    reader
}

/// Trigger for a watch event, `None` for events inside an initial list.
pub(crate) fn change_event<K: Resource>(
    kind: SourceKind,
    event: &watcher::Event<K>,
) -> Option<ChangeEvent> {
    match event {
        watcher::Event::Apply(obj) => Some(ChangeEvent::from_meta(
            kind,
            obj.meta(),
            ChangeType::Applied,
        )),
        watcher::Event::Delete(obj) => Some(ChangeEvent::from_meta(
            kind,
            obj.meta(),
            ChangeType::Deleted,
        )),
        watcher::Event::InitDone => {
            debug!(kind = %kind, "Watch cache (re)listed");
            Some(ChangeEvent::resynced(kind))
        }
        watcher::Event::Init | watcher::Event::InitApply(_) => None,
    }
}

#[async_trait]
impl SnapshotProvider for ClusterSnapshotProvider {
    async fn snapshot(&self) -> Result<Snapshot, SnapshotError> {
        let s = &self.stores;
        Ok(Snapshot {
            ingresses: self.ready(&s.ingresses, SourceKind::Ingress).await?,
            tcp_ingresses: self.ready(&s.tcp_ingresses, SourceKind::TcpIngress).await?,
            udp_ingresses: self.ready(&s.udp_ingresses, SourceKind::UdpIngress).await?,
            plugins: self.ready(&s.plugins, SourceKind::Plugin).await?,
            consumers: self.ready(&s.consumers, SourceKind::Consumer).await?,
            secrets: self.ready(&s.secrets, SourceKind::Secret).await?,
            services: self.ready(&s.services, SourceKind::Service).await?,
            endpoint_slices: self
                .ready(&s.endpoint_slices, SourceKind::EndpointSlice)
                .await?,
        })
    }

    fn subscribe(&self) -> BoxStream<'static, ChangeEvent> {
        let rx = self.changes.subscribe();
        futures::stream::unfold(rx, |mut rx| async move {
            match rx.recv().await {
                Ok(event) => Some((event, rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Change notifications lagged, forcing a resync");
                    Some((ChangeEvent::resynced(SourceKind::Ingress), rx))
                }
                Err(broadcast::error::RecvError::Closed) => None,
            }
        })
        .boxed()
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod context_tests;
