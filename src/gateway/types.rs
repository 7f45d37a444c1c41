// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Gateway entity types.
//!
//! Every entity is identified by an [`EntityKey`] (kind + name). Names are a pure
//! function of the Kubernetes object that produced them, so rebuilding from an
//! unchanged snapshot yields identical keys and attributes. Optional attributes
//! are normalized to the same defaults whether the entity comes from the builder
//! or from the admin API, which keeps the diff free of spurious updates.

use crate::constants::{
    DEFAULT_HTTPS_REDIRECT_STATUS_CODE, DEFAULT_LB_ALGORITHM, DEFAULT_SERVICE_RETRIES,
    DEFAULT_SERVICE_TIMEOUT_MS, DEFAULT_TARGET_WEIGHT,
};
use crate::labels::OWNERSHIP_TAG;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Kinds of entities managed through the admin API.
///
/// Declaration order doubles as the canonical sort order of [`EntityKey`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Upstream,
    Certificate,
    Consumer,
    Service,
    Target,
    Sni,
    Credential,
    Route,
    Plugin,
}

impl EntityKind {
    /// All kinds, in dependency order.
    pub const ALL: [EntityKind; 9] = [
        EntityKind::Upstream,
        EntityKind::Certificate,
        EntityKind::Consumer,
        EntityKind::Service,
        EntityKind::Target,
        EntityKind::Sni,
        EntityKind::Credential,
        EntityKind::Route,
        EntityKind::Plugin,
    ];

    /// Admin API collection path segment.
    #[must_use]
    pub fn collection(self) -> &'static str {
        match self {
            EntityKind::Upstream => "upstreams",
            EntityKind::Certificate => "certificates",
            EntityKind::Consumer => "consumers",
            EntityKind::Service => "services",
            EntityKind::Target => "targets",
            EntityKind::Sni => "snis",
            EntityKind::Credential => "credentials",
            EntityKind::Route => "routes",
            EntityKind::Plugin => "plugins",
        }
    }

    /// Dependency rank: an entity only references entities of a lower rank.
    ///
    /// - 0: Upstream, Certificate, Consumer
    /// - 1: Service, Target, SNI, Credential
    /// - 2: Route
    /// - 3: Plugin
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            EntityKind::Upstream | EntityKind::Certificate | EntityKind::Consumer => 0,
            EntityKind::Service | EntityKind::Target | EntityKind::Sni | EntityKind::Credential => {
                1
            }
            EntityKind::Route => 2,
            EntityKind::Plugin => 3,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Upstream => "upstream",
            EntityKind::Certificate => "certificate",
            EntityKind::Consumer => "consumer",
            EntityKind::Service => "service",
            EntityKind::Target => "target",
            EntityKind::Sni => "sni",
            EntityKind::Credential => "credential",
            EntityKind::Route => "route",
            EntityKind::Plugin => "plugin",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a gateway entity.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub name: String,
}

impl EntityKey {
    #[must_use]
    pub fn new(kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

fn default_algorithm() -> String {
    DEFAULT_LB_ALGORITHM.to_string()
}

fn default_weight() -> u32 {
    DEFAULT_TARGET_WEIGHT
}

fn default_retries() -> u32 {
    DEFAULT_SERVICE_RETRIES
}

fn default_timeout() -> u32 {
    DEFAULT_SERVICE_TIMEOUT_MS
}

fn default_true() -> bool {
    true
}

fn default_redirect_code() -> u16 {
    DEFAULT_HTTPS_REDIRECT_STATUS_CODE
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// A load-balanced target group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Upstream {
    pub name: String,
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
}

/// One backend endpoint of an [`Upstream`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub upstream: String,
    /// `address:port`
    pub target: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

/// A backend destination.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub protocol: String,
    /// Name of the [`Upstream`] traffic is balanced over.
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_timeout")]
    pub connect_timeout: u32,
    #[serde(default = "default_timeout")]
    pub read_timeout: u32,
    #[serde(default = "default_timeout")]
    pub write_timeout: u32,
}

/// Listen address of a stream route.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Destination {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    pub port: u16,
}

/// A match rule forwarding to a [`Service`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub name: String,
    pub service: String,
    pub protocols: Vec<String>,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub snis: Vec<String>,
    #[serde(default)]
    pub destinations: Vec<Destination>,
    #[serde(default)]
    pub strip_path: bool,
    #[serde(default = "default_true")]
    pub preserve_host: bool,
    #[serde(default = "default_redirect_code")]
    pub https_redirect_status_code: u16,
}

impl Route {
    /// True for routes matching on host/path rather than on a listen port.
    #[must_use]
    pub fn is_http(&self) -> bool {
        self.protocols.iter().any(|p| p == "http" || p == "https")
    }
}

/// TLS key material.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub name: String,
    pub cert: String,
    pub key: String,
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("name", &self.name)
            .field("cert_len", &self.cert.len())
            .finish_non_exhaustive()
    }
}

/// Hostname-to-certificate binding. The name is the hostname.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sni {
    pub name: String,
    pub certificate: String,
}

/// A client identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consumer {
    pub name: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_id: Option<String>,
}

/// A credential belonging to a [`Consumer`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub name: String,
    pub consumer: String,
    pub credential_type: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("name", &self.name)
            .field("consumer", &self.consumer)
            .field("credential_type", &self.credential_type)
            .finish_non_exhaustive()
    }
}

/// What a [`Plugin`] applies to.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "name", rename_all = "lowercase")]
pub enum PluginScope {
    Global,
    Service(String),
    Route(String),
    Consumer(String),
}

impl PluginScope {
    /// Key of the entity the plugin is attached to, if any.
    #[must_use]
    pub fn target(&self) -> Option<EntityKey> {
        match self {
            PluginScope::Global => None,
            PluginScope::Service(name) => Some(EntityKey::new(EntityKind::Service, name.clone())),
            PluginScope::Route(name) => Some(EntityKey::new(EntityKind::Route, name.clone())),
            PluginScope::Consumer(name) => {
                Some(EntityKey::new(EntityKind::Consumer, name.clone()))
            }
        }
    }
}

impl fmt::Display for PluginScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target() {
            Some(key) => write!(f, "{key}"),
            None => f.write_str("global"),
        }
    }
}

/// A behavior attachment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Plugin {
    pub name: String,
    pub plugin: String,
    #[serde(default = "empty_object")]
    pub config: Value,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_scope")]
    pub scope: PluginScope,
}

fn default_scope() -> PluginScope {
    PluginScope::Global
}

/// Any gateway entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Entity {
    Upstream(Upstream),
    Target(Target),
    Service(Service),
    Route(Route),
    Certificate(Certificate),
    Sni(Sni),
    Consumer(Consumer),
    Credential(Credential),
    Plugin(Plugin),
}

impl Entity {
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Upstream(_) => EntityKind::Upstream,
            Entity::Target(_) => EntityKind::Target,
            Entity::Service(_) => EntityKind::Service,
            Entity::Route(_) => EntityKind::Route,
            Entity::Certificate(_) => EntityKind::Certificate,
            Entity::Sni(_) => EntityKind::Sni,
            Entity::Consumer(_) => EntityKind::Consumer,
            Entity::Credential(_) => EntityKind::Credential,
            Entity::Plugin(_) => EntityKind::Plugin,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Entity::Upstream(e) => &e.name,
            Entity::Target(e) => &e.name,
            Entity::Service(e) => &e.name,
            Entity::Route(e) => &e.name,
            Entity::Certificate(e) => &e.name,
            Entity::Sni(e) => &e.name,
            Entity::Consumer(e) => &e.name,
            Entity::Credential(e) => &e.name,
            Entity::Plugin(e) => &e.name,
        }
    }

    #[must_use]
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.kind(), self.name())
    }

    /// Entities this one cannot exist without.
    #[must_use]
    pub fn references(&self) -> Vec<EntityKey> {
        match self {
            Entity::Target(t) => vec![EntityKey::new(EntityKind::Upstream, t.upstream.clone())],
            Entity::Service(s) => vec![EntityKey::new(EntityKind::Upstream, s.host.clone())],
            Entity::Route(r) => vec![EntityKey::new(EntityKind::Service, r.service.clone())],
            Entity::Sni(s) => vec![EntityKey::new(EntityKind::Certificate, s.certificate.clone())],
            Entity::Credential(c) => {
                vec![EntityKey::new(EntityKind::Consumer, c.consumer.clone())]
            }
            Entity::Plugin(p) => p.scope.target().into_iter().collect(),
            Entity::Upstream(_) | Entity::Certificate(_) | Entity::Consumer(_) => Vec::new(),
        }
    }

    /// Attributes the gateway keeps unique across entities of one kind,
    /// besides the name. Two entities sharing one cannot coexist.
    #[must_use]
    pub fn unique_attributes(&self) -> Vec<String> {
        match self {
            Entity::Consumer(c) => std::iter::once(format!("username={}", c.username))
                .chain(c.custom_id.iter().map(|id| format!("custom_id={id}")))
                .collect(),
            Entity::Credential(c) => c
                .fields
                .get("key")
                .map(|key| format!("{}:key={key}", c.credential_type))
                .into_iter()
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Sort and deduplicate collection attributes so equal entities compare equal.
    pub fn normalize(&mut self) {
        if let Entity::Route(route) = self {
            for list in [
                &mut route.protocols,
                &mut route.hosts,
                &mut route.paths,
                &mut route.snis,
            ] {
                list.sort();
                list.dedup();
            }
            route.destinations.sort();
            route.destinations.dedup();
        }
    }

    /// JSON body sent to the admin API: the entity attributes plus the ownership tag.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity cannot be serialized.
    pub fn to_body(&self) -> Result<Value, serde_json::Error> {
        let mut body = match self {
            Entity::Upstream(e) => serde_json::to_value(e)?,
            Entity::Target(e) => serde_json::to_value(e)?,
            Entity::Service(e) => serde_json::to_value(e)?,
            Entity::Route(e) => serde_json::to_value(e)?,
            Entity::Certificate(e) => serde_json::to_value(e)?,
            Entity::Sni(e) => serde_json::to_value(e)?,
            Entity::Consumer(e) => serde_json::to_value(e)?,
            Entity::Credential(e) => serde_json::to_value(e)?,
            Entity::Plugin(e) => serde_json::to_value(e)?,
        };
        if let Value::Object(map) = &mut body {
            map.insert("tags".to_string(), Value::from(vec![OWNERSHIP_TAG]));
        }
        Ok(body)
    }

    /// Decode an entity of `kind` read back from the admin API.
    ///
    /// Unknown fields (ids, timestamps, tags) are ignored and defaults are filled in.
    ///
    /// # Errors
    ///
    /// Returns an error if the body does not match the entity schema.
    pub fn from_body(kind: EntityKind, body: Value) -> Result<Self, serde_json::Error> {
        let mut entity = match kind {
            EntityKind::Upstream => Entity::Upstream(serde_json::from_value(body)?),
            EntityKind::Target => Entity::Target(serde_json::from_value(body)?),
            EntityKind::Service => Entity::Service(serde_json::from_value(body)?),
            EntityKind::Route => Entity::Route(serde_json::from_value(body)?),
            EntityKind::Certificate => Entity::Certificate(serde_json::from_value(body)?),
            EntityKind::Sni => Entity::Sni(serde_json::from_value(body)?),
            EntityKind::Consumer => Entity::Consumer(serde_json::from_value(body)?),
            EntityKind::Credential => Entity::Credential(serde_json::from_value(body)?),
            EntityKind::Plugin => Entity::Plugin(serde_json::from_value(body)?),
        };
        entity.normalize();
        Ok(entity)
    }
}

/// True when a body read from the admin API carries the ownership tag.
#[must_use]
pub fn is_owned(body: &Value) -> bool {
    body.get("tags")
        .and_then(Value::as_array)
        .is_some_and(|tags| tags.iter().any(|t| t.as_str() == Some(OWNERSHIP_TAG)))
}

/// Configuration last known to be applied on the gateway.
///
/// Only entities owned by the controller are ever recorded here.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AppliedState {
    pub entities: BTreeMap<EntityKey, Entity>,
}

impl AppliedState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entity: Entity) {
        self.entities.insert(entity.key(), entity);
    }

    #[must_use]
    pub fn get(&self, key: &EntityKey) -> Option<&Entity> {
        self.entities.get(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl FromIterator<Entity> for AppliedState {
    fn from_iter<I: IntoIterator<Item = Entity>>(iter: I) -> Self {
        let mut state = AppliedState::new();
        for entity in iter {
            state.insert(entity);
        }
        state
    }
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod types_tests;
