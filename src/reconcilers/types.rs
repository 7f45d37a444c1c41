// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Data passed between the pipeline stages.

use crate::gateway::{Entity, EntityKey};
use crate::snapshot::{SourceMeta, SourceRef};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// An entity together with the source object that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct Derived {
    pub entity: Entity,
    pub source: SourceRef,
}

/// Why a source object is not (fully) reflected on the gateway.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProblemKind {
    /// The object itself is malformed (bad annotation, missing field).
    InvalidSpec(String),
    /// A referenced Service, port or Secret does not resolve.
    MissingReference(String),
    /// A plugin target cannot be found.
    ScopeNotFound(String),
    /// An entity lost a reference after conflict resolution.
    DanglingReference {
        entity: EntityKey,
        missing: EntityKey,
    },
    /// Another object already claims the same listen point.
    Conflict {
        listen_point: String,
        winner: SourceRef,
    },
}

impl ProblemKind {
    /// Conflicts are reported as Conflicting, everything else as Invalid.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, ProblemKind::Conflict { .. })
    }
}

impl fmt::Display for ProblemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProblemKind::InvalidSpec(msg) => write!(f, "invalid spec: {msg}"),
            ProblemKind::MissingReference(msg) => write!(f, "missing reference: {msg}"),
            ProblemKind::ScopeNotFound(msg) => write!(f, "plugin target not found: {msg}"),
            ProblemKind::DanglingReference { entity, missing } => {
                write!(f, "{entity} references {missing}, which is not configured")
            }
            ProblemKind::Conflict {
                listen_point,
                winner,
            } => write!(f, "{listen_point} is already claimed by {winner}"),
        }
    }
}

/// A per-object problem. Never aborts a cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Problem {
    pub source: SourceRef,
    pub kind: ProblemKind,
}

impl Problem {
    #[must_use]
    pub fn new(source: SourceRef, kind: ProblemKind) -> Self {
        Self { source, kind }
    }
}

/// Builder output: every derived entity plus per-object problems.
#[derive(Clone, Debug, Default)]
pub struct BuildOutput {
    pub derived: Vec<Derived>,
    pub problems: Vec<Problem>,
    /// Every in-scope source object seen by the builder.
    pub sources: BTreeMap<SourceRef, SourceMeta>,
}

/// A uniquely claimable listen point.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ListenPoint {
    Http {
        host: String,
        path: String,
    },
    Stream {
        protocol: String,
        host: String,
        port: u16,
    },
    Sni(String),
    PluginAttachment {
        plugin: String,
        scope: String,
    },
    Username(String),
    Identity(EntityKey),
}

impl fmt::Display for ListenPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenPoint::Http { host, path } => write!(f, "http {host}{path}"),
            ListenPoint::Stream {
                protocol,
                host,
                port,
            } => write!(f, "{protocol} {host}:{port}"),
            ListenPoint::Sni(host) => write!(f, "sni {host}"),
            ListenPoint::PluginAttachment { plugin, scope } => {
                write!(f, "plugin {plugin} on {scope}")
            }
            ListenPoint::Username(name) => write!(f, "consumer username {name}"),
            ListenPoint::Identity(key) => write!(f, "entity {key}"),
        }
    }
}

/// The pruned, conflict-free desired configuration.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DesiredGraph {
    pub entities: BTreeMap<EntityKey, Entity>,
    /// Source objects contributing each entity.
    pub provenance: BTreeMap<EntityKey, BTreeSet<SourceRef>>,
}

#[derive(Serialize)]
struct CanonicalEntry<'a> {
    entity: &'a Entity,
    sources: Vec<String>,
}

impl DesiredGraph {
    #[must_use]
    pub fn get(&self, key: &EntityKey) -> Option<&Entity> {
        self.entities.get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entities.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entity keys contributed by `source`.
    #[must_use]
    pub fn keys_from(&self, source: &SourceRef) -> Vec<&EntityKey> {
        self.provenance
            .iter()
            .filter(|(_, sources)| sources.contains(source))
            .map(|(key, _)| key)
            .collect()
    }

    /// Canonical JSON form: entities in key order with their sorted provenance.
    ///
    /// # Errors
    ///
    /// Returns an error if an entity cannot be serialized.
    pub fn canonical_json(&self) -> Result<String, serde_json::Error> {
        let entries: Vec<CanonicalEntry<'_>> = self
            .entities
            .iter()
            .map(|(key, entity)| CanonicalEntry {
                entity,
                sources: self
                    .provenance
                    .get(key)
                    .map(|s| s.iter().map(ToString::to_string).collect())
                    .unwrap_or_default(),
            })
            .collect();
        serde_json::to_string(&entries)
    }

    /// SHA-256 hex digest of [`DesiredGraph::canonical_json`].
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let json = self.canonical_json().unwrap_or_default();
        let digest = Sha256::digest(json.as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Validator output.
#[derive(Clone, Debug, Default)]
pub struct ValidationOutput {
    pub graph: DesiredGraph,
    pub problems: Vec<Problem>,
    pub sources: BTreeMap<SourceRef, SourceMeta>,
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod types_tests;
