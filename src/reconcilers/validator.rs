// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Conflict resolution and referential pruning.
//!
//! Every derived entity claims zero or more [`ListenPoint`]s plus its own
//! identity. Claimants are visited in a total priority order:
//!
//! 1. source creation timestamp, oldest first
//! 2. source namespace
//! 3. source name
//! 4. source kind
//! 5. entity name
//!
//! The first claimant of a listen point wins it. A later claimant whose entity
//! differs from the winner's is excluded and its source reported Conflicting.
//! Identical entities from several sources are merged with the union of their
//! provenance. Finally, entities whose references no longer resolve are
//! dropped until the graph is closed.

use super::types::{
    BuildOutput, Derived, DesiredGraph, ListenPoint, Problem, ProblemKind, ValidationOutput,
};
use crate::gateway::{Entity, EntityKey};
use crate::snapshot::{SourceKind, SourceMeta, SourceRef};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{debug, info};

type Priority<'a> = (DateTime<Utc>, &'a str, &'a str, SourceKind, &'a str);

fn priority<'a>(derived: &'a Derived, sources: &BTreeMap<SourceRef, SourceMeta>) -> Priority<'a> {
    let created = sources
        .get(&derived.source)
        .map_or(DateTime::<Utc>::UNIX_EPOCH, |m| m.created);
    (
        created,
        &derived.source.namespace,
        &derived.source.name,
        derived.source.kind,
        derived.entity.name(),
    )
}

fn or_wildcard(values: &[String]) -> Vec<&str> {
    if values.is_empty() {
        vec!["*"]
    } else {
        values.iter().map(String::as_str).collect()
    }
}

/// Listen points claimed by an entity, not counting its identity.
#[must_use]
pub fn listen_points(entity: &Entity) -> Vec<ListenPoint> {
    match entity {
        Entity::Route(route) if route.is_http() => {
            let paths: Vec<&str> = if route.paths.is_empty() {
                vec!["/"]
            } else {
                route.paths.iter().map(String::as_str).collect()
            };
            or_wildcard(&route.hosts)
                .into_iter()
                .flat_map(|host| {
                    paths.iter().map(move |path| ListenPoint::Http {
                        host: host.to_string(),
                        path: (*path).to_string(),
                    })
                })
                .collect()
        }
        Entity::Route(route) => {
            let mut points = Vec::new();
            for protocol in &route.protocols {
                for host in or_wildcard(&route.snis) {
                    for destination in &route.destinations {
                        points.push(ListenPoint::Stream {
                            protocol: protocol.clone(),
                            host: host.to_string(),
                            port: destination.port,
                        });
                    }
                }
            }
            points
        }
        Entity::Sni(sni) => vec![ListenPoint::Sni(sni.name.clone())],
        Entity::Plugin(plugin) => vec![ListenPoint::PluginAttachment {
            plugin: plugin.plugin.clone(),
            scope: plugin.scope.to_string(),
        }],
        Entity::Consumer(consumer) => vec![ListenPoint::Username(consumer.username.clone())],
        Entity::Upstream(_)
        | Entity::Target(_)
        | Entity::Service(_)
        | Entity::Certificate(_)
        | Entity::Credential(_) => Vec::new(),
    }
}

fn push_unique(problems: &mut Vec<Problem>, problem: Problem) {
    if !problems.contains(&problem) {
        problems.push(problem);
    }
}

/// Resolve conflicts, merge duplicates and prune dangling references.
#[must_use]
pub fn validate(build: BuildOutput) -> ValidationOutput {
    let BuildOutput {
        derived,
        mut problems,
        sources,
    } = build;

    let mut ordered: Vec<&Derived> = derived.iter().collect();
    ordered.sort_by(|a, b| priority(a, &sources).cmp(&priority(b, &sources)));

    let mut claims: BTreeMap<ListenPoint, &Derived> = BTreeMap::new();
    let mut accepted: Vec<&Derived> = Vec::with_capacity(ordered.len());
    let mut conflicts = 0usize;

    for candidate in ordered {
        let mut points = vec![ListenPoint::Identity(candidate.entity.key())];
        points.extend(listen_points(&candidate.entity));

        let lost = points.iter().find_map(|point| {
            claims
                .get(point)
                .filter(|winner| winner.entity != candidate.entity)
                .map(|winner| (point, *winner))
        });

        if let Some((point, winner)) = lost {
            debug!(
                entity = %candidate.entity.key(),
                loser = %candidate.source,
                winner = %winner.source,
                listen_point = %point,
                "Excluding conflicting claim"
            );
            conflicts += 1;
            push_unique(
                &mut problems,
                Problem::new(
                    candidate.source.clone(),
                    ProblemKind::Conflict {
                        listen_point: point.to_string(),
                        winner: winner.source.clone(),
                    },
                ),
            );
            continue;
        }

        for point in points {
            claims.entry(point).or_insert(candidate);
        }
        accepted.push(candidate);
    }

    let mut graph = DesiredGraph::default();
    for entry in accepted {
        let key = entry.entity.key();
        graph
            .provenance
            .entry(key.clone())
            .or_default()
            .insert(entry.source.clone());
        graph
            .entities
            .entry(key)
            .or_insert_with(|| entry.entity.clone());
    }

    let pruned = prune_dangling(&mut graph, &mut problems);

    info!(
        entities = graph.len(),
        conflicts,
        pruned,
        problems = problems.len(),
        "Validated desired graph"
    );

    ValidationOutput {
        graph,
        problems,
        sources,
    }
}

/// Remove entities with unresolved references until none remain.
///
/// Returns the number of removed entities.
fn prune_dangling(graph: &mut DesiredGraph, problems: &mut Vec<Problem>) -> usize {
    let mut removed = 0;
    loop {
        let dangling: Vec<(EntityKey, EntityKey)> = graph
            .entities
            .iter()
            .filter_map(|(key, entity)| {
                entity
                    .references()
                    .into_iter()
                    .find(|r| !graph.entities.contains_key(r))
                    .map(|missing| (key.clone(), missing))
            })
            .collect();

        if dangling.is_empty() {
            return removed;
        }

        for (key, missing) in dangling {
            debug!(entity = %key, missing = %missing, "Pruning dangling entity");
            graph.entities.remove(&key);
            removed += 1;
            for source in graph.provenance.remove(&key).unwrap_or_default() {
                push_unique(
                    problems,
                    Problem::new(
                        source,
                        ProblemKind::DanglingReference {
                            entity: key.clone(),
                            missing: missing.clone(),
                        },
                    ),
                );
            }
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod validator_tests;
