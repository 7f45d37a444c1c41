// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Diff engine.
//!
//! Compares the desired graph with the last-known applied configuration and
//! produces an ordered changeset. Creates and updates come first, ordered by
//! dependency rank and then by key. Deletes follow in reverse rank so that
//! dependents disappear before the entities they reference.
//!
//! This module also computes the applied configuration that results from
//! executing a changeset, which becomes the cache for the next cycle.

use super::executor::{ExecutionReport, OpOutcome};
use super::types::DesiredGraph;
use crate::gateway::{AppliedState, Entity, EntityKey};
use std::cmp::Reverse;
use std::fmt;

/// What an [`Operation`] does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Action {
    Create,
    Update,
    Delete,
}

impl Action {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }

    #[must_use]
    pub fn is_upsert(self) -> bool {
        matches!(self, Action::Create | Action::Update)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One admin API write.
#[derive(Clone, Debug, PartialEq)]
pub struct Operation {
    pub action: Action,
    pub key: EntityKey,
    /// Desired entity, for creates and updates.
    pub entity: Option<Entity>,
    /// Entity as last applied, for updates and deletes.
    pub previous: Option<Entity>,
}

impl Operation {
    /// Keys referenced by the entity being written. Empty for deletes.
    #[must_use]
    pub fn references(&self) -> Vec<EntityKey> {
        match (self.action, &self.entity) {
            (Action::Create | Action::Update, Some(entity)) => entity.references(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.action, self.key)
    }
}

/// Ordered operations for one cycle.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Changeset {
    pub operations: Vec<Operation>,
}

impl Changeset {
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Number of operations per action.
    #[must_use]
    pub fn count(&self, action: Action) -> usize {
        self.operations.iter().filter(|op| op.action == action).count()
    }

    pub fn upserts(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter().filter(|op| op.action.is_upsert())
    }

    pub fn deletes(&self) -> impl Iterator<Item = &Operation> {
        self.operations
            .iter()
            .filter(|op| op.action == Action::Delete)
    }
}

/// Compute the changeset turning `applied` into `desired`.
///
/// Entities in `applied` are all owned by the controller, so every key absent
/// from `desired` is deleted.
#[must_use]
pub fn diff(desired: &DesiredGraph, applied: &AppliedState) -> Changeset {
    let mut upserts: Vec<Operation> = desired
        .entities
        .iter()
        .filter_map(|(key, entity)| match applied.get(key) {
            None => Some(Operation {
                action: Action::Create,
                key: key.clone(),
                entity: Some(entity.clone()),
                previous: None,
            }),
            Some(previous) if previous != entity => Some(Operation {
                action: Action::Update,
                key: key.clone(),
                entity: Some(entity.clone()),
                previous: Some(previous.clone()),
            }),
            Some(_) => None,
        })
        .collect();
    upserts.sort_by(|a, b| (a.key.kind.rank(), &a.key).cmp(&(b.key.kind.rank(), &b.key)));

    let mut deletes: Vec<Operation> = applied
        .entities
        .iter()
        .filter(|(key, _)| !desired.contains(key))
        .map(|(key, previous)| Operation {
            action: Action::Delete,
            key: key.clone(),
            entity: None,
            previous: Some(previous.clone()),
        })
        .collect();
    deletes.sort_by(|a, b| {
        (Reverse(a.key.kind.rank()), &a.key).cmp(&(Reverse(b.key.kind.rank()), &b.key))
    });

    upserts.extend(deletes);
    Changeset {
        operations: upserts,
    }
}

impl AppliedState {
    /// Applied state equal to a desired graph, after a fully successful sync.
    #[must_use]
    pub fn from_graph(graph: &DesiredGraph) -> Self {
        graph.entities.values().cloned().collect()
    }

    /// Fold the outcome of a changeset into this state.
    ///
    /// Applied operations take effect. Failed and skipped operations leave the
    /// previous entry untouched.
    ///
    /// Returns `false` and leaves the state unchanged when an outcome is
    /// ambiguous: the gateway may or may not hold the change, so the state is
    /// no longer known and must be re-read.
    pub fn apply_report(&mut self, changeset: &Changeset, report: &ExecutionReport) -> bool {
        if report.has_ambiguous() {
            return false;
        }
        for op in &changeset.operations {
            if !matches!(report.outcome(&op.key), Some(OpOutcome::Applied { .. })) {
                continue;
            }
            match (&op.action, &op.entity) {
                (Action::Delete, _) => {
                    self.entities.remove(&op.key);
                }
                (_, Some(entity)) => self.insert(entity.clone()),
                (_, None) => {}
            }
        }
        true
    }
}

#[cfg(test)]
#[path = "diff_tests.rs"]
mod diff_tests;
