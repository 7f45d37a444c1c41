// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Sync executor.
//!
//! Applies a [`Changeset`] through an [`AdminApi`]. An operation starts as
//! soon as every operation it depends on has finished, so a slow or failing
//! subtree never holds back unrelated ones. At most
//! [`ExecutorConfig::concurrency`] operations are in flight at once.
//!
//! Every operation owns a [`RetryState`]. Transient errors schedule the next
//! attempt at the state's `next_eligible` instant; permanent errors fail the
//! operation at once. A failed operation marks its transitive dependents
//! [`OpOutcome::Skipped`], while unrelated operations carry on.
//!
//! The cycle deadline and the shutdown signal abort pending work. An operation
//! aborted while its request is in flight is reported as ambiguous, since the
//! gateway may have applied it.

use super::diff::{Action, Changeset, Operation};
use super::retry::{default_admin_backoff, ExponentialBackoff, RetryState};
use crate::constants::{DEFAULT_MAX_ATTEMPTS, DEFAULT_SYNC_CONCURRENCY};
use crate::gateway::{AdminApi, Entity, EntityKey, EntityKind};
use crate::http_errors::map_admin_error;
use crate::metrics;
use crate::status_reasons::{REASON_CANCELLED, REASON_DEADLINE_EXCEEDED, REASON_INVALID_SPEC};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Executor settings.
#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    /// Maximum number of admin API calls in flight.
    pub concurrency: usize,
    /// Attempts per operation, including the first.
    pub max_attempts: u32,
    /// Backoff template cloned into every operation's retry state.
    pub backoff: ExponentialBackoff,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_SYNC_CONCURRENCY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: default_admin_backoff(),
        }
    }
}

/// Final outcome of one operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OpOutcome {
    Applied {
        attempts: u32,
    },
    Failed {
        /// Condition reason, see [`crate::status_reasons`].
        reason: String,
        message: String,
        /// The gateway may hold the change despite the failure.
        ambiguous: bool,
    },
    /// Not attempted because a prerequisite failed.
    Skipped {
        /// The failed operation at the root of the chain.
        blocked_by: EntityKey,
    },
}

impl OpOutcome {
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, OpOutcome::Applied { .. })
    }

    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, OpOutcome::Failed { ambiguous: true, .. })
    }

    fn label(&self) -> &'static str {
        match self {
            OpOutcome::Applied { .. } => "applied",
            OpOutcome::Failed { .. } => "failed",
            OpOutcome::Skipped { .. } => "skipped",
        }
    }
}

/// Outcome of every operation of a changeset, by entity key.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExecutionReport {
    outcomes: BTreeMap<EntityKey, OpOutcome>,
}

impl ExecutionReport {
    pub fn record(&mut self, key: EntityKey, outcome: OpOutcome) {
        self.outcomes.insert(key, outcome);
    }

    #[must_use]
    pub fn outcome(&self, key: &EntityKey) -> Option<&OpOutcome> {
        self.outcomes.get(key)
    }

    pub fn outcomes(&self) -> impl Iterator<Item = (&EntityKey, &OpOutcome)> {
        self.outcomes.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// True when no operation failed or was skipped.
    #[must_use]
    pub fn all_applied(&self) -> bool {
        self.outcomes.values().all(OpOutcome::is_applied)
    }

    /// True when an operation may have been applied despite failing.
    #[must_use]
    pub fn has_ambiguous(&self) -> bool {
        self.outcomes.values().any(OpOutcome::is_ambiguous)
    }

    #[must_use]
    pub fn applied_count(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_applied()).count()
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| matches!(o, OpOutcome::Failed { .. }))
            .count()
    }

    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| matches!(o, OpOutcome::Skipped { .. }))
            .count()
    }
}

/// Dependencies of every operation, as indexes into `ops`.
///
/// An upsert depends on the upserts of the entities it references. A delete
/// depends on every operation whose previous entity referenced the deleted key.
/// An upsert claiming a unique attribute (a consumer username, say) that a
/// deleted entity of the same kind still holds depends on that delete, unless
/// the delete already waits on the upsert.
fn dependencies(ops: &[Operation]) -> Vec<Vec<usize>> {
    let index: HashMap<&EntityKey, usize> =
        ops.iter().enumerate().map(|(i, op)| (&op.key, i)).collect();

    let mut deps: Vec<Vec<usize>> = vec![Vec::new(); ops.len()];
    for (i, op) in ops.iter().enumerate() {
        for referenced in op.references() {
            if let Some(&j) = index.get(&referenced) {
                if j != i && ops[j].action.is_upsert() {
                    deps[i].push(j);
                }
            }
        }
        if let Some(previous) = &op.previous {
            for referenced in previous.references() {
                if let Some(&j) = index.get(&referenced) {
                    if j != i && ops[j].action == Action::Delete {
                        deps[j].push(i);
                    }
                }
            }
        }
    }

    let mut held: HashMap<(EntityKind, String), usize> = HashMap::new();
    for (j, op) in ops.iter().enumerate() {
        if let (Action::Delete, Some(previous)) = (op.action, &op.previous) {
            for attribute in previous.unique_attributes() {
                held.insert((op.key.kind, attribute), j);
            }
        }
    }
    for (i, op) in ops.iter().enumerate() {
        let Some(entity) = op.entity.as_ref().filter(|_| op.action.is_upsert()) else {
            continue;
        };
        for attribute in entity.unique_attributes() {
            if let Some(&j) = held.get(&(op.key.kind, attribute)) {
                if !depends_on(&deps, j, i) {
                    deps[i].push(j);
                }
            }
        }
    }

    for d in &mut deps {
        d.sort_unstable();
        d.dedup();
    }
    deps
}

/// Whether operation `from` waits, directly or not, on operation `target`.
fn depends_on(deps: &[Vec<usize>], from: usize, target: usize) -> bool {
    let mut seen = vec![false; deps.len()];
    let mut stack = vec![from];
    while let Some(i) = stack.pop() {
        if i == target {
            return true;
        }
        if !std::mem::replace(&mut seen[i], true) {
            stack.extend(deps[i].iter().copied());
        }
    }
    false
}

/// First prerequisite of an operation that was not applied.
fn blocked_by(report: &ExecutionReport, ops: &[Operation], deps: &[usize]) -> Option<EntityKey> {
    deps.iter().find_map(|&j| match report.outcome(&ops[j].key) {
        Some(OpOutcome::Applied { .. }) => None,
        Some(OpOutcome::Skipped { blocked_by }) => Some(blocked_by.clone()),
        _ => Some(ops[j].key.clone()),
    })
}

pub(crate) async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        // Sender gone: nobody can ask us to stop any more.
        std::future::pending::<()>().await;
    }
}

fn aborted(reason: &str, message: String, ambiguous: bool) -> OpOutcome {
    OpOutcome::Failed {
        reason: reason.to_string(),
        message,
        ambiguous,
    }
}

/// Run one operation to completion, retrying transient errors.
async fn run_operation<A: AdminApi + ?Sized>(
    api: &A,
    op: &Operation,
    config: &ExecutorConfig,
    deadline: Instant,
    shutdown: &watch::Receiver<bool>,
) -> OpOutcome {
    let entity: Option<&Entity> = match (op.action, &op.entity) {
        (Action::Delete, _) => None,
        (_, Some(entity)) => Some(entity),
        (_, None) => {
            return aborted(
                REASON_INVALID_SPEC,
                format!("{op} carries no entity"),
                false,
            )
        }
    };

    let mut retry = RetryState::new(config.max_attempts, config.backoff.clone());
    let mut ambiguous = false;

    loop {
        if *shutdown.borrow() {
            return aborted(REASON_CANCELLED, format!("{op} abandoned: shutting down"), ambiguous);
        }
        if Instant::now() >= deadline {
            return aborted(
                REASON_DEADLINE_EXCEEDED,
                format!("{op} abandoned: cycle deadline passed"),
                ambiguous,
            );
        }

        retry.begin_attempt();
        let call = async {
            match (op.action, entity) {
                (Action::Create, Some(entity)) => api.create(entity).await,
                (_, Some(entity)) => api.upsert(entity).await,
                (_, None) => api.delete(&op.key).await,
            }
        };

        let result = tokio::select! {
            biased;
            () = wait_for_shutdown(shutdown.clone()) => {
                return aborted(REASON_CANCELLED, format!("{op} interrupted by shutdown"), true);
            }
            () = tokio::time::sleep_until(deadline) => {
                return aborted(REASON_DEADLINE_EXCEEDED, format!("{op} interrupted by cycle deadline"), true);
            }
            result = call => result,
        };

        let error = match result {
            Ok(()) => {
                debug!(operation = %op, attempts = retry.attempt(), "Operation applied");
                return OpOutcome::Applied {
                    attempts: retry.attempt(),
                };
            }
            Err(e) => e,
        };
        ambiguous |= error.is_ambiguous();

        if error.is_transient() {
            if let Some(eligible) = retry.schedule_retry(std::time::Instant::now()) {
                warn!(
                    operation = %op,
                    attempt = retry.attempt(),
                    error = %error,
                    "Transient admin API error, retrying"
                );
                metrics::record_operation_retry(op.key.kind.as_str());

                tokio::select! {
                    biased;
                    () = wait_for_shutdown(shutdown.clone()) => {
                        return aborted(REASON_CANCELLED, format!("{op} abandoned: shutting down after {error}"), ambiguous);
                    }
                    () = tokio::time::sleep_until(deadline) => {
                        return aborted(REASON_DEADLINE_EXCEEDED, format!("{op} abandoned at cycle deadline after {error}"), ambiguous);
                    }
                    () = tokio::time::sleep_until(Instant::from_std(eligible)) => {}
                }
                continue;
            }
        }

        let (reason, message) = map_admin_error(&error);
        warn!(
            operation = %op,
            attempts = retry.attempt(),
            reason,
            error = %error,
            "Operation failed"
        );
        return OpOutcome::Failed {
            reason: reason.to_string(),
            message: format!("{op} failed after {} attempt(s): {message}", retry.attempt()),
            ambiguous,
        };
    }
}

/// Queue the dependents of a finished operation whose prerequisites are all done.
fn release(
    finished: usize,
    dependents: &[Vec<usize>],
    waiting: &mut [usize],
    ready: &mut VecDeque<usize>,
) {
    for &d in &dependents[finished] {
        waiting[d] -= 1;
        if waiting[d] == 0 {
            ready.push_back(d);
        }
    }
}

/// Apply a changeset.
///
/// Never fails as a whole: every operation gets an outcome in the report.
pub async fn execute<A: AdminApi + ?Sized>(
    api: &A,
    changeset: &Changeset,
    config: &ExecutorConfig,
    deadline: Instant,
    shutdown: &watch::Receiver<bool>,
) -> ExecutionReport {
    let mut report = ExecutionReport::default();
    if changeset.is_empty() {
        return report;
    }

    let ops = &changeset.operations;
    let deps = dependencies(ops);
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); ops.len()];
    for (i, d) in deps.iter().enumerate() {
        for &j in d {
            dependents[j].push(i);
        }
    }
    let mut waiting: Vec<usize> = deps.iter().map(Vec::len).collect();
    let mut ready: VecDeque<usize> = (0..ops.len()).filter(|&i| waiting[i] == 0).collect();
    let concurrency = config.concurrency.max(1);
    let mut in_flight = FuturesUnordered::new();

    loop {
        while in_flight.len() < concurrency {
            let Some(i) = ready.pop_front() else {
                break;
            };
            let op = &ops[i];
            match blocked_by(&report, ops, &deps[i]) {
                Some(blocked_by) => {
                    debug!(operation = %op, blocked_by = %blocked_by, "Skipping operation");
                    report.record(op.key.clone(), OpOutcome::Skipped { blocked_by });
                    release(i, &dependents, &mut waiting, &mut ready);
                }
                None => in_flight.push(async move {
                    (i, run_operation(api, op, config, deadline, shutdown).await)
                }),
            }
        }

        let Some((i, outcome)) = in_flight.next().await else {
            break;
        };
        report.record(ops[i].key.clone(), outcome);
        release(i, &dependents, &mut waiting, &mut ready);
    }

    for (i, op) in ops.iter().enumerate() {
        if report.outcome(&op.key).is_none() {
            warn!(operation = %op, "Operation waits on a dependency cycle, skipping");
            let blocked_by = deps[i]
                .first()
                .map_or_else(|| op.key.clone(), |&j| ops[j].key.clone());
            report.record(op.key.clone(), OpOutcome::Skipped { blocked_by });
        }
    }

    for op in ops {
        if let Some(outcome) = report.outcome(&op.key) {
            metrics::record_operation(op.key.kind.as_str(), op.action.as_str(), outcome.label());
        }
    }

    info!(
        operations = ops.len(),
        applied = report.applied_count(),
        failed = report.failed_count(),
        skipped = report.skipped_count(),
        "Changeset executed"
    );
    report
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod executor_tests;
