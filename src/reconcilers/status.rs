// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Per-object outcomes and their publication.
//!
//! After every cycle each in-scope source object gets exactly one outcome,
//! picked by precedence: `Invalid` > `Conflicting` > `SyncFailed` > `Ready`.
//!
//! # Condition Format
//!
//! Custom resources carry standard Kubernetes conditions in their status:
//! - `type`: `Ready`, plus the outcome type when the object is not ready
//! - `status`: "True" or "False"
//! - `reason`: A programmatic identifier (CamelCase)
//! - `message`: A human-readable explanation
//! - `observedGeneration`: Generation the outcome was computed from
//! - `lastTransitionTime`: RFC3339 timestamp when the status last flipped
//!
//! `Ingress` has no condition schema, so its outcome is published as a
//! Kubernetes Event instead.

use super::executor::{ExecutionReport, OpOutcome};
use super::types::{ProblemKind, ValidationOutput};
use crate::constants::{CONTROLLER_NAME, STATUS_WRITE_CONCURRENCY};
use crate::crd::{
    Condition, GatewayConsumer, GatewayPlugin, SourceStatus, TCPIngress, UDPIngress,
};
use crate::metrics;
use crate::snapshot::{SourceKind, SourceMeta, SourceRef};
use crate::status_reasons::{
    CONDITION_TYPE_CONFLICTING, CONDITION_TYPE_INVALID, CONDITION_TYPE_READY,
    CONDITION_TYPE_SYNC_FAILED, REASON_APPLIED, REASON_DANGLING_REFERENCE,
    REASON_DEPENDENCY_FAILED, REASON_INVALID_SPEC, REASON_LISTEN_POINT_CONFLICT,
    REASON_MISSING_REFERENCE, REASON_SCOPE_NOT_FOUND,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Patch, PatchParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Kinds whose outcome is published, in reporting order.
const REPORTED_KINDS: [SourceKind; 5] = [
    SourceKind::Ingress,
    SourceKind::TcpIngress,
    SourceKind::UdpIngress,
    SourceKind::Plugin,
    SourceKind::Consumer,
];

/// Outcome of one source object, from most to least severe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConditionType {
    Invalid,
    Conflicting,
    SyncFailed,
    Ready,
}

impl ConditionType {
    pub const ALL: [ConditionType; 4] = [
        ConditionType::Invalid,
        ConditionType::Conflicting,
        ConditionType::SyncFailed,
        ConditionType::Ready,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ConditionType::Invalid => CONDITION_TYPE_INVALID,
            ConditionType::Conflicting => CONDITION_TYPE_CONFLICTING,
            ConditionType::SyncFailed => CONDITION_TYPE_SYNC_FAILED,
            ConditionType::Ready => CONDITION_TYPE_READY,
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The reported result for one source object.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceOutcome {
    pub source: SourceRef,
    pub outcome: ConditionType,
    pub reason: String,
    pub message: String,
    pub generation: Option<i64>,
    pub uid: Option<String>,
    /// Status stored on the object when the snapshot was taken.
    pub current: Option<SourceStatus>,
}

impl SourceOutcome {
    fn new(
        source: SourceRef,
        meta: &SourceMeta,
        outcome: ConditionType,
        reason: &str,
        message: String,
    ) -> Self {
        Self {
            source,
            outcome,
            reason: reason.to_string(),
            message,
            generation: meta.generation,
            uid: meta.uid.clone(),
            current: meta.status.clone(),
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.outcome == ConditionType::Ready
    }

    /// Status to store on the object.
    ///
    /// Carries `Ready` and, unless ready, the outcome condition. Stale outcome
    /// conditions from earlier cycles are dropped. Transition times survive
    /// while a condition keeps its status.
    #[must_use]
    pub fn desired_status(&self) -> SourceStatus {
        let mut conditions = self
            .current
            .as_ref()
            .map(|s| s.conditions.clone())
            .unwrap_or_default();
        conditions
            .retain(|c| c.r#type == CONDITION_TYPE_READY || c.r#type == self.outcome.as_str());

        let ready_status = if self.is_ready() { "True" } else { "False" };
        update_condition_in_memory(
            &mut conditions,
            CONDITION_TYPE_READY,
            ready_status,
            &self.reason,
            &self.message,
            self.generation,
        );
        if !self.is_ready() {
            update_condition_in_memory(
                &mut conditions,
                self.outcome.as_str(),
                "True",
                &self.reason,
                &self.message,
                self.generation,
            );
        }

        SourceStatus {
            conditions,
            observed_generation: self.generation,
        }
    }

    /// Whether publishing would change what is stored on the object.
    #[must_use]
    pub fn status_changed(&self) -> bool {
        let desired = self.desired_status();
        match &self.current {
            None => true,
            Some(current) => {
                current.observed_generation != desired.observed_generation
                    || !conditions_equal(&current.conditions, &desired.conditions)
            }
        }
    }

    fn event_signature(&self) -> String {
        format!(
            "{}/{:?}/{}/{}",
            self.outcome, self.generation, self.reason, self.message
        )
    }
}

/// Create a condition stamped with the current time.
#[must_use]
pub fn create_condition(
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
    observed_generation: Option<i64>,
) -> Condition {
    Condition {
        r#type: condition_type.to_string(),
        status: status.to_string(),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        observed_generation,
        last_transition_time: Some(Utc::now().to_rfc3339()),
    }
}

/// Find a condition by type.
#[must_use]
pub fn find_condition<'a>(
    conditions: &'a [Condition],
    condition_type: &str,
) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

/// Update or add a condition in place.
///
/// The `lastTransitionTime` is kept when the status does not change.
pub fn update_condition_in_memory(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
    observed_generation: Option<i64>,
) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.r#type == condition_type) {
        let last_transition_time = if existing.status == status {
            existing
                .last_transition_time
                .clone()
                .unwrap_or_else(|| Utc::now().to_rfc3339())
        } else {
            Utc::now().to_rfc3339()
        };

        existing.status = status.to_string();
        existing.reason = Some(reason.to_string());
        existing.message = Some(message.to_string());
        existing.observed_generation = observed_generation;
        existing.last_transition_time = Some(last_transition_time);
    } else {
        conditions.push(create_condition(
            condition_type,
            status,
            reason,
            message,
            observed_generation,
        ));
    }
}

/// Compare two condition lists ignoring order and `lastTransitionTime`.
#[must_use]
pub fn conditions_equal(current: &[Condition], new: &[Condition]) -> bool {
    current.len() == new.len()
        && new.iter().all(|new_cond| {
            find_condition(current, &new_cond.r#type).is_some_and(|curr| {
                curr.status == new_cond.status
                    && curr.reason == new_cond.reason
                    && curr.message == new_cond.message
                    && curr.observed_generation == new_cond.observed_generation
            })
        })
}

/// Reason reported for a per-object problem.
#[must_use]
pub fn problem_reason(kind: &ProblemKind) -> &'static str {
    match kind {
        ProblemKind::InvalidSpec(_) => REASON_INVALID_SPEC,
        ProblemKind::MissingReference(_) => REASON_MISSING_REFERENCE,
        ProblemKind::ScopeNotFound(_) => REASON_SCOPE_NOT_FOUND,
        ProblemKind::DanglingReference { .. } => REASON_DANGLING_REFERENCE,
        ProblemKind::Conflict { .. } => REASON_LISTEN_POINT_CONFLICT,
    }
}

/// Compute the outcome of every reported source object after a cycle.
///
/// An object is `Invalid` if it has any non-conflict problem, `Conflicting` if
/// it only lost conflicts, `SyncFailed` if one of its entities failed or was
/// skipped, and `Ready` otherwise. Entities that needed no operation count as
/// applied.
#[must_use]
pub fn compute_outcomes(
    validation: &ValidationOutput,
    report: &ExecutionReport,
) -> Vec<SourceOutcome> {
    let mut problems: BTreeMap<&SourceRef, Vec<&ProblemKind>> = BTreeMap::new();
    for problem in &validation.problems {
        problems.entry(&problem.source).or_default().push(&problem.kind);
    }

    validation
        .sources
        .iter()
        .filter(|(source, _)| source.kind.is_reported())
        .map(|(source, meta)| {
            let own = problems.get(source).map(Vec::as_slice).unwrap_or_default();
            if let Some(first) = own.iter().find(|p| !p.is_conflict()) {
                return SourceOutcome::new(
                    source.clone(),
                    meta,
                    ConditionType::Invalid,
                    problem_reason(first),
                    join_messages(own),
                );
            }
            if !own.is_empty() {
                return SourceOutcome::new(
                    source.clone(),
                    meta,
                    ConditionType::Conflicting,
                    REASON_LISTEN_POINT_CONFLICT,
                    join_messages(own),
                );
            }

            let keys = validation.graph.keys_from(source);
            let failure = keys.iter().find_map(|key| match report.outcome(key) {
                Some(OpOutcome::Failed {
                    reason, message, ..
                }) => Some((reason.clone(), message.clone())),
                Some(OpOutcome::Skipped { blocked_by }) => Some((
                    REASON_DEPENDENCY_FAILED.to_string(),
                    format!("{key} not applied: {blocked_by} failed"),
                )),
                _ => None,
            });
            match failure {
                Some((reason, message)) => SourceOutcome::new(
                    source.clone(),
                    meta,
                    ConditionType::SyncFailed,
                    &reason,
                    message,
                ),
                None => SourceOutcome::new(
                    source.clone(),
                    meta,
                    ConditionType::Ready,
                    REASON_APPLIED,
                    format!("{} gateway entities configured", keys.len()),
                ),
            }
        })
        .collect()
}

/// `SyncFailed` for every reported object, used when a whole cycle fails.
#[must_use]
pub fn failed_outcomes(
    sources: &BTreeMap<SourceRef, SourceMeta>,
    reason: &str,
    message: &str,
) -> Vec<SourceOutcome> {
    sources
        .iter()
        .filter(|(source, _)| source.kind.is_reported())
        .map(|(source, meta)| {
            SourceOutcome::new(
                source.clone(),
                meta,
                ConditionType::SyncFailed,
                reason,
                message.to_string(),
            )
        })
        .collect()
}

fn join_messages(problems: &[&ProblemKind]) -> String {
    problems
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Publish outcome gauges, resetting kinds and outcomes no longer present.
pub fn record_outcome_metrics(outcomes: &[SourceOutcome]) {
    let mut counts: HashMap<(SourceKind, ConditionType), usize> = HashMap::new();
    for outcome in outcomes {
        *counts
            .entry((outcome.source.kind, outcome.outcome))
            .or_default() += 1;
    }
    for kind in REPORTED_KINDS {
        for condition in ConditionType::ALL {
            let count = counts.get(&(kind, condition)).copied().unwrap_or(0);
            metrics::set_source_outcomes(kind.as_str(), condition.as_str(), count);
        }
    }
}

/// Publishes outcomes where users can see them.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    /// Publish one outcome.
    ///
    /// # Errors
    ///
    /// Returns an error if the write to the cluster fails.
    async fn report(&self, outcome: &SourceOutcome) -> Result<()>;

    /// Forget what was remembered about objects missing from `outcomes`,
    /// the full set reported by the current cycle.
    fn retain(&self, _outcomes: &[SourceOutcome]) {}
}

/// Keep only the published-event signatures of objects still reported.
pub fn prune_published(published: &mut HashMap<SourceRef, String>, outcomes: &[SourceOutcome]) {
    let reported: HashSet<&SourceRef> = outcomes.iter().map(|o| &o.source).collect();
    published.retain(|source, _| reported.contains(source));
}

/// Publish every outcome. Failures are logged and counted, never returned.
///
/// Returns the number of failed writes.
pub async fn report_all<R: StatusReporter + ?Sized>(
    reporter: &R,
    outcomes: &[SourceOutcome],
) -> usize {
    record_outcome_metrics(outcomes);
    reporter.retain(outcomes);

    let results: Vec<(&SourceOutcome, Result<()>)> = stream::iter(outcomes)
        .map(|outcome| async move { (outcome, reporter.report(outcome).await) })
        .buffer_unordered(STATUS_WRITE_CONCURRENCY)
        .collect()
        .await;

    let mut failures = 0;
    for (outcome, result) in results {
        if let Err(e) = result {
            failures += 1;
            metrics::record_status_write_error(outcome.source.kind.as_str());
            warn!(
                source = %outcome.source,
                outcome = %outcome.outcome,
                error = %e,
                "Failed to publish status"
            );
        }
    }
    failures
}

/// Writes outcomes to the Kubernetes API.
///
/// Custom resources get a merge patch of their status subresource, skipped
/// when semantically unchanged. Ingresses get an Event whenever their
/// outcome changes. Other kinds are not reported.
pub struct KubeStatusReporter {
    client: Client,
    recorder: Recorder,
    published_events: Mutex<HashMap<SourceRef, String>>,
}

impl KubeStatusReporter {
    #[must_use]
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client.clone(), reporter),
            client,
            published_events: Mutex::new(HashMap::new()),
        }
    }

    async fn patch_status<K>(&self, outcome: &SourceOutcome) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + fmt::Debug,
        K::DynamicType: Default,
    {
        if !outcome.status_changed() {
            debug!(source = %outcome.source, "Status unchanged, skipping update");
            return Ok(());
        }

        let api: Api<K> = Api::namespaced(self.client.clone(), &outcome.source.namespace);
        let patch = json!({ "status": outcome.desired_status() });
        api.patch_status(
            &outcome.source.name,
            &PatchParams::default(),
            &Patch::Merge(&patch),
        )
        .await?;

        debug!(
            source = %outcome.source,
            outcome = %outcome.outcome,
            reason = %outcome.reason,
            "Updated status"
        );
        Ok(())
    }

    async fn publish_event(&self, outcome: &SourceOutcome) -> Result<()> {
        let signature = outcome.event_signature();
        let already_published = self
            .published_events
            .lock()
            .map(|events| events.get(&outcome.source) == Some(&signature))
            .unwrap_or(false);
        if already_published {
            return Ok(());
        }

        let reference = ObjectReference {
            api_version: Some("networking.k8s.io/v1".to_string()),
            kind: Some(outcome.source.kind.as_str().to_string()),
            name: Some(outcome.source.name.clone()),
            namespace: Some(outcome.source.namespace.clone()),
            uid: outcome.uid.clone(),
            ..ObjectReference::default()
        };
        let event = Event {
            type_: if outcome.is_ready() {
                EventType::Normal
            } else {
                EventType::Warning
            },
            reason: outcome.reason.clone(),
            note: Some(outcome.message.clone()),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        self.recorder.publish(&event, &reference).await?;

        if let Ok(mut events) = self.published_events.lock() {
            events.insert(outcome.source.clone(), signature);
        }
        Ok(())
    }
}

#[async_trait]
impl StatusReporter for KubeStatusReporter {
    async fn report(&self, outcome: &SourceOutcome) -> Result<()> {
        match outcome.source.kind {
            SourceKind::Ingress => self.publish_event(outcome).await,
            SourceKind::TcpIngress => self.patch_status::<TCPIngress>(outcome).await,
            SourceKind::UdpIngress => self.patch_status::<UDPIngress>(outcome).await,
            SourceKind::Plugin => self.patch_status::<GatewayPlugin>(outcome).await,
            SourceKind::Consumer => self.patch_status::<GatewayConsumer>(outcome).await,
            SourceKind::Secret | SourceKind::Service | SourceKind::EndpointSlice => Ok(()),
        }
    }

    fn retain(&self, outcomes: &[SourceOutcome]) {
        if let Ok(mut events) = self.published_events.lock() {
            prune_published(&mut events, outcomes);
        }
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod status_tests;
