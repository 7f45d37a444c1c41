// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The reconcile loop.
//!
//! Every cycle runs the whole pipeline against a fresh snapshot:
//!
//! 1. **Build** - translate source objects into gateway entities
//! 2. **Validate** - resolve listen point conflicts and prune dangling references
//! 3. **Diff** - compare with the last applied configuration
//! 4. **Apply** - execute the changeset through the admin API
//! 5. **Report** - publish one outcome per source object
//!
//! Change events are only triggers. They are filtered against what was
//! already seen (see [`TriggerFilter`]), then coalesced through a single-permit
//! [`Notify`], so a burst of events costs one cycle. Consecutive cycles are
//! spaced by a minimum interval.
//!
//! One deadline bounds a whole cycle: the snapshot, the admin API reads, the
//! changeset and the status reports. A stage still running at the deadline or
//! on shutdown is abandoned.
//!
//! Only one cycle runs at a time. The cycle lock also owns the cache of the
//! last applied gateway configuration, which is re-read from the admin API
//! whenever an operation had an ambiguous outcome.

use super::builder::{build, BuildOptions};
use super::diff::{diff, Action};
use super::executor::{execute, wait_for_shutdown, ExecutionReport, ExecutorConfig};
use super::retry::cycle_backoff;
use super::status::{
    compute_outcomes, failed_outcomes, report_all, SourceOutcome, StatusReporter,
};
use super::types::ValidationOutput;
use super::validator::validate;
use crate::constants::{
    DEFAULT_CYCLE_DEADLINE_SECS, DEFAULT_MIN_CYCLE_INTERVAL_MILLIS, DEFAULT_REQUEUE_SECS,
};
use crate::errors::CycleError;
use crate::gateway::{AdminApi, AppliedState, EntityKind};
use crate::metrics;
use crate::snapshot::{ChangeEvent, ChangeType, SnapshotProvider, SourceRef};
use crate::status_reasons::{REASON_ADMIN_UNREACHABLE, REASON_CYCLE_FAILED};
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Reconcile loop settings.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub build: BuildOptions,
    pub executor: ExecutorConfig,
    /// Minimum spacing between the starts of two cycles.
    pub min_cycle_interval: Duration,
    /// Wall-clock budget for one whole cycle, snapshot to status reports.
    pub cycle_deadline: Duration,
    /// Delay before re-running a cycle that left operations failed.
    pub requeue_after: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            build: BuildOptions::default(),
            executor: ExecutorConfig::default(),
            min_cycle_interval: Duration::from_millis(DEFAULT_MIN_CYCLE_INTERVAL_MILLIS),
            cycle_deadline: Duration::from_secs(DEFAULT_CYCLE_DEADLINE_SECS),
            requeue_after: Duration::from_secs(DEFAULT_REQUEUE_SECS),
        }
    }
}

/// Where the loop currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Triggered,
    Building,
    Validating,
    Diffing,
    Applying,
    Reporting,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result of a completed cycle.
#[derive(Clone, Debug)]
pub struct CycleSummary {
    /// Digest of the desired graph.
    pub fingerprint: String,
    pub desired_entities: usize,
    pub operations: usize,
    pub applied: usize,
    pub failed: usize,
    pub skipped: usize,
    /// The applied-configuration cache was dropped after an ambiguous outcome.
    pub cache_invalidated: bool,
    pub outcomes: Vec<SourceOutcome>,
}

impl CycleSummary {
    /// Every operation was applied.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }
}

/// Drops change events that cannot change the desired state.
///
/// Custom resources are compared by generation and a digest of their labels
/// and annotations, so the controller's own status writes (which only bump
/// resourceVersion) do not retrigger. Every other kind is compared by
/// resourceVersion.
#[derive(Debug, Default)]
pub struct TriggerFilter {
    seen: HashMap<SourceRef, String>,
}

impl TriggerFilter {
    /// Whether `event` should trigger a cycle. Records what it has seen.
    pub fn accept(&mut self, event: &ChangeEvent) -> bool {
        match event.change {
            ChangeType::Resynced => true,
            ChangeType::Deleted => {
                self.seen.remove(&event.source_ref());
                true
            }
            ChangeType::Applied => {
                let version = if event.kind.tracks_generation() {
                    event.generation.map(|g| match &event.metadata_digest {
                        Some(digest) => format!("{g}/{digest}"),
                        None => g.to_string(),
                    })
                } else {
                    event.resource_version.clone()
                };
                let Some(version) = version else {
                    return true;
                };
                let source = event.source_ref();
                if self.seen.get(&source) == Some(&version) {
                    return false;
                }
                self.seen.insert(source, version);
                true
            }
        }
    }
}

#[derive(Debug, Default)]
struct CycleState {
    /// Last known applied configuration, `None` when it must be re-read.
    applied: Option<AppliedState>,
}

/// Drives the pipeline between a snapshot provider, the gateway admin API
/// and a status reporter.
pub struct Engine<P, A, R> {
    provider: P,
    admin: A,
    reporter: R,
    config: EngineConfig,
    state: Mutex<CycleState>,
    phase: watch::Sender<CyclePhase>,
    trigger: Notify,
}

impl<P, A, R> Engine<P, A, R>
where
    P: SnapshotProvider,
    A: AdminApi,
    R: StatusReporter,
{
    #[must_use]
    pub fn new(provider: P, admin: A, reporter: R, config: EngineConfig) -> Self {
        let (phase, _) = watch::channel(CyclePhase::Idle);
        Self {
            provider,
            admin,
            reporter,
            config,
            state: Mutex::new(CycleState::default()),
            phase,
            trigger: Notify::new(),
        }
    }

    /// Current phase of the loop.
    #[must_use]
    pub fn phase(&self) -> CyclePhase {
        *self.phase.borrow()
    }

    /// Receiver following phase changes.
    #[must_use]
    pub fn watch_phase(&self) -> watch::Receiver<CyclePhase> {
        self.phase.subscribe()
    }

    /// Request a cycle. Requests made while one is pending coalesce.
    pub fn trigger(&self) {
        self.trigger.notify_one();
        self.phase.send_if_modified(|phase| {
            if *phase == CyclePhase::Idle {
                *phase = CyclePhase::Triggered;
                true
            } else {
                false
            }
        });
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn admin(&self) -> &A {
        &self.admin
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    /// Whether an applied-configuration cache is held.
    pub async fn has_applied_cache(&self) -> bool {
        self.state.lock().await.applied.is_some()
    }

    fn set_phase(&self, phase: CyclePhase) {
        self.phase.send_replace(phase);
    }

    /// Run one full cycle.
    ///
    /// # Errors
    ///
    /// Returns a [`CycleError`] when the cycle could not run at all. The
    /// gateway configuration and the applied-configuration cache are then
    /// left untouched.
    pub async fn reconcile_once(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<CycleSummary, CycleError> {
        let started = std::time::Instant::now();
        let mut state = self.state.lock().await;

        let result = self.cycle(&mut state, shutdown).await;
        self.set_phase(CyclePhase::Idle);

        let label = match &result {
            Ok(summary) if summary.is_clean() => "success",
            Ok(_) => "partial",
            Err(_) => "error",
        };
        metrics::record_cycle(label, started.elapsed());
        result
    }

    async fn cycle(
        &self,
        state: &mut CycleState,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<CycleSummary, CycleError> {
        if *shutdown.borrow() {
            return Err(CycleError::Cancelled);
        }
        let started = Instant::now();
        let deadline = started + self.config.cycle_deadline;
        // The last tenth of the budget is kept for status reports.
        let apply_deadline = started + self.config.cycle_deadline * 9 / 10;

        self.set_phase(CyclePhase::Building);
        let snapshot = bounded("snapshot", deadline, shutdown, self.provider.snapshot()).await??;
        let built = build(&snapshot, &self.config.build);
        debug!(
            objects = snapshot.len(),
            derived = built.derived.len(),
            problems = built.problems.len(),
            "Built desired entities"
        );

        self.set_phase(CyclePhase::Validating);
        let validation = validate(built);
        let fingerprint = validation.graph.fingerprint();
        for kind in EntityKind::ALL {
            let count = validation
                .graph
                .entities
                .keys()
                .filter(|key| key.kind == kind)
                .count();
            metrics::set_desired_entities(kind.as_str(), count);
        }

        self.set_phase(CyclePhase::Diffing);
        if let Err(e) = bounded("probe", deadline, shutdown, self.admin.probe()).await? {
            let message = e.to_string();
            self.report_fatal(&validation, REASON_ADMIN_UNREACHABLE, &message, deadline, shutdown)
                .await;
            return Err(CycleError::AdminUnreachable(e));
        }
        let mut applied = match state.applied.take() {
            Some(applied) => applied,
            None => match bounded("fetch_applied", deadline, shutdown, self.admin.fetch_applied())
                .await?
            {
                Ok(applied) => {
                    info!(entities = applied.len(), "Read applied gateway configuration");
                    applied
                }
                Err(e) => {
                    let message = e.to_string();
                    self.report_fatal(&validation, REASON_CYCLE_FAILED, &message, deadline, shutdown)
                        .await;
                    return Err(CycleError::FetchApplied(e));
                }
            },
        };
        let changeset = diff(&validation.graph, &applied);
        metrics::record_changeset(
            changeset.count(Action::Create),
            changeset.count(Action::Update),
            changeset.count(Action::Delete),
        );

        self.set_phase(CyclePhase::Applying);
        let report = if changeset.is_empty() {
            ExecutionReport::default()
        } else {
            execute(
                &self.admin,
                &changeset,
                &self.config.executor,
                apply_deadline,
                shutdown,
            )
            .await
        };

        let cache_invalidated = !applied.apply_report(&changeset, &report);
        if cache_invalidated {
            warn!("Ambiguous admin API outcome, re-reading gateway configuration next cycle");
            metrics::record_cache_invalidation("ambiguous_outcome");
        } else {
            state.applied = Some(applied);
        }

        self.set_phase(CyclePhase::Reporting);
        let outcomes = compute_outcomes(&validation, &report);
        bounded("report", deadline, shutdown, report_all(&self.reporter, &outcomes)).await?;

        let summary = CycleSummary {
            fingerprint,
            desired_entities: validation.graph.len(),
            operations: changeset.len(),
            applied: report.applied_count(),
            failed: report.failed_count(),
            skipped: report.skipped_count(),
            cache_invalidated,
            outcomes,
        };
        info!(
            fingerprint = %summary.fingerprint,
            entities = summary.desired_entities,
            operations = summary.operations,
            applied = summary.applied,
            failed = summary.failed,
            skipped = summary.skipped,
            problems = validation.problems.len(),
            "Reconcile cycle finished"
        );
        Ok(summary)
    }

    async fn report_fatal(
        &self,
        validation: &ValidationOutput,
        reason: &str,
        message: &str,
        deadline: Instant,
        shutdown: &watch::Receiver<bool>,
    ) {
        self.set_phase(CyclePhase::Reporting);
        let outcomes = failed_outcomes(&validation.sources, reason, message);
        let report = report_all(&self.reporter, &outcomes);
        if let Err(e) = bounded("report", deadline, shutdown, report).await {
            warn!(error = %e, "Failure status not published");
        }
    }

    /// Run until `shutdown` turns true.
    ///
    /// A first cycle runs immediately to converge on startup. Afterwards a
    /// cycle runs when an accepted change event arrives, when a failed cycle
    /// is due for a retry, or when partially failed operations are requeued.
    pub async fn run(
        &self,
        events: BoxStream<'static, ChangeEvent>,
        shutdown: watch::Receiver<bool>,
    ) {
        info!("Starting reconcile loop");
        tokio::join!(
            self.forward_events(events, shutdown.clone()),
            self.cycle_loop(shutdown)
        );
        info!("Reconcile loop stopped");
    }

    async fn forward_events(
        &self,
        mut events: BoxStream<'static, ChangeEvent>,
        shutdown: watch::Receiver<bool>,
    ) {
        let mut filter = TriggerFilter::default();
        loop {
            tokio::select! {
                biased;
                () = wait_for_shutdown(shutdown.clone()) => return,
                event = events.next() => match event {
                    Some(event) => {
                        if filter.accept(&event) {
                            debug!(
                                source = %event.source_ref(),
                                change = ?event.change,
                                "Change accepted"
                            );
                            self.trigger();
                        }
                    }
                    None => {
                        warn!("Change event stream ended");
                        wait_for_shutdown(shutdown).await;
                        return;
                    }
                },
            }
        }
    }

    async fn cycle_loop(&self, shutdown: watch::Receiver<bool>) {
        self.trigger();
        let mut backoff = cycle_backoff();
        let mut retry_at: Option<Instant> = None;
        let mut last_started: Option<Instant> = None;

        loop {
            let retry = async move {
                match retry_at {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                biased;
                () = wait_for_shutdown(shutdown.clone()) => break,
                () = self.trigger.notified() => {}
                () = retry => debug!("Re-running cycle"),
            }

            if let Some(last) = last_started {
                let earliest = last + self.config.min_cycle_interval;
                if Instant::now() < earliest {
                    tokio::select! {
                        biased;
                        () = wait_for_shutdown(shutdown.clone()) => break,
                        () = sleep_until(earliest) => {}
                    }
                }
            }
            // Triggers that arrived while waiting are covered by this cycle.
            let _ = self.trigger.notified().now_or_never();

            last_started = Some(Instant::now());
            retry_at = match self.reconcile_once(&shutdown).await {
                Ok(summary) if summary.is_clean() && !summary.cache_invalidated => {
                    backoff.reset();
                    None
                }
                Ok(summary) => {
                    backoff.reset();
                    info!(
                        failed = summary.failed,
                        skipped = summary.skipped,
                        requeue_after = ?self.config.requeue_after,
                        "Cycle left work undone, requeueing"
                    );
                    Some(Instant::now() + self.config.requeue_after)
                }
                Err(CycleError::Cancelled) => break,
                Err(e) => {
                    let delay = backoff.next_backoff();
                    error!(error = %e, retry_in = ?delay, "Reconcile cycle failed");
                    Some(Instant::now() + delay)
                }
            };
        }
    }
}

/// Run one stage of a cycle, abandoning it on shutdown or at the deadline.
async fn bounded<T>(
    stage: &'static str,
    deadline: Instant,
    shutdown: &watch::Receiver<bool>,
    work: impl Future<Output = T>,
) -> Result<T, CycleError> {
    tokio::select! {
        biased;
        () = wait_for_shutdown(shutdown.clone()) => Err(CycleError::Cancelled),
        () = sleep_until(deadline) => {
            warn!(stage, "Cycle stage abandoned at deadline");
            Err(CycleError::DeadlineExceeded { stage })
        }
        output = work => Ok(output),
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod engine_tests;
