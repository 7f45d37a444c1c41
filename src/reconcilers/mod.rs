// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The reconcile pipeline.
//!
//! Watched Kubernetes objects are translated into gateway entities and pushed
//! to the gateway admin API, one full pass per cycle:
//!
//! 1. [`builder`] - Translate a snapshot into derived entities and per-object problems
//! 2. [`validator`] - Resolve listen point conflicts, merge duplicates, prune dangling references
//! 3. [`diff`] - Compare the desired graph with the applied configuration
//! 4. [`executor`] - Apply the changeset in dependency order with bounded concurrency
//! 5. [`status`] - Publish one outcome per source object
//!
//! [`engine`] drives the stages, coalesces triggers and owns the cache of the
//! applied configuration.
//!
//! # Example
//!
//! ```rust,no_run
//! use kingress::reconcilers::{build, validate, diff, BuildOptions};
//! use kingress::gateway::AppliedState;
//! use kingress::snapshot::Snapshot;
//!
//! let built = build(&Snapshot::default(), &BuildOptions::default());
//! let validation = validate(built);
//! let changeset = diff(&validation.graph, &AppliedState::new());
//! assert!(changeset.is_empty());
//! ```

pub mod builder;
pub mod diff;
pub mod engine;
pub mod executor;
pub mod retry;
pub mod status;
pub mod types;
pub mod validator;

pub use builder::{build, BuildOptions};
pub use diff::{diff, Action, Changeset, Operation};
pub use engine::{CyclePhase, CycleSummary, Engine, EngineConfig, TriggerFilter};
pub use executor::{execute, ExecutionReport, ExecutorConfig, OpOutcome};
pub use status::{
    compute_outcomes, report_all, ConditionType, KubeStatusReporter, SourceOutcome,
    StatusReporter,
};
pub use types::{BuildOutput, DesiredGraph, ListenPoint, Problem, ProblemKind, ValidationOutput};
pub use validator::validate;
