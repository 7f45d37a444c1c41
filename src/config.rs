// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Command-line and environment configuration of the controller binary.
//!
//! Every flag has an environment fallback so the controller can be configured
//! from a Deployment manifest without arguments.

use crate::constants::{
    DEFAULT_ADMIN_CALL_TIMEOUT_SECS, DEFAULT_ADMIN_URL, DEFAULT_CYCLE_DEADLINE_SECS,
    DEFAULT_INGRESS_CLASS, DEFAULT_MAX_ATTEMPTS, DEFAULT_METRICS_BIND_ADDRESS,
    DEFAULT_MIN_CYCLE_INTERVAL_MILLIS, DEFAULT_REQUEUE_SECS, DEFAULT_SNAPSHOT_READY_TIMEOUT_SECS,
    DEFAULT_SYNC_CONCURRENCY,
};
use crate::reconcilers::builder::BuildOptions;
use crate::reconcilers::engine::EngineConfig;
use crate::reconcilers::executor::ExecutorConfig;
use crate::reconcilers::retry::default_admin_backoff;
use clap::Parser;
use std::time::Duration;

/// kingress - reconciles Kubernetes ingress declarations into a gateway admin API
#[derive(Parser, Debug, Clone)]
#[command(name = "kingress", version, about, long_about = None)]
pub struct Cli {
    /// Base URL of the gateway admin API
    #[arg(long, env = "KINGRESS_ADMIN_URL", default_value = DEFAULT_ADMIN_URL)]
    pub admin_url: String,

    /// Token sent with every admin API request
    #[arg(long, env = "KINGRESS_ADMIN_TOKEN", hide_env_values = true)]
    pub admin_token: Option<String>,

    /// Ingress class handled by this controller
    #[arg(long, env = "KINGRESS_INGRESS_CLASS", default_value = DEFAULT_INGRESS_CLASS)]
    pub ingress_class: String,

    /// Only watch this namespace (all namespaces when unset)
    #[arg(long, env = "KINGRESS_WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Maximum concurrent admin API operations
    #[arg(long, env = "KINGRESS_SYNC_CONCURRENCY", default_value_t = DEFAULT_SYNC_CONCURRENCY)]
    pub concurrency: usize,

    /// Timeout of a single admin API call, in seconds
    #[arg(long, env = "KINGRESS_ADMIN_TIMEOUT_SECS", default_value_t = DEFAULT_ADMIN_CALL_TIMEOUT_SECS)]
    pub admin_timeout_secs: u64,

    /// Budget for one whole reconcile cycle, in seconds
    #[arg(long, env = "KINGRESS_CYCLE_DEADLINE_SECS", default_value_t = DEFAULT_CYCLE_DEADLINE_SECS)]
    pub cycle_deadline_secs: u64,

    /// Minimum spacing between two cycles, in milliseconds
    #[arg(long, env = "KINGRESS_MIN_CYCLE_INTERVAL_MS", default_value_t = DEFAULT_MIN_CYCLE_INTERVAL_MILLIS)]
    pub min_cycle_interval_ms: u64,

    /// Attempts per admin API operation, including the first
    #[arg(long, env = "KINGRESS_MAX_ATTEMPTS", default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,

    /// Delay before retrying operations that failed, in seconds
    #[arg(long, env = "KINGRESS_REQUEUE_SECS", default_value_t = DEFAULT_REQUEUE_SECS)]
    pub requeue_secs: u64,

    /// How long to wait for the watch caches on startup, in seconds
    #[arg(long, env = "KINGRESS_SNAPSHOT_READY_TIMEOUT_SECS", default_value_t = DEFAULT_SNAPSHOT_READY_TIMEOUT_SECS)]
    pub snapshot_ready_timeout_secs: u64,

    /// Address of the Prometheus metrics endpoint
    #[arg(long, env = "KINGRESS_METRICS_BIND_ADDRESS", default_value = DEFAULT_METRICS_BIND_ADDRESS)]
    pub metrics_bind_address: String,
}

impl Cli {
    /// Reconcile loop settings derived from the flags.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            build: BuildOptions {
                ingress_class: self.ingress_class.clone(),
            },
            executor: ExecutorConfig {
                concurrency: self.concurrency.max(1),
                max_attempts: self.max_attempts.max(1),
                backoff: default_admin_backoff(),
            },
            min_cycle_interval: Duration::from_millis(self.min_cycle_interval_ms),
            cycle_deadline: Duration::from_secs(self.cycle_deadline_secs),
            requeue_after: Duration::from_secs(self.requeue_secs),
        }
    }

    #[must_use]
    pub fn admin_timeout(&self) -> Duration {
        Duration::from_secs(self.admin_timeout_secs)
    }

    #[must_use]
    pub fn snapshot_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.snapshot_ready_timeout_secs)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
