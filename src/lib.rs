// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#![allow(unexpected_cfgs)]

//! # kingress - Kubernetes ingress controller for an API gateway
//!
//! kingress watches Kubernetes networking objects and keeps the configuration
//! of an API gateway in line with them through the gateway's administrative
//! HTTP API.
//!
//! ## Overview
//!
//! - `Ingress`, `TCPIngress` and `UDPIngress` become gateway routes and services
//! - `Service` and `EndpointSlice` objects become upstreams and targets
//! - TLS `Secret`s become certificates and SNIs
//! - `GatewayPlugin` and `GatewayConsumer` resources become plugins, consumers
//!   and credentials
//!
//! Each cycle rebuilds the full desired configuration from a snapshot,
//! resolves conflicting claims deterministically, and applies only the
//! difference to what the gateway already holds. Every in-scope object gets
//! exactly one outcome: `Ready`, `Conflicting`, `Invalid` or `SyncFailed`.
//!
//! ## Modules
//!
//! - [`crd`] - Custom Resource Definitions
//! - [`snapshot`] - Snapshot and change event types
//! - [`context`] - Snapshot provider backed by reflector stores
//! - [`gateway`] - Gateway entities and the admin API client
//! - [`reconcilers`] - The reconcile pipeline
//! - [`config`] - Command-line configuration
//! - [`metrics`] - Prometheus metrics
//!
//! ## Example
//!
//! ```rust,no_run
//! use kingress::reconcilers::{build, validate, BuildOptions};
//! use kingress::snapshot::Snapshot;
//!
//! let validation = validate(build(&Snapshot::default(), &BuildOptions::default()));
//! println!("desired graph {}", validation.graph.fingerprint());
//! ```

pub mod config;
pub mod constants;
pub mod context;
pub mod crd;
pub mod errors;
pub mod gateway;
pub mod http_errors;
pub mod labels;
pub mod metrics;
pub mod reconcilers;
pub mod snapshot;
pub mod status_reasons;
