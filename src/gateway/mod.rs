// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Gateway management via its administrative HTTP API.
//!
//! This module provides the boundary between the reconcile pipeline and the
//! gateway control plane:
//!
//! - Upserting entities by name (create-or-update, idempotent)
//! - Creating entities without overwriting unmanaged ones of the same name
//! - Deleting entities by name (absent entities count as deleted)
//! - Reading back every entity carrying the ownership tag
//! - Probing reachability before a cycle touches anything
//!
//! # Architecture
//!
//! The pipeline only depends on the [`AdminApi`] trait. [`GatewayAdmin`] is the
//! HTTP implementation; tests substitute in-memory fakes.
//!
//! # Example
//!
//! ```rust,no_run
//! use kingress::gateway::{AdminApi, GatewayAdmin};
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let admin = GatewayAdmin::new("http://localhost:8001", None, Duration::from_secs(10))?;
//! admin.probe().await?;
//! let applied = admin.fetch_applied().await?;
//! println!("{} owned entities", applied.len());
//! # Ok(())
//! # }
//! ```

pub mod admin_ops;
pub mod types;

pub use types::{
    AppliedState, Certificate, Consumer, Credential, Destination, Entity, EntityKey, EntityKind,
    Plugin, PluginScope, Route, Service, Sni, Target, Upstream,
};

use crate::errors::AdminError;
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Operations the reconcile pipeline needs from the gateway.
#[async_trait]
pub trait AdminApi: Send + Sync {
    /// Create or replace the entity with the same kind and name.
    async fn upsert(&self, entity: &Entity) -> Result<(), AdminError>;

    /// Create an entity the controller has no record of.
    ///
    /// Implementations must not overwrite an entity of the same name that
    /// lacks the ownership tag.
    async fn create(&self, entity: &Entity) -> Result<(), AdminError> {
        self.upsert(entity).await
    }

    /// Delete an entity. Deleting an entity that does not exist succeeds.
    async fn delete(&self, key: &EntityKey) -> Result<(), AdminError>;

    /// Read every entity owned by this controller.
    async fn fetch_applied(&self) -> Result<AppliedState, AdminError>;

    /// Check that the admin API answers at all.
    async fn probe(&self) -> Result<(), AdminError>;
}

/// HTTP client for the gateway admin API.
#[derive(Debug, Clone)]
pub struct GatewayAdmin {
    /// HTTP client for API requests
    client: Arc<HttpClient>,
    /// Admin API base URL
    base: Url,
    /// Optional admin token, sent on every request
    token: Option<Arc<String>>,
    /// Per-call timeout, also reported in timeout errors
    call_timeout: Duration,
}

impl GatewayAdmin {
    /// Create a client for the admin API at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::InvalidUrl`] if the URL does not parse or cannot
    /// carry path segments, and [`AdminError::Transport`] if the HTTP client
    /// cannot be constructed.
    pub fn new(
        base_url: &str,
        token: Option<String>,
        call_timeout: Duration,
    ) -> Result<Self, AdminError> {
        let base = admin_ops::build_api_url(base_url)?;
        let client = HttpClient::builder()
            .timeout(call_timeout)
            .build()
            .map_err(|e| AdminError::Transport {
                url: base.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            client: Arc::new(client),
            base,
            token: token.filter(|t| !t.is_empty()).map(Arc::new),
            call_timeout,
        })
    }

    /// Admin API base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn token(&self) -> Option<&str> {
        self.token.as_deref().map(String::as_str)
    }
}

#[async_trait]
impl AdminApi for GatewayAdmin {
    async fn upsert(&self, entity: &Entity) -> Result<(), AdminError> {
        admin_ops::upsert_entity(
            &self.client,
            &self.base,
            self.token(),
            self.call_timeout,
            entity,
        )
        .await
    }

    async fn create(&self, entity: &Entity) -> Result<(), AdminError> {
        admin_ops::create_entity(
            &self.client,
            &self.base,
            self.token(),
            self.call_timeout,
            entity,
        )
        .await
    }

    async fn delete(&self, key: &EntityKey) -> Result<(), AdminError> {
        admin_ops::delete_entity(&self.client, &self.base, self.token(), self.call_timeout, key)
            .await
    }

    async fn fetch_applied(&self) -> Result<AppliedState, AdminError> {
        admin_ops::fetch_applied(&self.client, &self.base, self.token(), self.call_timeout).await
    }

    async fn probe(&self) -> Result<(), AdminError> {
        admin_ops::probe(&self.client, &self.base, self.token(), self.call_timeout).await
    }
}
