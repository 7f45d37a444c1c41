// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Admin API HTTP operations.
//!
//! Every function here performs exactly one logical operation without retrying;
//! retry state lives with the caller so it can be raced against the cycle
//! deadline and shutdown.

use super::types::{is_owned, AppliedState, Entity, EntityKey, EntityKind};
use crate::constants::{ADMIN_PAGE_SIZE, ADMIN_TOKEN_HEADER};
use crate::errors::AdminError;
use crate::labels::OWNERSHIP_TAG;
use reqwest::{Client as HttpClient, Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

/// One page of a collection listing.
#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    data: Vec<Value>,
    /// Opaque cursor of the next page, absent on the last page.
    #[serde(default)]
    offset: Option<String>,
}

/// Parse the admin API base URL.
///
/// A missing scheme defaults to `http://`; trailing slashes are dropped.
///
/// # Errors
///
/// Returns [`AdminError::InvalidUrl`] if the result is not a base URL.
pub fn build_api_url(server: &str) -> Result<Url, AdminError> {
    let trimmed = server.trim().trim_end_matches('/');
    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };

    let url = Url::parse(&with_scheme).map_err(|e| AdminError::InvalidUrl(format!("{server}: {e}")))?;
    if url.cannot_be_a_base() {
        return Err(AdminError::InvalidUrl(server.to_string()));
    }
    Ok(url)
}

/// `{base}/{segments...}`, with every segment percent-encoded.
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, AdminError> {
    let mut url = base.clone();
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|()| AdminError::InvalidUrl(base.to_string()))?;
        path.pop_if_empty();
        for segment in segments {
            path.push(segment);
        }
    }
    Ok(url)
}

fn map_send_error(url: &Url, timeout: Duration, e: &reqwest::Error) -> AdminError {
    if e.is_timeout() {
        AdminError::Timeout {
            url: url.to_string(),
            timeout,
        }
    } else {
        AdminError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

/// Send one request and return the status and body of a successful response.
async fn send(
    client: &HttpClient,
    token: Option<&str>,
    timeout: Duration,
    method: Method,
    url: Url,
    body: Option<&Value>,
) -> Result<(StatusCode, String), AdminError> {
    debug!(method = %method, url = %url, "Admin API request");

    let mut request = client.request(method.clone(), url.clone());
    if let Some(body) = body {
        request = request.json(body);
    }
    if let Some(token) = token {
        request = request.header(ADMIN_TOKEN_HEADER, token);
    }

    let response = request
        .send()
        .await
        .map_err(|e| map_send_error(&url, timeout, &e))?;
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| map_send_error(&url, timeout, &e))?;

    if status.is_success() {
        return Ok((status, text));
    }

    Err(AdminError::Status {
        method: method.to_string(),
        url: url.to_string(),
        status: status.as_u16(),
        body: text,
    })
}

/// Create or replace an entity by name.
///
/// # Errors
///
/// Returns an [`AdminError`] if the request fails or is rejected.
pub async fn upsert_entity(
    client: &HttpClient,
    base: &Url,
    token: Option<&str>,
    timeout: Duration,
    entity: &Entity,
) -> Result<(), AdminError> {
    let kind = entity.kind();
    let url = endpoint(base, &[kind.collection(), entity.name()])?;
    let body = entity.to_body().map_err(|e| AdminError::Decode {
        url: url.to_string(),
        message: e.to_string(),
    })?;

    match send(client, token, timeout, Method::PUT, url, Some(&body)).await {
        Ok((status, _)) => {
            info!(kind = %kind, name = %entity.name(), status = %status, "Upserted gateway entity");
            Ok(())
        }
        Err(e) => {
            error!(kind = %kind, name = %entity.name(), error = %e, "Failed to upsert gateway entity");
            Err(e)
        }
    }
}

/// Create an entity, refusing to overwrite one the controller does not own.
///
/// The entity is read first. A 404 means the name is free; an existing entity
/// must carry the ownership tag, otherwise [`AdminError::NotOwned`] is returned
/// and nothing is written.
///
/// # Errors
///
/// Returns an [`AdminError`] if a request fails or the name is taken.
pub async fn create_entity(
    client: &HttpClient,
    base: &Url,
    token: Option<&str>,
    timeout: Duration,
    entity: &Entity,
) -> Result<(), AdminError> {
    let kind = entity.kind();
    let url = endpoint(base, &[kind.collection(), entity.name()])?;
    let existing_url = url.to_string();

    match send(client, token, timeout, Method::GET, url, None).await {
        Ok((_, text)) => {
            let existing: Value =
                serde_json::from_str(&text).map_err(|e| AdminError::Decode {
                    url: existing_url,
                    message: e.to_string(),
                })?;
            if !is_owned(&existing) {
                warn!(kind = %kind, name = %entity.name(), "Refusing to overwrite unmanaged gateway entity");
                return Err(AdminError::NotOwned {
                    kind: kind.collection().to_string(),
                    name: entity.name().to_string(),
                });
            }
            debug!(kind = %kind, name = %entity.name(), "Owned entity already present, replacing");
        }
        Err(AdminError::Status { status: 404, .. }) => {}
        Err(e) => return Err(e),
    }

    upsert_entity(client, base, token, timeout, entity).await
}

/// Delete an entity by name. A 404 response means it is already gone.
///
/// # Errors
///
/// Returns an [`AdminError`] if the request fails or is rejected.
pub async fn delete_entity(
    client: &HttpClient,
    base: &Url,
    token: Option<&str>,
    timeout: Duration,
    key: &EntityKey,
) -> Result<(), AdminError> {
    let url = endpoint(base, &[key.kind.collection(), key.name.as_str()])?;

    match send(client, token, timeout, Method::DELETE, url, None).await {
        Ok(_) => {
            info!(entity = %key, "Deleted gateway entity");
            Ok(())
        }
        Err(AdminError::Status { status: 404, .. }) => {
            debug!(entity = %key, "Gateway entity already absent");
            Ok(())
        }
        Err(e) => {
            error!(entity = %key, error = %e, "Failed to delete gateway entity");
            Err(e)
        }
    }
}

/// List every owned entity of one kind, following pagination.
///
/// Entities without the ownership tag are dropped even if the admin API
/// ignored the tag filter.
///
/// # Errors
///
/// Returns an [`AdminError`] if any page cannot be read or decoded.
pub async fn list_owned(
    client: &HttpClient,
    base: &Url,
    token: Option<&str>,
    timeout: Duration,
    kind: EntityKind,
) -> Result<Vec<Entity>, AdminError> {
    let mut entities = Vec::new();
    let mut offset: Option<String> = None;

    loop {
        let mut url = endpoint(base, &[kind.collection()])?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("tags", OWNERSHIP_TAG)
                .append_pair("size", &ADMIN_PAGE_SIZE.to_string());
            if let Some(offset) = &offset {
                query.append_pair("offset", offset);
            }
        }
        let page_url = url.to_string();

        let (_, text) = send(client, token, timeout, Method::GET, url, None).await?;
        let page: Page = serde_json::from_str(&text).map_err(|e| AdminError::Decode {
            url: page_url.clone(),
            message: e.to_string(),
        })?;

        for body in page.data {
            if !is_owned(&body) {
                continue;
            }
            match Entity::from_body(kind, body) {
                Ok(entity) => entities.push(entity),
                Err(e) => {
                    return Err(AdminError::Decode {
                        url: page_url,
                        message: e.to_string(),
                    })
                }
            }
        }

        match page.offset {
            Some(next) if !next.is_empty() && offset.as_deref() != Some(next.as_str()) => {
                offset = Some(next);
            }
            _ => break,
        }
    }

    debug!(kind = %kind, count = entities.len(), "Listed owned gateway entities");
    Ok(entities)
}

/// Read the full owned configuration across every entity kind.
///
/// # Errors
///
/// Returns an [`AdminError`] if any collection cannot be read.
pub async fn fetch_applied(
    client: &HttpClient,
    base: &Url,
    token: Option<&str>,
    timeout: Duration,
) -> Result<AppliedState, AdminError> {
    let mut state = AppliedState::new();
    for kind in EntityKind::ALL {
        for entity in list_owned(client, base, token, timeout, kind).await? {
            state.insert(entity);
        }
    }
    info!(count = state.len(), "Fetched applied gateway configuration");
    Ok(state)
}

/// Check that the admin API answers.
///
/// # Errors
///
/// Returns an [`AdminError`] if the status endpoint does not return success.
pub async fn probe(
    client: &HttpClient,
    base: &Url,
    token: Option<&str>,
    timeout: Duration,
) -> Result<(), AdminError> {
    let url = endpoint(base, &["status"])?;
    send(client, token, timeout, Method::GET, url, None)
        .await
        .map(|_| ())
        .inspect_err(|e| warn!(error = %e, "Admin API probe failed"))
}

#[cfg(test)]
#[path = "admin_ops_tests.rs"]
mod admin_ops_tests;
