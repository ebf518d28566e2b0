//! Per-request resolution: API key -> tenant alias map -> routing entry.
//!
//! Resolution is split in two on purpose. [`RequestResolver::resolve`]
//! authenticates and rewrites the model field at admission;
//! [`RequestResolver::route`] runs immediately before dispatch so the
//! routing decision sees the freshest table state even for a request that
//! sat in flight while the configuration changed.

use std::sync::Arc;

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::tables::{AuthTable, ModelEntry, ModelTable, RESERVED_PREFIX};

/// Dedicated API-key header, accepted alongside `Authorization`.
pub const API_KEY_HEADER: &str = "x-api-key";

const BEARER_PREFIX: &str = "Bearer ";

/// Request-time resolution failures.
///
/// All variants surface to the caller as one uniform, non-descriptive
/// response: which check failed must not be observable from outside, or
/// the error becomes a key/alias enumeration side channel. The specific
/// variant is logged server-side only.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no API key supplied")]
    Unauthenticated,
    #[error("unknown API key")]
    UnknownTenant,
    #[error("request body has no model field")]
    MissingModel,
    #[error("model name uses a reserved prefix")]
    ReservedNamePrefix,
    #[error("model '{0}' is not mapped for this tenant")]
    UnknownModelAlias(String),
    #[error("no routing entry for '{0}'")]
    UnknownRoute(String),
}

impl IntoResponse for ResolveError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "type": "invalid_request",
                "message": "invalid API key or model"
            }
        }));
        (StatusCode::UNAUTHORIZED, body).into_response()
    }
}

/// Outcome of admission-time resolution. Owned by the request task.
#[derive(Debug)]
pub struct ResolvedRequest {
    pub tenant_key: String,
    /// The user-facing name the tenant asked for.
    pub alias: String,
    pub route_id: String,
}

/// Outcome of dispatch-time routing.
#[derive(Debug)]
pub struct ResolvedRoute {
    pub route_id: String,
    pub entry: Arc<ModelEntry>,
}

/// Resolves inbound requests against the live configuration tables.
#[derive(Clone)]
pub struct RequestResolver {
    auth: Arc<AuthTable>,
    models: Arc<ModelTable>,
}

impl RequestResolver {
    pub fn new(auth: Arc<AuthTable>, models: Arc<ModelTable>) -> Self {
        Self { auth, models }
    }

    /// Authenticate the request and rewrite its `model` field to the
    /// internal reference. Table access is synchronous and bounded; this
    /// never suspends.
    pub fn resolve(
        &self,
        headers: &HeaderMap,
        body: &mut Value,
    ) -> Result<ResolvedRequest, ResolveError> {
        let tenant_key = extract_api_key(headers)?.to_string();
        let entry = self
            .auth
            .get(&tenant_key)
            .ok_or(ResolveError::UnknownTenant)?;

        let alias = body
            .get("model")
            .and_then(Value::as_str)
            .ok_or(ResolveError::MissingModel)?
            .to_string();
        // a client must not be able to smuggle in a pre-resolved reference
        if alias.starts_with(RESERVED_PREFIX) {
            return Err(ResolveError::ReservedNamePrefix);
        }
        let route_id = entry
            .route_id(&alias)
            .ok_or_else(|| ResolveError::UnknownModelAlias(alias.clone()))?
            .to_string();

        if let Some(obj) = body.as_object_mut() {
            obj.insert(
                "model".to_string(),
                Value::String(internal_reference(&route_id)),
            );
        }

        Ok(ResolvedRequest {
            tenant_key,
            alias,
            route_id,
        })
    }

    /// Look up the routing entry for an already-rewritten model field.
    /// Called immediately before dispatch, never fused with `resolve`.
    pub fn route(&self, model_field: &str) -> Result<ResolvedRoute, ResolveError> {
        let route_id = model_field
            .strip_prefix(RESERVED_PREFIX)
            .ok_or_else(|| ResolveError::UnknownRoute(model_field.to_string()))?;
        let entry = self
            .models
            .get(route_id)
            .ok_or_else(|| ResolveError::UnknownRoute(route_id.to_string()))?;
        Ok(ResolvedRoute {
            route_id: route_id.to_string(),
            entry,
        })
    }
}

/// Encode an internal routing id as the reserved-prefixed model reference
/// downstream stages recognize as already resolved.
pub fn internal_reference(route_id: &str) -> String {
    format!("{RESERVED_PREFIX}{route_id}")
}

fn extract_api_key(headers: &HeaderMap) -> Result<&str, ResolveError> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        let token = value.strip_prefix(BEARER_PREFIX).unwrap_or(value);
        if !token.is_empty() {
            return Ok(token);
        }
    }
    if let Some(value) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        if !value.is_empty() {
            return Ok(value);
        }
    }
    Err(ResolveError::Unauthenticated)
}
