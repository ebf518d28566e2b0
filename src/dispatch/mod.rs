//! Forwarding resolved requests to upstream providers.
//!
//! Walks the routing policy in order: the primary provider first, falling
//! back to the next one on transport-level failure only. An upstream HTTP
//! error response is a provider answering and is passed through as-is.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::resolve::ResolvedRoute;
use crate::tables::{ApiKeyLocation, ProviderConfig};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("all providers failed for route '{route_id}': {last_error}")]
    AllProvidersFailed {
        route_id: String,
        last_error: String,
    },
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "type": "upstream_unavailable",
                "message": "no provider could serve the request"
            }
        }));
        (StatusCode::BAD_GATEWAY, body).into_response()
    }
}

/// Response from whichever provider answered.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub provider: String,
    pub status: u16,
    pub body: Value,
}

/// Seam between routing and the actual provider call, so tests can
/// substitute the network.
#[async_trait]
pub trait ProviderDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        route: &ResolvedRoute,
        body: &Value,
    ) -> Result<DispatchOutcome, DispatchError>;
}

/// HTTP dispatcher forwarding OpenAI-style chat completions.
pub struct HttpDispatcher {
    client: reqwest::Client,
}

impl HttpDispatcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    fn endpoint(cfg: &ProviderConfig) -> String {
        format!(
            "{}/v1/chat/completions",
            cfg.api_base.as_str().trim_end_matches('/')
        )
    }
}

#[async_trait]
impl ProviderDispatcher for HttpDispatcher {
    async fn dispatch(
        &self,
        route: &ResolvedRoute,
        body: &Value,
    ) -> Result<DispatchOutcome, DispatchError> {
        let mut last_error: Option<String> = None;

        for (name, cfg) in route.entry.ordered_providers() {
            // the upstream gets its own model name, never the internal
            // reference
            let mut upstream_body = body.clone();
            if let Some(obj) = upstream_body.as_object_mut() {
                obj.insert(
                    "model".to_string(),
                    Value::String(cfg.model_name.clone()),
                );
            }

            let url = Self::endpoint(cfg);
            tracing::debug!(provider = name, url = %url, "dispatching to provider");

            let mut request = self.client.post(&url).json(&upstream_body);
            if cfg.api_key_location == ApiKeyLocation::Header {
                if let Some(key) = &cfg.api_key {
                    request = request.bearer_auth(key);
                }
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(
                        provider = name,
                        error = %e,
                        "provider unreachable; trying next in routing order"
                    );
                    last_error = Some(e.to_string());
                    continue;
                }
            };

            let status = response.status().as_u16();
            let body = match response.text().await {
                Ok(text) => serde_json::from_str(&text)
                    .unwrap_or_else(|_| json!({ "raw": text })),
                Err(e) => {
                    tracing::warn!(
                        provider = name,
                        error = %e,
                        "provider response unreadable; trying next in routing order"
                    );
                    last_error = Some(e.to_string());
                    continue;
                }
            };

            return Ok(DispatchOutcome {
                provider: name.to_string(),
                status,
                body,
            });
        }

        Err(DispatchError::AllProvidersFailed {
            route_id: route.route_id.clone(),
            last_error: last_error.unwrap_or_else(|| "no providers configured".to_string()),
        })
    }
}
