use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{extract::State, routing::post, Json, Router};
use serde_json::Value;
use uuid::Uuid;

use crate::AppState;

/// POST /v1/chat/completions - OpenAI-compatible chat endpoint.
///
/// Resolution happens in two steps: alias resolution at admission, route
/// lookup immediately before dispatch. A route that changes while the
/// request is in flight is picked up by the second lookup.
async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(mut body): Json<Value>,
) -> Response {
    let request_id = Uuid::new_v4();

    let resolved = match state.resolver.resolve(&headers, &mut body) {
        Ok(resolved) => resolved,
        Err(e) => {
            // the variant stays server-side; the caller gets the uniform
            // response from IntoResponse
            tracing::debug!(request_id = %request_id, error = %e, "request resolution failed");
            return e.into_response();
        }
    };

    let model_field = body
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let route = match state.resolver.route(&model_field) {
        Ok(route) => route,
        Err(e) => {
            tracing::debug!(
                request_id = %request_id,
                route_id = %resolved.route_id,
                error = %e,
                "route lookup failed"
            );
            return e.into_response();
        }
    };

    match state.dispatcher.dispatch(&route, &body).await {
        Ok(outcome) => {
            tracing::info!(
                request_id = %request_id,
                alias = %resolved.alias,
                route_id = %route.route_id,
                provider = %outcome.provider,
                status = outcome.status,
                "request dispatched"
            );
            let status =
                StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::BAD_GATEWAY);
            (status, Json(outcome.body)).into_response()
        }
        Err(e) => {
            tracing::error!(
                request_id = %request_id,
                route_id = %route.route_id,
                error = %e,
                "dispatch failed"
            );
            e.into_response()
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .with_state(state)
}
